mod batch;
mod change;
mod document;
mod identifier;

pub use batch::{BatchIdentity, PayloadLocation, SegmentMessage};
pub use change::{ChangeMessage, ChangeType, DataChangeMessage};
pub use document::{ABORTED_HASH_MARK, Document, DocumentStatus, IncomingRecord};
pub use identifier::DataObjectIdentifier;
