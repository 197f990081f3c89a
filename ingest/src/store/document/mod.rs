mod base;
mod filter;
pub mod memory;

pub use base::{DocumentStore, SegmentSlice};
pub use filter::{Comparison, DocumentField, DocumentFilter, FilterValue, Predicate};
