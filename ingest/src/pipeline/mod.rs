//! The full batch pipeline.
//!
//! A batch travels through the stages in this order:
//!
//! ```text
//! receive-fullbatch -> purge-plan -> purge-execute -> broadcast -> cleanup
//!                                 \_________________/
//!                                   (nothing to purge)
//! ```
//!
//! A batch that is canceled, for example by a failed delete sanity check or a lock timeout, goes
//! through `abort` and then `cleanup` instead.

mod driver;
pub mod purge;
pub mod stage;
mod stages;

pub use driver::{BatchPipeline, MessageOutcome};
pub use purge::PurgePlan;
pub use stage::Stage;
