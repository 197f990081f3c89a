//! Concurrency utilities shared by the pipeline stages.
//!
//! Stages fan work out over many documents or table rows. The helpers in [`bounded`] run that
//! work with a fixed number of futures in flight, so a large batch cannot flood the backing
//! stores with requests. [`settle`] holds the write-wait-reread helpers behind the type lock and
//! the segment claims.

pub mod bounded;
pub mod settle;
