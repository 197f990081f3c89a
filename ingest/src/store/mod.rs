//! Capabilities the ingestion core is built on.
//!
//! Each capability is a trait with an in-memory implementation. Networked implementations live
//! outside this crate.

pub mod document;
pub mod payload;
pub mod queue;
pub mod table;
