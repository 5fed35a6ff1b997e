//! Fragment-level bookkeeping for partially received messages.
//!
//! This module collects the domain types used by the reassembly layer. Each
//! sub-module focuses on a single concept: a held fragment, the record of one
//! in-flight message, the completeness scan over its fragments, and the index
//! that owns every record.

pub mod completeness;
pub mod error;
pub mod index;
pub mod inflight;
pub mod record;

pub use completeness::Completeness;
pub use error::ReassemblyError;
pub use index::ReassemblyIndex;
pub use inflight::{InFlightMessage, Requirements};
pub use record::FragmentRecord;

#[cfg(test)]
mod tests;
