//! Retransmission requests: what is asked for, on whose behalf, and how it
//! is packed for the wire.

pub mod details;
pub mod error;
pub mod pending;
pub mod scheduler;
pub mod wire;

pub use details::RequestDetails;
pub use error::RequestError;
pub use pending::PendingRequests;
pub use scheduler::{Priority, RequestScheduler, ScheduledRequest};
pub use wire::{ChunkRange, DataRequest, RequestEntry, RequestedRanges};
