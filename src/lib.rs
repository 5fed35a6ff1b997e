#![doc(html_root_url = "https://docs.rs/dissemination/latest")]
//! Public API for the `dissemination` library.
//!
//! This crate reassembles group-communication messages from fragments heard
//! on a broadcast link, requests missing data from neighbours, and delivers
//! complete messages to subscribers in the order each subscription demands.
//!
//! The engine is [`Reassembler`]; it is wired to its surroundings through the
//! traits in [`collab`].

pub mod backoff;
pub mod cache;
pub mod collab;
pub mod config;
pub mod delivery;
pub mod fragment;
pub mod message;
pub mod metrics;
pub mod range;
pub mod reassembler;
pub mod request;
pub mod subscription;

pub use cache::MemoryCache;
pub use collab::{DeliverySink, LocalNode, MessageCache, Transport};
pub use config::{ConfigError, ReassemblerConfig, RequestLimit};
pub use delivery::{Delivery, DeliveryKind};
pub use fragment::{ReassemblyError, Requirements};
pub use message::{ChunkId, Message, MessageHeader, MessageId, SenderKey};
pub use metrics::{ERRORS_TOTAL, FRAGMENTS_RECEIVED, MESSAGES_DELIVERED, REQUESTS_SENT};
pub use range::{ByteRange, RangeSet};
pub use reassembler::{
    BuildError,
    CycleReport,
    DropReason,
    FragmentOutcome,
    Reassembler,
    ReassemblerBuilder,
    RequestWorker,
};
pub use request::{DataRequest, Priority, RequestDetails, RequestError};
pub use subscription::{Discipline, SubscriptionTable};
