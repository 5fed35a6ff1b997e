//! Test doubles and helpers for driving a
//! [`Reassembler`](dissemination::Reassembler) without a network.
//!
//! [`Harness`] wires an engine to recording collaborators so tests can feed
//! fragments, run request cycles, and inspect what was delivered and what
//! was asked for.
//!
//! ```rust
//! use dissemination::MessageId;
//! use dissemination_testing::{Harness, fragment_message, pattern};
//!
//! let harness = Harness::new();
//! let id = MessageId::new("G", "S", 0);
//! for fragment in fragment_message(&id, &pattern(300), 100) {
//!     harness.feed(fragment).expect("accepted");
//! }
//! assert_eq!(harness.sink.seqs(), vec![0]);
//! ```

pub mod collab;
pub mod fragments;
pub mod harness;
pub mod logging;
pub mod metrics;

pub use collab::{RecordingSink, RecordingTransport, StaticNode};
pub use fragments::{fragment_message, pattern, slice};
pub use harness::Harness;
pub use logging::{LoggerHandle, logger};
pub use metrics::counter_value;
