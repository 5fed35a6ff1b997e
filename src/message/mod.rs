//! Message identity and per-fragment headers.
//!
//! Everything the engine knows about a fragment arrives through these types;
//! the transport that produced them is not visible past this point.

pub mod header;
pub mod id;

pub use header::{Message, MessageHeader};
pub use id::{ChunkId, MessageId, MessageIdParseError, SenderKey};
