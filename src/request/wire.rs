//! Retransmission requests as they are handed to the transport.
//!
//! Requests are encoded with bincode's standard configuration. The encoded
//! size is what the scheduler measures against the link limit.

use bincode::{Decode, Encode, config, error::EncodeError};

use crate::{
    message::{ChunkId, MessageId},
    range::ByteRange,
};

/// Inclusive range of chunk ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub struct ChunkRange {
    first: ChunkId,
    last: ChunkId,
}

impl ChunkRange {
    #[must_use]
    pub fn new(first: ChunkId, last: ChunkId) -> Self {
        Self {
            first: first.min(last),
            last: first.max(last),
        }
    }

    /// Range holding a single chunk.
    #[must_use]
    pub fn single(chunk: ChunkId) -> Self { Self::new(chunk, chunk) }

    #[must_use]
    pub const fn first(self) -> ChunkId { self.first }

    #[must_use]
    pub const fn last(self) -> ChunkId { self.last }
}

/// What part of a message is being asked for.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub enum RequestedRanges {
    /// The whole message; encodes the `0-0` range sentinel.
    WholeMessage,
    /// Byte ranges of a partially received message.
    Bytes(Vec<ByteRange>),
    /// Chunks of an on-demand object.
    Chunks(Vec<ChunkRange>),
}

impl RequestedRanges {
    /// Number of separately transmittable ranges.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::WholeMessage => 1,
            Self::Bytes(ranges) => ranges.len(),
            Self::Chunks(ranges) => ranges.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Split into one value per range.
    #[must_use]
    pub fn split(&self) -> Vec<Self> {
        match self {
            Self::WholeMessage => vec![Self::WholeMessage],
            Self::Bytes(ranges) => ranges.iter().map(|r| Self::Bytes(vec![*r])).collect(),
            Self::Chunks(ranges) => ranges.iter().map(|r| Self::Chunks(vec![*r])).collect(),
        }
    }

    /// Fold `other` into `self`. A whole-message request absorbs anything.
    pub fn merge(&mut self, other: Self) {
        if matches!(self, Self::WholeMessage) {
            return;
        }
        if matches!(other, Self::WholeMessage) {
            *self = Self::WholeMessage;
            return;
        }
        match (self, other) {
            (Self::Bytes(held), Self::Bytes(more)) => {
                for range in more {
                    if !held.contains(&range) {
                        held.push(range);
                    }
                }
                held.sort();
            }
            (Self::Chunks(held), Self::Chunks(more)) => {
                for range in more {
                    if !held.contains(&range) {
                        held.push(range);
                    }
                }
            }
            (held, more) => *held = more,
        }
    }
}

/// One message's entry in a request.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct RequestEntry {
    pub id: MessageId,
    pub ranges: RequestedRanges,
}

/// A retransmission request broadcast to neighbours.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct DataRequest {
    /// Node asking for the data.
    pub requester: String,
    /// Active neighbours the requester observes; servers use it to throttle.
    pub active_neighbors: u16,
    /// Session identifier used to filter stale peers.
    pub session_id: Option<String>,
    pub entries: Vec<RequestEntry>,
}

impl DataRequest {
    /// Empty request carrying the requester's identity.
    #[must_use]
    pub fn new(requester: impl Into<String>, active_neighbors: u16, session_id: Option<String>) -> Self {
        Self {
            requester: requester.into(),
            active_neighbors,
            session_id,
            entries: Vec::new(),
        }
    }

    /// Encode with bincode's standard configuration.
    ///
    /// # Errors
    ///
    /// Returns an [`EncodeError`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        bincode::encode_to_vec(self, config::standard())
    }

    /// Size of the encoded request in bytes.
    ///
    /// # Errors
    ///
    /// Returns an [`EncodeError`] if serialization fails.
    pub fn encoded_len(&self) -> Result<usize, EncodeError> { Ok(self.to_bytes()?.len()) }
}
