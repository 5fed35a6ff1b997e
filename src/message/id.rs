//! Identity of a disseminated message.
//!
//! A [`MessageId`] names one message published by one originator into one
//! group. Large on-demand objects are split into chunks, each carrying its own
//! [`ChunkId`]; ordinary messages use [`ChunkId::UNDEFINED`].

use std::{fmt, str::FromStr};

use bincode::{Decode, Encode};
use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Chunk identifier within a chunked object.
///
/// # Examples
///
/// ```
/// use dissemination::message::ChunkId;
///
/// assert!(!ChunkId::UNDEFINED.is_defined());
/// assert!(ChunkId::new(3).is_defined());
/// ```
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Encode,
    Decode,
    Serialize,
    Deserialize,
    Display,
    From,
    Into,
)]
#[display("{_0}")]
pub struct ChunkId(u8);

impl ChunkId {
    /// Sentinel used by messages that are not chunks.
    pub const UNDEFINED: Self = Self(0);
    /// Smallest identifier a real chunk can carry.
    pub const MIN: Self = Self(1);
    /// Largest identifier a real chunk can carry.
    pub const MAX: Self = Self(u8::MAX);

    /// Create a new chunk identifier.
    #[must_use]
    pub const fn new(value: u8) -> Self { Self(value) }

    /// Return the raw identifier.
    #[must_use]
    pub const fn get(self) -> u8 { self.0 }

    /// Whether this identifier names a real chunk.
    #[must_use]
    pub const fn is_defined(self) -> bool { self.0 != Self::UNDEFINED.0 }
}

/// Publisher-side key shared by every message of one sender in one group.
///
/// Ordering guarantees are only ever given per `SenderKey`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SenderKey {
    group: String,
    sender: String,
}

impl SenderKey {
    /// Build a key from a group and originator name.
    #[must_use]
    pub fn new(group: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            sender: sender.into(),
        }
    }

    /// Group name.
    #[must_use]
    pub fn group(&self) -> &str { &self.group }

    /// Originating node.
    #[must_use]
    pub fn sender(&self) -> &str { &self.sender }
}

impl fmt::Display for SenderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group, self.sender)
    }
}

/// Immutable identity of one message or one chunk of an object.
///
/// The canonical string form `group:originator:seq[:chunk]` is the key used
/// by caches and on the wire.
///
/// # Examples
///
/// ```
/// use dissemination::message::{ChunkId, MessageId};
///
/// let id = MessageId::new("G", "S", 7);
/// assert_eq!(id.to_string(), "G:S:7");
///
/// let chunk = id.with_chunk(ChunkId::new(2));
/// assert_eq!(chunk.to_string(), "G:S:7:2");
/// assert_eq!("G:S:7:2".parse::<MessageId>().ok(), Some(chunk));
/// ```
#[derive(
    Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Encode, Decode, Serialize, Deserialize,
)]
pub struct MessageId {
    group: String,
    originator: String,
    seq: u32,
    chunk: ChunkId,
}

impl MessageId {
    /// Identify a non-chunked message.
    #[must_use]
    pub fn new(group: impl Into<String>, originator: impl Into<String>, seq: u32) -> Self {
        Self {
            group: group.into(),
            originator: originator.into(),
            seq,
            chunk: ChunkId::UNDEFINED,
        }
    }

    /// Return a copy of this identifier naming the given chunk.
    #[must_use]
    pub fn with_chunk(mut self, chunk: ChunkId) -> Self {
        self.chunk = chunk;
        self
    }

    /// Return the identifier of the whole object this chunk belongs to.
    #[must_use]
    pub fn without_chunk(&self) -> Self { self.clone().with_chunk(ChunkId::UNDEFINED) }

    #[must_use]
    pub fn group(&self) -> &str { &self.group }

    #[must_use]
    pub fn originator(&self) -> &str { &self.originator }

    #[must_use]
    pub const fn seq(&self) -> u32 { self.seq }

    #[must_use]
    pub const fn chunk(&self) -> ChunkId { self.chunk }

    /// Whether the identifier names a chunk rather than a whole message.
    #[must_use]
    pub const fn is_chunk(&self) -> bool { self.chunk.is_defined() }

    /// The (group, originator) pair this message is ordered within.
    #[must_use]
    pub fn sender_key(&self) -> SenderKey { SenderKey::new(&*self.group, &*self.originator) }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.originator, self.seq)?;
        if self.chunk.is_defined() {
            write!(f, ":{}", self.chunk)?;
        }
        Ok(())
    }
}

/// Errors returned when parsing a canonical message id string.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MessageIdParseError {
    /// The string did not contain three or four `:`-separated fields.
    #[error("expected group:originator:seq[:chunk], found {0:?}")]
    Malformed(String),
    /// The sequence field was not an unsigned 32-bit integer.
    #[error("invalid sequence id {0:?}")]
    InvalidSeq(String),
    /// The chunk field was not a non-zero 8-bit integer.
    #[error("invalid chunk id {0:?}")]
    InvalidChunk(String),
}

impl FromStr for MessageId {
    type Err = MessageIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(':').collect();
        let (group, originator, seq, chunk) = match fields.as_slice() {
            [g, o, seq] => (*g, *o, *seq, None),
            [g, o, seq, chunk] => (*g, *o, *seq, Some(*chunk)),
            _ => return Err(MessageIdParseError::Malformed(s.to_owned())),
        };
        if group.is_empty() || originator.is_empty() {
            return Err(MessageIdParseError::Malformed(s.to_owned()));
        }
        let seq = seq
            .parse::<u32>()
            .map_err(|_| MessageIdParseError::InvalidSeq(seq.to_owned()))?;
        let id = Self::new(group, originator, seq);
        match chunk {
            None => Ok(id),
            Some(raw) => match raw.parse::<u8>() {
                Ok(value) if value != ChunkId::UNDEFINED.get() => {
                    Ok(id.with_chunk(ChunkId::new(value)))
                }
                _ => Err(MessageIdParseError::InvalidChunk(raw.to_owned())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("G:S", MessageIdParseError::Malformed("G:S".into()))]
    #[case("G:S:x", MessageIdParseError::InvalidSeq("x".into()))]
    #[case("G:S:1:0", MessageIdParseError::InvalidChunk("0".into()))]
    #[case("G:S:1:256", MessageIdParseError::InvalidChunk("256".into()))]
    #[case(":S:1", MessageIdParseError::Malformed(":S:1".into()))]
    fn rejects_malformed_ids(#[case] input: &str, #[case] expected: MessageIdParseError) {
        assert_eq!(input.parse::<MessageId>(), Err(expected));
    }

    #[test]
    fn chunk_ids_render_with_suffix() {
        let id = MessageId::new("grp", "node-1", 12).with_chunk(ChunkId::MAX);
        assert_eq!(id.to_string(), "grp:node-1:12:255");
        assert!(id.is_chunk());
        assert_eq!(id.without_chunk().to_string(), "grp:node-1:12");
    }

    #[test]
    fn sender_key_groups_by_publisher() {
        let a = MessageId::new("G", "S", 1);
        let b = MessageId::new("G", "S", 9).with_chunk(ChunkId::MIN);
        assert_eq!(a.sender_key(), b.sender_key());
        assert_eq!(a.sender_key().to_string(), "G:S");
    }
}
