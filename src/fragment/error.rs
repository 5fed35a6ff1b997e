//! Error and status types emitted by the reassembly layer.
//!
//! Every variant is scoped to a single fragment or message. None of them is
//! fatal: callers log the error and carry on with the next arrival.

use thiserror::Error;

use crate::message::MessageId;

/// Errors produced while accepting, classifying, or delivering fragments.
#[non_exhaustive]
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ReassemblyError {
    /// A fragment with the same offset and length is already held.
    #[error("duplicate fragment for {id}: offset={offset}, length={length}")]
    DuplicateFragment {
        id: MessageId,
        offset: u32,
        length: u32,
    },
    /// The fragment carried no bytes for a message with a non-zero length.
    #[error("empty fragment for {id} at offset {offset}")]
    EmptyFragment { id: MessageId, offset: u32 },
    /// The fragment starts at or beyond the declared end of the message.
    #[error("fragment for {id} at offset {offset} lies beyond total length {total}")]
    FragmentOutOfRange { id: MessageId, offset: u32, total: u32 },
    /// The payload size differs from the length stated in its header.
    #[error("fragment for {id} declares {declared} bytes but carries {actual}")]
    PayloadLengthMismatch {
        id: MessageId,
        declared: u32,
        actual: usize,
    },
    /// A fragment disagrees with the total length recorded for its message.
    #[error("fragment for {id} declares total {found}, expected {expected}")]
    TotalLengthMismatch {
        id: MessageId,
        expected: u32,
        found: u32,
    },
    /// Reassembly produced a buffer whose size differs from the header.
    #[error("reassembled {id} to {actual} bytes, expected {expected}")]
    LengthMismatch {
        id: MessageId,
        expected: u32,
        actual: usize,
    },
    /// A chunk declared a metadata prefix, which only whole messages carry.
    #[error("chunk {id} cannot carry a metadata prefix")]
    ChunkWithMetadata { id: MessageId },
    /// Coverage had a hole at `at` while copying fragments together.
    #[error("missing bytes for {id} at offset {at}")]
    MissingFragment { id: MessageId, at: u32 },
}
