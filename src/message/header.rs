//! Per-fragment message header and the owned fragment it describes.

use bincode::{Decode, Encode};
use bytes::Bytes;

use super::MessageId;

/// Header carried by every fragment of a message.
///
/// `total_length` is the size of the complete message. A non-zero
/// `metadata_length` marks a prefix of that many bytes which may be delivered
/// on its own before the rest of the message is available. The fragment
/// fields locate this fragment's payload within the message.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct MessageHeader {
    id: MessageId,
    tag: u16,
    total_length: u32,
    metadata_length: u32,
    fragment_offset: u32,
    fragment_length: u32,
}

impl MessageHeader {
    /// Create a header describing the whole message as a single fragment.
    #[must_use]
    pub fn new(id: MessageId, total_length: u32) -> Self {
        Self {
            id,
            tag: 0,
            total_length,
            metadata_length: 0,
            fragment_offset: 0,
            fragment_length: total_length,
        }
    }

    /// Set the application tag used for subscription matching.
    #[must_use]
    pub fn with_tag(mut self, tag: u16) -> Self {
        self.tag = tag;
        self
    }

    /// Declare a metadata prefix of `length` bytes.
    #[must_use]
    pub fn with_metadata_length(mut self, length: u32) -> Self {
        self.metadata_length = length;
        self
    }

    /// Position this header at a fragment of the message.
    #[must_use]
    pub fn with_fragment(mut self, offset: u32, length: u32) -> Self {
        self.fragment_offset = offset;
        self.fragment_length = length;
        self
    }

    #[must_use]
    pub fn id(&self) -> &MessageId { &self.id }

    #[must_use]
    pub const fn tag(&self) -> u16 { self.tag }

    #[must_use]
    pub const fn total_length(&self) -> u32 { self.total_length }

    #[must_use]
    pub const fn metadata_length(&self) -> u32 { self.metadata_length }

    #[must_use]
    pub const fn fragment_offset(&self) -> u32 { self.fragment_offset }

    #[must_use]
    pub const fn fragment_length(&self) -> u32 { self.fragment_length }

    /// Exclusive end offset of this fragment, saturating at `u32::MAX`.
    #[must_use]
    pub const fn fragment_end(&self) -> u32 {
        self.fragment_offset.saturating_add(self.fragment_length)
    }

    /// Whether the header describes a chunk of a larger object.
    #[must_use]
    pub const fn is_chunk(&self) -> bool { self.id.is_chunk() }

    /// Whether the message has a metadata prefix that can complete early.
    ///
    /// Chunks never carry one, and a prefix spanning the whole message is
    /// indistinguishable from the message itself.
    #[must_use]
    pub const fn has_metadata_part(&self) -> bool {
        !self.is_chunk() && self.metadata_length > 0 && self.metadata_length < self.total_length
    }

    /// Copy of this header describing the complete message.
    #[must_use]
    pub fn as_complete(&self) -> Self {
        self.clone().with_fragment(0, self.total_length)
    }
}

/// One received fragment: its header plus the payload bytes it carries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    header: MessageHeader,
    payload: Bytes,
}

impl Message {
    /// Pair a header with its payload.
    #[must_use]
    pub fn new(header: MessageHeader, payload: impl Into<Bytes>) -> Self {
        Self {
            header,
            payload: payload.into(),
        }
    }

    #[must_use]
    pub fn header(&self) -> &MessageHeader { &self.header }

    #[must_use]
    pub fn payload(&self) -> &Bytes { &self.payload }

    /// Split the message into its header and payload.
    #[must_use]
    pub fn into_parts(self) -> (MessageHeader, Bytes) { (self.header, self.payload) }
}
