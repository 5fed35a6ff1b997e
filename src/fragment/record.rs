use bytes::Bytes;

use crate::range::ByteRange;

/// One held fragment of an in-flight message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FragmentRecord {
    offset: u32,
    is_chunk: bool,
    payload: Bytes,
}

impl FragmentRecord {
    /// Wrap a fragment payload received at `offset`.
    ///
    /// Payloads longer than `u32::MAX - offset` are clipped so that the
    /// record's end never overflows.
    #[must_use]
    pub fn new(offset: u32, is_chunk: bool, payload: Bytes) -> Self {
        let room = usize::try_from(u32::MAX - offset).unwrap_or(usize::MAX);
        let payload = if payload.len() > room {
            payload.slice(..room)
        } else {
            payload
        };
        Self {
            offset,
            is_chunk,
            payload,
        }
    }

    #[must_use]
    pub const fn offset(&self) -> u32 { self.offset }

    #[must_use]
    pub fn length(&self) -> u32 { u32::try_from(self.payload.len()).unwrap_or(u32::MAX) }

    #[must_use]
    pub fn end(&self) -> u32 { self.offset.saturating_add(self.length()) }

    #[must_use]
    pub const fn is_chunk(&self) -> bool { self.is_chunk }

    #[must_use]
    pub fn payload(&self) -> &Bytes { &self.payload }

    #[must_use]
    pub fn range(&self) -> ByteRange { ByteRange::new(self.offset, self.end()) }
}
