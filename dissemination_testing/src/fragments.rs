//! Building fragments the way a publisher would.

use bytes::Bytes;
use dissemination::{Message, MessageHeader, MessageId};

/// Deterministic payload of `len` bytes.
#[must_use]
pub fn pattern(len: usize) -> Bytes {
    (0..len)
        .map(|i| u8::try_from(i % 251).expect("below 251"))
        .collect::<Vec<_>>()
        .into()
}

/// One fragment of `body` covering `offset..offset + len`.
#[must_use]
pub fn slice(id: &MessageId, body: &Bytes, offset: u32, len: u32) -> Message {
    let total = u32::try_from(body.len()).expect("payload fits u32");
    let start = offset as usize;
    Message::new(
        MessageHeader::new(id.clone(), total).with_fragment(offset, len),
        body.slice(start..start + len as usize),
    )
}

/// Split `body` into fragments of at most `mtu` bytes, in offset order.
#[must_use]
pub fn fragment_message(id: &MessageId, body: &Bytes, mtu: u32) -> Vec<Message> {
    let total = u32::try_from(body.len()).expect("payload fits u32");
    (0..total)
        .step_by(mtu as usize)
        .map(|offset| slice(id, body, offset, mtu.min(total - offset)))
        .collect()
}
