//! Unit tests for fragment bookkeeping and completeness classification.
//!
//! Tests are split into focused submodules to keep each file short and easy
//! to navigate.

mod completeness_tests;

use std::time::Instant;

use bytes::Bytes;

use super::{FragmentRecord, InFlightMessage, Requirements};
use crate::message::{MessageHeader, MessageId};

/// Deterministic payload where byte `i` is `i mod 251`.
fn pattern(len: u32) -> Vec<u8> {
    (0..len)
        .map(|i| u8::try_from(i % 251).expect("fits in u8"))
        .collect()
}

fn header(total: u32) -> MessageHeader { MessageHeader::new(MessageId::new("G", "S", 1), total) }

fn slice(payload: &[u8], offset: u32, length: u32) -> FragmentRecord {
    let start = offset as usize;
    let end = start + length as usize;
    FragmentRecord::new(offset, false, Bytes::copy_from_slice(&payload[start..end]))
}

fn reliable_record(header: &MessageHeader) -> InFlightMessage {
    InFlightMessage::new(header, Requirements::new(true, true), Instant::now())
}
