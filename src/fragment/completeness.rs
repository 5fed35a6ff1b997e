//! Completeness classification and byte reassembly.
//!
//! Both functions walk the held fragments in ascending offset order while
//! tracking a coverage watermark. Bytes below the watermark are ignored, so
//! neither result depends on the order in which fragments arrived.

use super::{FragmentRecord, ReassemblyError};
use crate::message::MessageId;

/// How much of a message the held fragments cover.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completeness {
    /// The message declares a total length of zero.
    Dummy,
    /// Coverage is contiguous from zero to the total length.
    Complete,
    /// Coverage is contiguous over the metadata prefix only.
    MetadataComplete,
    /// Coverage has a gap before the next target boundary.
    Incomplete,
}

/// Classify coverage of a message.
///
/// `metadata_length` is `Some` only while a metadata prefix is still
/// awaiting delivery. `cached_bytes` is the union of held bytes and lets the
/// scan be skipped whenever too few bytes are held to reach the next target.
pub fn classify<'a>(
    fragments: impl IntoIterator<Item = &'a FragmentRecord>,
    total_length: u32,
    metadata_length: Option<u32>,
    cached_bytes: u32,
) -> Completeness {
    if total_length == 0 {
        return Completeness::Dummy;
    }
    let target = metadata_length.unwrap_or(total_length);
    if cached_bytes < target {
        return Completeness::Incomplete;
    }

    let mut watermark = 0_u32;
    for fragment in fragments {
        if fragment.offset() > watermark {
            break;
        }
        watermark = watermark.max(fragment.end());
        if watermark >= total_length {
            return Completeness::Complete;
        }
    }

    match metadata_length {
        Some(length) if watermark >= length => Completeness::MetadataComplete,
        _ => Completeness::Incomplete,
    }
}

/// Copy the first `length` bytes covered by `fragments` into one buffer.
///
/// Leading overlap with bytes already copied is trimmed and anything past
/// `length` is truncated.
///
/// # Errors
///
/// Returns [`ReassemblyError::MissingFragment`] when coverage has a hole
/// before `length`.
pub fn reassemble<'a>(
    id: &MessageId,
    fragments: impl IntoIterator<Item = &'a FragmentRecord>,
    length: u32,
) -> Result<Vec<u8>, ReassemblyError> {
    let limit = usize::try_from(length).unwrap_or(usize::MAX);
    let mut buffer = Vec::with_capacity(limit);

    for fragment in fragments {
        let copied = buffer.len();
        if copied >= limit {
            break;
        }
        let offset = usize::try_from(fragment.offset()).unwrap_or(usize::MAX);
        if offset > copied {
            return Err(ReassemblyError::MissingFragment {
                id: id.clone(),
                at: u32::try_from(copied).unwrap_or(u32::MAX),
            });
        }
        let end = offset.saturating_add(fragment.payload().len()).min(limit);
        if end <= copied {
            continue;
        }
        buffer.extend_from_slice(&fragment.payload()[copied - offset..end - offset]);
    }

    if buffer.len() < limit {
        return Err(ReassemblyError::MissingFragment {
            id: id.clone(),
            at: u32::try_from(buffer.len()).unwrap_or(u32::MAX),
        });
    }
    Ok(buffer)
}
