//! Reassembly state for one message key.

use std::{
    collections::{BTreeMap, btree_map::Entry},
    time::Instant,
};

use log::debug;

use super::{Completeness, FragmentRecord, ReassemblyError, completeness};
use crate::{
    message::{MessageHeader, MessageId},
    range::{ByteRange, RangeSet},
    request::RequestDetails,
};

/// Delivery contract fixed for a record when it is created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Requirements {
    /// Delivery must respect sequence order.
    pub sequenced: bool,
    /// Missing parts are worth requesting.
    pub reliable: bool,
}

impl Requirements {
    #[must_use]
    pub const fn new(sequenced: bool, reliable: bool) -> Self {
        Self {
            sequenced,
            reliable,
        }
    }
}

/// A partially received message.
///
/// Fragments are held in ascending offset order with at most one fragment per
/// offset. Derived state (held byte count, missing ranges, contiguous
/// watermark) is recomputed from scratch after every accepted fragment.
#[derive(Debug)]
pub struct InFlightMessage {
    header: MessageHeader,
    requirements: Requirements,
    fragments: BTreeMap<u32, FragmentRecord>,
    missing: Vec<ByteRange>,
    cached_bytes: u32,
    next_expected: u32,
    requested: u32,
    last_request: Option<Instant>,
    last_new_data: Instant,
    metadata_delivered: bool,
    request_details: Option<RequestDetails>,
}

impl InFlightMessage {
    /// Start tracking the message described by `header`.
    #[must_use]
    pub fn new(header: &MessageHeader, requirements: Requirements, now: Instant) -> Self {
        Self {
            header: header.as_complete(),
            requirements,
            fragments: BTreeMap::new(),
            missing: Vec::new(),
            cached_bytes: 0,
            next_expected: 0,
            requested: 0,
            last_request: None,
            last_new_data: now,
            metadata_delivered: false,
            request_details: None,
        }
    }

    /// Accept a fragment.
    ///
    /// Returns `true` when the fragment added bytes that were not held yet. A
    /// fragment at an already held offset replaces the held one only when it
    /// is longer.
    ///
    /// # Errors
    ///
    /// Returns [`ReassemblyError::DuplicateFragment`] when a fragment at the
    /// same offset and at least the same length is already held, and
    /// [`ReassemblyError::TotalLengthMismatch`] when the fragment belongs to a
    /// message of a different size.
    pub fn insert(
        &mut self,
        header: &MessageHeader,
        record: FragmentRecord,
        now: Instant,
    ) -> Result<bool, ReassemblyError> {
        if header.total_length() != self.header.total_length() {
            return Err(ReassemblyError::TotalLengthMismatch {
                id: self.header.id().clone(),
                expected: self.header.total_length(),
                found: header.total_length(),
            });
        }
        match self.fragments.entry(record.offset()) {
            Entry::Occupied(mut held) => {
                if held.get().length() >= record.length() {
                    return Err(ReassemblyError::DuplicateFragment {
                        id: self.header.id().clone(),
                        offset: record.offset(),
                        length: record.length(),
                    });
                }
                debug!(
                    "extending fragment of {} at offset {}: {} -> {} bytes",
                    self.header.id(),
                    record.offset(),
                    held.get().length(),
                    record.length()
                );
                held.insert(record);
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
        }

        let before = self.cached_bytes;
        self.recompute();
        let grew = self.cached_bytes > before;
        if grew {
            self.last_new_data = now;
        }
        Ok(grew)
    }

    fn recompute(&mut self) {
        let mut coverage = RangeSet::new();
        let mut watermark = 0_u32;
        let mut contiguous = true;
        self.next_expected = 0;
        self.missing.clear();
        for fragment in self.fragments.values() {
            coverage.insert_range(fragment.range());
            if fragment.offset() > watermark {
                contiguous = false;
                if self.requirements.reliable {
                    self.missing
                        .push(ByteRange::new(watermark, fragment.offset()));
                }
            }
            watermark = watermark.max(fragment.end());
            if contiguous {
                self.next_expected = watermark;
            }
        }
        self.cached_bytes = u32::try_from(coverage.covered()).unwrap_or(u32::MAX);
    }

    /// Classify coverage, honouring a pending metadata prefix.
    #[must_use]
    pub fn completeness(&self) -> Completeness {
        completeness::classify(
            self.fragments.values(),
            self.header.total_length(),
            self.pending_metadata_length(),
            self.cached_bytes,
        )
    }

    /// Copy the covered prefix of `length` bytes into one buffer.
    ///
    /// # Errors
    ///
    /// Propagates [`ReassemblyError::MissingFragment`] from the copy.
    pub fn reassemble(&self, length: u32) -> Result<Vec<u8>, ReassemblyError> {
        completeness::reassemble(self.header.id(), self.fragments.values(), length)
    }

    fn pending_metadata_length(&self) -> Option<u32> {
        (self.header.has_metadata_part() && !self.metadata_delivered)
            .then_some(self.header.metadata_length())
    }

    /// Header describing the complete message.
    #[must_use]
    pub fn header(&self) -> &MessageHeader { &self.header }

    #[must_use]
    pub fn id(&self) -> &MessageId { self.header.id() }

    #[must_use]
    pub const fn requirements(&self) -> Requirements { self.requirements }

    #[must_use]
    pub fn fragment_count(&self) -> usize { self.fragments.len() }

    /// Held fragments in ascending offset order.
    pub fn fragments(&self) -> impl Iterator<Item = &FragmentRecord> { self.fragments.values() }

    /// Union of held bytes.
    #[must_use]
    pub const fn cached_bytes(&self) -> u32 { self.cached_bytes }

    /// Known gaps between held fragments. The tail after the last fragment
    /// is not included, and the list stays empty for best-effort records.
    #[must_use]
    pub fn missing_ranges(&self) -> &[ByteRange] { &self.missing }

    /// End of the contiguous coverage starting at offset zero.
    #[must_use]
    pub const fn next_expected(&self) -> u32 { self.next_expected }

    /// Range from the contiguous watermark to the end of the message.
    #[must_use]
    pub fn tail_range(&self) -> Option<ByteRange> {
        (self.next_expected < self.header.total_length())
            .then(|| ByteRange::new(self.next_expected, self.header.total_length()))
    }

    /// Whether a fragment with exactly this offset and length is held.
    #[must_use]
    pub fn holds_fragment(&self, offset: u32, length: u32) -> bool {
        self.fragments
            .get(&offset)
            .is_some_and(|held| held.length() == length)
    }

    /// Whether every byte of `range` is held.
    #[must_use]
    pub fn covers(&self, range: ByteRange) -> bool {
        let mut coverage = RangeSet::new();
        for fragment in self.fragments.values() {
            coverage.insert_range(fragment.range());
        }
        coverage.contains_range(range)
    }

    #[must_use]
    pub const fn requested(&self) -> u32 { self.requested }

    #[must_use]
    pub const fn last_request(&self) -> Option<Instant> { self.last_request }

    #[must_use]
    pub const fn last_new_data(&self) -> Instant { self.last_new_data }

    /// Record that missing parts were requested at `now`.
    pub fn mark_requested(&mut self, now: Instant) {
        self.requested = self.requested.saturating_add(1);
        self.last_request = Some(now);
    }

    #[must_use]
    pub const fn metadata_delivered(&self) -> bool { self.metadata_delivered }

    pub fn mark_metadata_delivered(&mut self) { self.metadata_delivered = true; }

    /// Attach or merge the details of an application pull request.
    pub fn attach_request_details(&mut self, details: RequestDetails) {
        match &mut self.request_details {
            Some(held) => held.merge(details),
            None => self.request_details = Some(details),
        }
    }

    #[must_use]
    pub fn request_details(&self) -> Option<&RequestDetails> { self.request_details.as_ref() }

    /// Consume the record, returning any attached request details.
    #[must_use]
    pub fn into_request_details(self) -> Option<RequestDetails> { self.request_details }
}
