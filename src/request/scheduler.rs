//! Accumulates missing-data requests for one cycle and packs them into
//! size-bounded [`DataRequest`]s.
//!
//! Entries are deduplicated by message id. At packing time each entry is
//! kept with the probability configured for its priority, higher priorities
//! are packed first, and entries too large for one request are split by range.

use std::collections::HashMap;

use log::warn;
use rand::Rng;

use super::{DataRequest, RequestEntry, RequestError, RequestedRanges};
use crate::{
    config::ConfigError,
    fragment::Requirements,
    message::MessageId,
    range::ByteRange,
};

/// Weight of a request, derived from the delivery contract of its message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Best-effort traffic.
    BestEffort = 1,
    /// Reliable, unordered traffic.
    Reliable = 2,
    /// Reliable traffic that also blocks an ordered stream.
    SequencedReliable = 3,
}

impl Priority {
    pub const ALL: [Self; 3] = [Self::BestEffort, Self::Reliable, Self::SequencedReliable];

    #[must_use]
    pub const fn from_requirements(requirements: Requirements) -> Self {
        match (requirements.sequenced, requirements.reliable) {
            (true, true) => Self::SequencedReliable,
            (false, true) => Self::Reliable,
            _ => Self::BestEffort,
        }
    }

    const fn slot(self) -> usize {
        match self {
            Self::BestEffort => 0,
            Self::Reliable => 1,
            Self::SequencedReliable => 2,
        }
    }
}

/// A request waiting for the next packing pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduledRequest {
    pub id: MessageId,
    pub ranges: RequestedRanges,
    pub priority: Priority,
}

/// Per-cycle request accumulator.
#[derive(Debug)]
pub struct RequestScheduler {
    entries: Vec<ScheduledRequest>,
    positions: HashMap<MessageId, usize>,
    probabilities: [f32; 3],
}

impl RequestScheduler {
    /// Scheduler sending each priority with `default_probability` percent.
    #[must_use]
    pub fn new(default_probability: f32) -> Self {
        Self {
            entries: Vec::new(),
            positions: HashMap::new(),
            probabilities: [default_probability.clamp(0.0, 100.0); 3],
        }
    }

    /// Override the send probability for one priority.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidProbability`] unless `percent` lies in
    /// `[0, 100]`.
    pub fn set_probability(&mut self, priority: Priority, percent: f32) -> Result<(), ConfigError> {
        if !(0.0..=100.0).contains(&percent) {
            return Err(ConfigError::InvalidProbability(percent));
        }
        self.probabilities[priority.slot()] = percent;
        Ok(())
    }

    #[must_use]
    pub const fn probability(&self, priority: Priority) -> f32 {
        self.probabilities[priority.slot()]
    }

    /// Queue `ranges` for `id`, merging with an entry already queued.
    pub fn add(&mut self, id: MessageId, ranges: RequestedRanges, priority: Priority) {
        if ranges.is_empty() {
            return;
        }
        if let Some(&position) = self.positions.get(&id) {
            let held = &mut self.entries[position];
            held.ranges.merge(ranges);
            held.priority = held.priority.max(priority);
            return;
        }
        self.positions.insert(id.clone(), self.entries.len());
        self.entries.push(ScheduledRequest {
            id,
            ranges,
            priority,
        });
    }

    /// Queue missing byte ranges of a partially received message.
    pub fn add_fragment_request(
        &mut self,
        id: MessageId,
        requirements: Requirements,
        ranges: &[ByteRange],
    ) {
        if ranges.is_empty() {
            return;
        }
        self.add(
            id,
            RequestedRanges::Bytes(ranges.to_vec()),
            Priority::from_requirements(requirements),
        );
    }

    /// Queue a request for a message of which nothing is held.
    pub fn add_message_request(&mut self, id: MessageId, requirements: Requirements) {
        self.add(
            id,
            RequestedRanges::WholeMessage,
            Priority::from_requirements(requirements),
        );
    }

    /// Remove the queued entry for `id`.
    pub fn remove(&mut self, id: &MessageId) -> Option<ScheduledRequest> {
        let position = self.positions.remove(id)?;
        let removed = self.entries.remove(position);
        for (index, entry) in self.entries.iter().enumerate().skip(position) {
            self.positions.insert(entry.id.clone(), index);
        }
        Some(removed)
    }

    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool { self.positions.contains_key(id) }

    /// Ids queued as whole-message requests.
    #[must_use]
    pub fn whole_message_ids(&self) -> Vec<MessageId> {
        self.entries
            .iter()
            .filter(|entry| entry.ranges == RequestedRanges::WholeMessage)
            .map(|entry| entry.id.clone())
            .collect()
    }

    #[must_use]
    pub fn entries(&self) -> &[ScheduledRequest] { &self.entries }

    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Drain the queue into requests no larger than `max_size` encoded bytes.
    ///
    /// Every request starts as a copy of `template`. Ranges that cannot fit
    /// even into an otherwise empty request are dropped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Encode`] if a request cannot be encoded.
    pub fn drain_requests<R: Rng>(
        &mut self,
        template: &DataRequest,
        max_size: usize,
        rng: &mut R,
    ) -> Result<Vec<DataRequest>, RequestError> {
        self.positions.clear();
        let mut queued = std::mem::take(&mut self.entries);
        let probabilities = self.probabilities;
        queued.retain(|entry| {
            let percent = probabilities[entry.priority.slot()];
            percent >= 100.0 || (percent > 0.0 && rng.gen_range(0.0..100.0_f32) < percent)
        });
        queued.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut packer = Packer::new(template, max_size);
        for entry in queued {
            if packer.push(&entry.id, entry.ranges.clone())? {
                continue;
            }
            for piece in entry.ranges.split() {
                if !packer.push(&entry.id, piece)? {
                    warn!(
                        "request for {} does not fit in {max_size} bytes; dropped",
                        entry.id
                    );
                }
            }
        }
        Ok(packer.finish())
    }
}

struct Packer<'a> {
    template: &'a DataRequest,
    max_size: usize,
    current: DataRequest,
    done: Vec<DataRequest>,
}

impl<'a> Packer<'a> {
    fn new(template: &'a DataRequest, max_size: usize) -> Self {
        Self {
            template,
            max_size,
            current: template.clone(),
            done: Vec::new(),
        }
    }

    /// Add `ranges` for `id` to the current request, starting a fresh request
    /// once if it does not fit. Returns `false` if it fits in neither.
    fn push(&mut self, id: &MessageId, ranges: RequestedRanges) -> Result<bool, RequestError> {
        if self.try_add(id, ranges.clone())? {
            return Ok(true);
        }
        if self.current.entries.is_empty() {
            return Ok(false);
        }
        let full = std::mem::replace(&mut self.current, self.template.clone());
        self.done.push(full);
        self.try_add(id, ranges)
    }

    fn try_add(&mut self, id: &MessageId, ranges: RequestedRanges) -> Result<bool, RequestError> {
        if let Some(last) = self.current.entries.last_mut()
            && last.id == *id
        {
            let saved = last.ranges.clone();
            last.ranges.merge(ranges);
            if self.current.encoded_len()? <= self.max_size {
                return Ok(true);
            }
            if let Some(last) = self.current.entries.last_mut() {
                last.ranges = saved;
            }
            return Ok(false);
        }
        self.current.entries.push(RequestEntry {
            id: id.clone(),
            ranges,
        });
        if self.current.encoded_len()? <= self.max_size {
            return Ok(true);
        }
        self.current.entries.pop();
        Ok(false)
    }

    fn finish(mut self) -> Vec<DataRequest> {
        if !self.current.entries.is_empty() {
            self.done.push(self.current);
        }
        self.done
    }
}
