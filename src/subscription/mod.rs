//! Per-sender ordering of complete messages.
//!
//! [`SubscriptionTable`] owns one ordering state per (group, sender) and gates
//! every reassembled message before it reaches the application:
//!
//! - sequenced reliable streams buffer out-of-order messages and release them
//!   strictly in order, skipping ids whose retry or time budget runs out;
//! - sequenced best-effort streams deliver anything newer than the last
//!   delivery and drop the rest;
//! - unsequenced reliable streams deliver immediately and track missing ids;
//! - unsequenced best-effort streams deliver each id once.
//!
//! Chunks of on-demand objects and messages answering a history request
//! bypass ordering altogether.

pub mod chunks;
pub mod state;

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

pub use chunks::ReceivedChunks;
use log::debug;
pub use state::Discipline;
use state::{GapPolicy, OrderingState};

use crate::{
    config::{ReassemblerConfig, RequestLimit},
    delivery::{Delivery, DeliveryKind},
    fragment::Requirements,
    message::{ChunkId, MessageId, SenderKey},
};

/// A whole message that should be requested from the network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MissingMessage {
    pub id: MessageId,
    pub requirements: Requirements,
}

/// Result of a gap scan across every sender.
#[derive(Debug, Default)]
pub struct GapReport {
    /// Messages to request.
    pub missing: Vec<MissingMessage>,
    /// Messages released because a gap in front of them was skipped.
    pub released: Vec<Delivery>,
}

#[derive(Debug, Default)]
struct Tables {
    states: HashMap<SenderKey, OrderingState>,
    chunks: ReceivedChunks,
}

/// Ordering states for every sender seen so far.
#[derive(Debug)]
pub struct SubscriptionTable {
    initial_seq: Option<u32>,
    timeout: Duration,
    exponential_backoff: bool,
    skip_after: Option<Duration>,
    tables: Mutex<Tables>,
}

impl SubscriptionTable {
    #[must_use]
    pub fn new(config: &ReassemblerConfig) -> Self {
        Self {
            initial_seq: config.initial_sequence_id,
            timeout: config.missing_fragment_timeout,
            exponential_backoff: config.exponential_backoff,
            skip_after: config.sequenced_skip_after,
            tables: Mutex::new(Tables::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Gate a complete message and return the deliveries it releases, in
    /// delivery order.
    ///
    /// `discipline` is only consulted the first time a sender is seen. Unless
    /// an initial sequence id is configured, that first message also fixes
    /// where the sender's ordering starts.
    pub fn message_arrived(
        &self,
        delivery: Delivery,
        discipline: Discipline,
        in_history: bool,
        now: Instant,
    ) -> Vec<Delivery> {
        let id = delivery.id().clone();
        let mut tables = self.lock();

        if id.is_chunk() {
            if tables.chunks.insert(&id) {
                return vec![delivery];
            }
            debug!("dropping chunk {id}: already delivered");
            return Vec::new();
        }
        if in_history {
            return vec![delivery];
        }

        let start = self.initial_seq.unwrap_or(id.seq());
        let state = tables
            .states
            .entry(id.sender_key())
            .or_insert_with(|| OrderingState::new(discipline, start, now));
        match delivery.kind() {
            DeliveryKind::Metadata => state.arrive_metadata(delivery),
            DeliveryKind::Full => state.arrive(delivery, now),
        }
    }

    /// Whether data for `id` could still be delivered.
    #[must_use]
    pub fn is_relevant(&self, id: &MessageId) -> bool {
        let tables = self.lock();
        if id.is_chunk() {
            return !tables.chunks.contains(id);
        }
        tables
            .states
            .get(&id.sender_key())
            .is_none_or(|state| state.is_relevant(id.seq()))
    }

    /// Lowest sequence id from `sender` not yet delivered or skipped.
    #[must_use]
    pub fn expected_seq_id(&self, sender: &SenderKey) -> Option<u32> {
        self.lock().states.get(sender).map(OrderingState::watermark)
    }

    /// Discipline selected for `sender`, if it has been seen.
    #[must_use]
    pub fn discipline(&self, sender: &SenderKey) -> Option<Discipline> {
        self.lock().states.get(sender).map(OrderingState::discipline)
    }

    /// Chunks of one object delivered so far.
    #[must_use]
    pub fn delivered_chunks(&self, sender: &SenderKey, seq: u32) -> Vec<ChunkId> {
        self.lock().chunks.delivered(sender, seq)
    }

    /// Give up on `id`, returning any deliveries this unblocks.
    pub fn skip_message(&self, id: &MessageId, now: Instant) -> Vec<Delivery> {
        let mut tables = self.lock();
        match tables.states.get_mut(&id.sender_key()) {
            Some(state) => state.skip(id.seq(), now),
            None => Vec::new(),
        }
    }

    /// Collect whole messages still missing across every sender.
    ///
    /// `in_progress` reports ids that are already being reassembled or
    /// requested by other means. Sequenced reliable senders whose retry or
    /// time budget ran out are advanced past the gap, and the messages this
    /// releases are returned for delivery.
    pub fn missing_messages(
        &self,
        now: Instant,
        limit: RequestLimit,
        new_peer: bool,
        in_progress: impl Fn(&MessageId) -> bool,
    ) -> GapReport {
        let policy = GapPolicy {
            limit,
            timeout: self.timeout,
            exponential_backoff: self.exponential_backoff,
            skip_after: self.skip_after,
            new_peer,
        };
        let mut report = GapReport::default();
        let mut tables = self.lock();
        for (key, state) in &mut tables.states {
            let requirements = state.discipline().requirements();
            let scan = state.scan_gaps(policy, now, |seq| {
                in_progress(&MessageId::new(key.group(), key.sender(), seq))
            });
            report
                .missing
                .extend(scan.missing.into_iter().map(|seq| MissingMessage {
                    id: MessageId::new(key.group(), key.sender(), seq),
                    requirements,
                }));
            report.released.extend(scan.released);
        }
        report
    }
}

#[cfg(test)]
mod tests;
