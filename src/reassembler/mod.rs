//! The reassembly engine.
//!
//! [`Reassembler`] accepts every fragment the transport hears, keeps one
//! [`InFlightMessage`](crate::fragment::InFlightMessage) per incomplete
//! message, and hands completed messages to the cache and to the
//! [`SubscriptionTable`] for ordered delivery. A [`RequestWorker`] thread
//! periodically scans for missing data and broadcasts retransmission
//! requests.
//!
//! Locks are always taken in the order engine state, outbox, subscription
//! table. Released messages are queued in the outbox in release order and
//! fed to the sink by one thread at a time, with none of those locks held.
//! A sink may call back into the engine, but deliveries it causes are made
//! after it returns.

mod builder;
mod cycle;
mod deliver;
mod error;
mod worker;

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::Instant,
};

pub use builder::ReassemblerBuilder;
pub use cycle::CycleReport;
pub use error::BuildError;
use log::{debug, error};
use rand::{Rng, SeedableRng, rngs::StdRng};
pub use worker::RequestWorker;

use self::deliver::Outbox;

use crate::{
    collab::{DeliverySink, LocalNode, MessageCache, Transport},
    config::{ConfigError, ReassemblerConfig, RequestLimit},
    fragment::{ReassemblyError, ReassemblyIndex},
    message::{ChunkId, Message, MessageHeader, MessageId},
    metrics::{self, FragmentDisposition},
    range::ByteRange,
    request::{PendingRequests, Priority, RequestDetails, RequestScheduler},
    subscription::SubscriptionTable,
};

/// Why a fragment was dropped without error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Nobody subscribes to the group and overheard traffic is not kept.
    NotSubscribed,
    /// Its message can no longer be delivered.
    Stale,
    /// Its message is already complete in the cache.
    AlreadyComplete,
    /// Its message declares a length of zero.
    DummyMessage,
}

/// What accepting a fragment led to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FragmentOutcome {
    Dropped(DropReason),
    /// Held while more fragments are awaited.
    Stored,
    /// Completed the metadata prefix, which was handed on.
    MetadataDelivered,
    /// Completed the message, which was cached and handed on.
    Delivered,
    /// Completed a message overheard for another node; cached only.
    Cached,
}

#[derive(Debug)]
struct EngineState {
    index: ReassemblyIndex,
    scheduler: RequestScheduler,
    pending: PendingRequests,
    request_limit: RequestLimit,
    new_peer: bool,
    rng: StdRng,
}

struct Inner {
    config: ReassemblerConfig,
    transport: Arc<dyn Transport>,
    cache: Arc<dyn MessageCache>,
    node: Arc<dyn LocalNode>,
    sink: Arc<dyn DeliverySink>,
    subscriptions: SubscriptionTable,
    outbox: Outbox,
    state: Mutex<EngineState>,
}

/// Shared handle to one reassembly engine.
///
/// Cloning is cheap; every clone drives the same state.
#[derive(Clone)]
pub struct Reassembler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Reassembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reassembler")
            .field("config", &self.inner.config)
            .field("in_flight", &self.in_flight_len())
            .finish_non_exhaustive()
    }
}

impl Reassembler {
    /// Start configuring an engine.
    #[must_use]
    pub fn builder() -> ReassemblerBuilder { ReassemblerBuilder::new() }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn config(&self) -> &ReassemblerConfig { &self.inner.config }

    /// Ordering state shared with this engine.
    #[must_use]
    pub fn subscriptions(&self) -> &SubscriptionTable { &self.inner.subscriptions }

    /// Process a fragment using the current time.
    ///
    /// # Errors
    ///
    /// See [`Reassembler::fragment_arrived_at`].
    pub fn fragment_arrived(
        &self,
        message: Message,
        is_overheard: bool,
    ) -> Result<FragmentOutcome, ReassemblyError> {
        self.fragment_arrived_at(message, is_overheard, Instant::now())
    }

    /// Process a fragment using an explicit clock reading.
    ///
    /// `is_overheard` marks traffic addressed to another node. Completed
    /// overheard messages are cached but not delivered locally.
    ///
    /// # Errors
    ///
    /// Returns [`ReassemblyError`] for malformed or duplicate fragments and
    /// for messages whose reassembly fails. Existing state is left untouched
    /// in every error case.
    pub fn fragment_arrived_at(
        &self,
        message: Message,
        is_overheard: bool,
        now: Instant,
    ) -> Result<FragmentOutcome, ReassemblyError> {
        let result = self.process(message, is_overheard, now);
        let disposition = match &result {
            Ok(FragmentOutcome::Dropped(_)) => FragmentDisposition::Dropped,
            Ok(FragmentOutcome::Stored) => FragmentDisposition::Stored,
            Ok(_) => FragmentDisposition::Completed,
            Err(_) => {
                metrics::inc_errors();
                FragmentDisposition::Rejected
            }
        };
        metrics::inc_fragments(disposition);
        result
    }

    fn process(
        &self,
        message: Message,
        is_overheard: bool,
        now: Instant,
    ) -> Result<FragmentOutcome, ReassemblyError> {
        let header = message.header();
        validate(header, message.payload().len())?;
        if header.total_length() == 0 {
            log::warn!("dummy message {}: declared length is zero", header.id());
            return Ok(FragmentOutcome::Dropped(DropReason::DummyMessage));
        }

        let (outcome, handoff) = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            let id = header.id();
            if !state.index.contains(id) && self.inner.cache.has_complete(id) {
                debug!("dropping fragment of {id}: already complete");
                return Ok(FragmentOutcome::Dropped(DropReason::AlreadyComplete));
            }
            let admission = match self.admit(state, header, is_overheard) {
                Ok(admission) => admission,
                Err(reason) => {
                    debug!("dropping fragment of {id}: {reason:?}");
                    return Ok(FragmentOutcome::Dropped(reason));
                }
            };
            self.accept(state, message, admission, is_overheard, now)?
        };
        if let Some(handoff) = handoff {
            self.hand_off(vec![handoff], now);
        }
        Ok(outcome)
    }

    /// Whether an in-flight record exists for `id`.
    #[must_use]
    pub fn contains_message(&self, id: &MessageId) -> bool { self.lock_state().index.contains(id) }

    /// Whether the exact fragment described by `header` is held.
    #[must_use]
    pub fn contains_fragment(&self, header: &MessageHeader) -> bool {
        self.lock_state()
            .index
            .get(header.id())
            .is_some_and(|record| {
                record.holds_fragment(header.fragment_offset(), header.fragment_length())
            })
    }

    /// Whether every byte of `range` of message `id` is held.
    #[must_use]
    pub fn has_fragment(&self, id: &MessageId, range: ByteRange) -> bool {
        self.lock_state()
            .index
            .get(id)
            .is_some_and(|record| record.covers(range))
    }

    /// Whether `id` is being reassembled or awaited by a pull request.
    #[must_use]
    pub fn is_being_reassembled(&self, id: &MessageId) -> bool {
        let state = self.lock_state();
        state.index.contains(id) || state.pending.contains(id)
    }

    /// Missing byte ranges recorded for `id`.
    #[must_use]
    pub fn missing_ranges(&self, id: &MessageId) -> Option<Vec<ByteRange>> {
        self.lock_state()
            .index
            .get(id)
            .map(|record| record.missing_ranges().to_vec())
    }

    /// Number of in-flight records.
    #[must_use]
    pub fn in_flight_len(&self) -> usize { self.lock_state().index.len() }

    /// Note that a new neighbour appeared; the next cycle ignores back-off.
    pub fn new_peer(&self) { self.lock_state().new_peer = true; }

    /// Set the per-message request cap; `-1` removes it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidRequestLimit`] for values below `-1`.
    pub fn set_request_limit(&self, raw: i64) -> Result<(), ConfigError> {
        let limit = RequestLimit::from_raw(raw)?;
        self.lock_state().request_limit = limit;
        Ok(())
    }

    #[must_use]
    pub fn request_limit(&self) -> RequestLimit { self.lock_state().request_limit }

    /// Override the percent chance that requests of `priority` are sent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidProbability`] outside `[0, 100]`.
    pub fn set_request_probability(&self, priority: Priority, percent: f32) -> Result<(), ConfigError> {
        self.lock_state().scheduler.set_probability(priority, percent)
    }

    #[must_use]
    pub fn request_probability(&self, priority: Priority) -> f32 {
        self.lock_state().scheduler.probability(priority)
    }

    /// Register an application pull request for whole messages.
    ///
    /// Returns how many ids were newly registered. Ids already complete in
    /// the cache are not registered.
    pub fn add_request(
        &self,
        details: &RequestDetails,
        group: &str,
        sender: &str,
        seqs: impl IntoIterator<Item = u32>,
    ) -> usize {
        let ids = seqs
            .into_iter()
            .map(|seq| MessageId::new(group, sender, seq));
        self.register_requests(details, ids)
    }

    /// Register an application pull request for chunks of one object.
    pub fn add_chunk_request(
        &self,
        details: &RequestDetails,
        group: &str,
        sender: &str,
        seq: u32,
        chunks: impl IntoIterator<Item = ChunkId>,
    ) -> usize {
        let base = MessageId::new(group, sender, seq);
        let ids = chunks
            .into_iter()
            .filter(|chunk| chunk.is_defined())
            .map(|chunk| base.clone().with_chunk(chunk));
        self.register_requests(details, ids)
    }

    fn register_requests(
        &self,
        details: &RequestDetails,
        ids: impl Iterator<Item = MessageId>,
    ) -> usize {
        let mut state = self.lock_state();
        let mut added = 0;
        for id in ids {
            if self.inner.cache.has_complete(&id) {
                continue;
            }
            if let Some(record) = state.index.get_mut(&id) {
                record.attach_request_details(details.clone());
            }
            if state.pending.add(id, details.clone()) {
                added += 1;
            }
        }
        added
    }

    /// Give up on `id`, delivering whatever it was holding back.
    pub fn skip_message(&self, id: &MessageId, now: Instant) -> usize {
        self.release(|| ((), self.inner.subscriptions.skip_message(id, now)));
        self.drain_outbox()
    }

    /// Spawn the request worker with a generator seeded from this engine's.
    ///
    /// # Errors
    ///
    /// Returns any error raised while spawning the thread.
    pub fn start(&self) -> std::io::Result<RequestWorker> {
        let seed = self.lock_state().rng.r#gen::<u64>();
        RequestWorker::spawn(self.clone(), StdRng::seed_from_u64(seed))
    }

    /// Stop `worker` and discard every in-flight record.
    ///
    /// # Errors
    ///
    /// Returns the worker thread's panic payload if it panicked.
    pub fn shutdown(&self, worker: RequestWorker) -> thread::Result<()> {
        worker.request_termination();
        let joined = worker.join();
        let mut state = self.lock_state();
        let discarded = state.index.len();
        state.index = ReassemblyIndex::new();
        state.pending = PendingRequests::new();
        debug!("reassembler shut down; discarded {discarded} in-flight messages");
        joined
    }
}

fn validate(header: &MessageHeader, payload_len: usize) -> Result<(), ReassemblyError> {
    let id = header.id();
    if usize::try_from(header.fragment_length()).ok() != Some(payload_len) {
        return Err(ReassemblyError::PayloadLengthMismatch {
            id: id.clone(),
            declared: header.fragment_length(),
            actual: payload_len,
        });
    }
    if header.is_chunk() && header.metadata_length() > 0 {
        error!("chunk {id} declares a metadata prefix of {} bytes", header.metadata_length());
        return Err(ReassemblyError::ChunkWithMetadata { id: id.clone() });
    }
    if header.total_length() == 0 {
        return Ok(());
    }
    if header.fragment_length() == 0 {
        return Err(ReassemblyError::EmptyFragment {
            id: id.clone(),
            offset: header.fragment_offset(),
        });
    }
    if header.fragment_offset() >= header.total_length() {
        return Err(ReassemblyError::FragmentOutOfRange {
            id: id.clone(),
            offset: header.fragment_offset(),
            total: header.total_length(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests;
