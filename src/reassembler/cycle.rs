//! The periodic request cycle and immediate pull requests.

use std::{io, time::Instant};

use log::{debug, warn};

use super::{EngineState, Reassembler, deliver::Handoff};
use crate::{
    backoff,
    fragment::Requirements,
    message::MessageId,
    metrics,
    range::ByteRange,
    request::{
        ChunkRange,
        DataRequest,
        Priority,
        RequestError,
        RequestScheduler,
        RequestedRanges,
    },
};

/// Summary of one request cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// The cycle did nothing because the incoming backlog was too long.
    pub skipped_backlog: bool,
    /// In-flight records dropped because they can no longer be delivered.
    pub pruned: usize,
    /// Partially received messages queued for fragment requests.
    pub fragment_requests: usize,
    /// Whole messages queued because nothing of them is held.
    pub message_requests: usize,
    /// Queued whole-message requests answered from the cache instead.
    pub satisfied_from_cache: usize,
    /// Messages delivered during the cycle.
    pub delivered: usize,
    /// Requests handed to the transport.
    pub requests_sent: usize,
    /// Encoded bytes handed to the transport.
    pub bytes_sent: usize,
}

/// Outcome of broadcasting a batch of requests.
#[derive(Debug, Default)]
struct Broadcast {
    sent: usize,
    bytes: usize,
    failure: Option<io::Error>,
}

impl Reassembler {
    /// Run one request cycle using the current time.
    ///
    /// # Errors
    ///
    /// See [`Reassembler::run_request_cycle_at`].
    pub fn run_request_cycle(&self) -> Result<CycleReport, RequestError> {
        self.run_request_cycle_at(Instant::now())
    }

    /// Scan for missing data, queue requests for it and broadcast them.
    ///
    /// Broadcast failures are logged and counted but do not fail the cycle.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Encode`] if a request cannot be encoded.
    pub fn run_request_cycle_at(&self, now: Instant) -> Result<CycleReport, RequestError> {
        let inner = &self.inner;
        let backlog = inner.transport.incoming_queue_len();
        if backlog >= inner.config.incoming_queue_threshold {
            debug!("skipping request cycle: {backlog} fragments waiting");
            return Ok(CycleReport {
                skipped_backlog: true,
                ..CycleReport::default()
            });
        }

        let mut report = CycleReport::default();
        let mut handoffs = Vec::new();
        let drained = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            for id in state.pending.expire(now) {
                debug!("pull request for {id} expired");
            }
            report.pruned = self.prune(state);
            let new_peer = std::mem::take(&mut state.new_peer);
            report.fragment_requests = self.queue_fragment_requests(state, now, new_peer);

            let gaps = self.release(|| {
                let scan = inner
                    .subscriptions
                    .missing_messages(now, state.request_limit, new_peer, |id| {
                        state.index.contains(id) || state.pending.contains(id)
                    });
                (scan.missing, scan.released)
            });
            report.message_requests = gaps.len();
            for missing in gaps {
                state
                    .scheduler
                    .add_message_request(missing.id, missing.requirements);
            }
            let awaited: Vec<MessageId> = state
                .pending
                .ids()
                .filter(|id| !state.index.contains(id))
                .cloned()
                .collect();
            for id in awaited {
                state
                    .scheduler
                    .add_message_request(id, Requirements::new(false, true));
                report.message_requests += 1;
            }

            report.satisfied_from_cache = self.load_cached_fragments(state, now, &mut handoffs);

            let template = self.request_template();
            let max_size = inner.transport.max_request_size();
            state
                .scheduler
                .drain_requests(&template, max_size, &mut state.rng)
        };

        report.delivered = self.hand_off(handoffs, now);
        let requests = drained?;
        let broadcast = self.broadcast_all(&requests)?;
        if let Some(err) = broadcast.failure {
            warn!("request cycle could not send every request: {err}");
        }
        report.requests_sent = broadcast.sent;
        report.bytes_sent = broadcast.bytes;
        Ok(report)
    }

    /// Drop records of messages that can no longer be delivered.
    fn prune(&self, state: &mut EngineState) -> usize {
        let inner = &self.inner;
        let pruned = state.index.retain(|record| {
            inner.subscriptions.is_relevant(record.id())
                || inner.node.is_in_history(record.header())
        });
        for id in &pruned {
            debug!("pruned {id}: no longer deliverable");
            state.scheduler.remove(id);
        }
        pruned.len()
    }

    /// Queue fragment requests for every reliable record whose back-off has
    /// elapsed.
    fn queue_fragment_requests(&self, state: &mut EngineState, now: Instant, new_peer: bool) -> usize {
        let config = &self.inner.config;
        let limit = state.request_limit;
        let mut queued = 0;
        for record in state.index.iter_mut() {
            if !record.requirements().reliable || !limit.allows(record.requested()) {
                continue;
            }
            let quiet = now.saturating_duration_since(record.last_new_data());
            if !new_peer && let Some(last) = record.last_request() {
                let wait = backoff::request_timeout(
                    config.exponential_backoff,
                    config.missing_fragment_timeout,
                    quiet,
                );
                if now < last + wait {
                    continue;
                }
            }

            let ranges: Vec<ByteRange> = match record.tail_range() {
                Some(tail) if quiet >= config.missing_tail_timeout => vec![tail],
                _ => record.missing_ranges().to_vec(),
            };
            if ranges.is_empty() {
                continue;
            }
            state
                .scheduler
                .add_fragment_request(record.id().clone(), record.requirements(), &ranges);
            record.mark_requested(now);
            queued += 1;
        }
        queued
    }

    /// Try to complete queued whole-message requests from the cache.
    fn load_cached_fragments(
        &self,
        state: &mut EngineState,
        now: Instant,
        handoffs: &mut Vec<Handoff>,
    ) -> usize {
        let mut satisfied = 0;
        for id in state.scheduler.whole_message_ids() {
            let cached = self.inner.cache.fragments(&id);
            if cached.is_empty() {
                continue;
            }
            for fragment in cached {
                if fragment.header().id() != &id {
                    warn!("cache returned a fragment of {} for {id}", fragment.header().id());
                    continue;
                }
                let admission = match self.admit(state, fragment.header(), false) {
                    Ok(admission) => admission,
                    Err(reason) => {
                        debug!("cached fragment of {id} not admitted: {reason:?}");
                        break;
                    }
                };
                match self.accept(state, fragment, admission, false, now) {
                    Ok((_, Some(handoff))) => handoffs.push(handoff),
                    Ok((_, None)) => {}
                    Err(err) => debug!("cached fragment of {id} not usable: {err}"),
                }
            }
            if state.index.contains(&id) || !state.scheduler.contains(&id) {
                state.scheduler.remove(&id);
                satisfied += 1;
            }
        }
        satisfied
    }

    fn request_template(&self) -> DataRequest {
        let node = &self.inner.node;
        DataRequest::new(node.node_id(), node.active_neighbors(), node.session_id())
    }

    /// Request whole messages right away, bypassing the cycle.
    ///
    /// Returns how many requests were broadcast.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] if a request cannot be encoded or the
    /// transport refuses one.
    pub fn send_request(
        &self,
        group: &str,
        sender: &str,
        seqs: impl IntoIterator<Item = u32>,
    ) -> Result<usize, RequestError> {
        let mut scheduler = RequestScheduler::new(100.0);
        {
            let state = self.lock_state();
            for seq in seqs {
                let id = MessageId::new(group, sender, seq);
                if state.index.contains(&id) || self.inner.cache.has_complete(&id) {
                    continue;
                }
                scheduler.add_message_request(id, Requirements::new(false, true));
            }
        }
        self.send_now(scheduler)
    }

    /// Request chunks of one object right away, bypassing the cycle.
    ///
    /// # Errors
    ///
    /// See [`Reassembler::send_request`].
    pub fn send_chunk_request(
        &self,
        group: &str,
        sender: &str,
        seq: u32,
        chunks: &[ChunkRange],
    ) -> Result<usize, RequestError> {
        let mut scheduler = RequestScheduler::new(100.0);
        let wanted: Vec<ChunkRange> = chunks
            .iter()
            .copied()
            .filter(|range| range.first().is_defined())
            .collect();
        if !wanted.is_empty() {
            scheduler.add(
                MessageId::new(group, sender, seq),
                RequestedRanges::Chunks(wanted),
                Priority::Reliable,
            );
        }
        self.send_now(scheduler)
    }

    fn send_now(&self, mut scheduler: RequestScheduler) -> Result<usize, RequestError> {
        if scheduler.is_empty() {
            return Ok(0);
        }
        let template = self.request_template();
        let max_size = self.inner.transport.max_request_size();
        let requests = {
            let mut state = self.lock_state();
            scheduler.drain_requests(&template, max_size, &mut state.rng)?
        };
        let broadcast = self.broadcast_all(&requests)?;
        match broadcast.failure {
            Some(err) => Err(err.into()),
            None => Ok(broadcast.sent),
        }
    }

    fn broadcast_all(&self, requests: &[DataRequest]) -> Result<Broadcast, RequestError> {
        let transport = &self.inner.transport;
        let interfaces = transport.target_interfaces(self.inner.config.receive_rate_threshold);
        let mut outcome = Broadcast::default();
        for request in requests {
            let bytes = request.encoded_len()?;
            match transport.broadcast(request, interfaces.as_deref()) {
                Ok(()) => {
                    metrics::inc_requests(bytes);
                    outcome.sent += 1;
                    outcome.bytes += bytes;
                }
                Err(err) => {
                    warn!("failed to broadcast request of {bytes} bytes: {err}");
                    metrics::inc_errors();
                    outcome.failure.get_or_insert(err);
                }
            }
        }
        Ok(outcome)
    }
}
