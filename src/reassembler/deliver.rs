//! Admission of fragments and hand-off of completed messages.

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError, TryLockError},
    time::Instant,
};

use bytes::Bytes;
use log::{debug, error, warn};

use super::{DropReason, EngineState, FragmentOutcome, Reassembler};
use crate::{
    delivery::{Delivery, DeliveryKind},
    fragment::{Completeness, FragmentRecord, InFlightMessage, ReassemblyError, Requirements},
    message::{Message, MessageHeader, MessageId},
    metrics,
    subscription::Discipline,
};

/// How an admitted fragment's message is to be treated.
#[derive(Clone, Copy, Debug)]
pub(super) struct Admission {
    requirements: Requirements,
    in_history: bool,
}

/// Deliveries released by the subscription table but not yet handed to the
/// sink.
///
/// Releases are queued while `queue` is locked, so the queue keeps the order
/// the subscription table released them in. Only the thread holding
/// `draining` feeds the sink.
#[derive(Debug, Default)]
pub(super) struct Outbox {
    queue: Mutex<VecDeque<Delivery>>,
    draining: Mutex<()>,
}

impl Outbox {
    fn queue(&self) -> MutexGuard<'_, VecDeque<Delivery>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A completed message on its way to the subscription table.
#[derive(Debug)]
pub(super) struct Handoff {
    delivery: Delivery,
    discipline: Discipline,
    in_history: bool,
}

impl Reassembler {
    /// Decide whether a fragment may touch the index and under which
    /// delivery contract.
    pub(super) fn admit(
        &self,
        state: &EngineState,
        header: &MessageHeader,
        is_overheard: bool,
    ) -> Result<Admission, DropReason> {
        let inner = &self.inner;
        let id = header.id();
        let subscribed = inner.node.is_subscribed(id.group(), header.tag());
        let requested = state.pending.contains(id);
        let opportunistic = inner.config.request_opportunistic;
        let targeted_chunk = id.is_chunk() && !is_overheard;
        if !subscribed && !opportunistic && !targeted_chunk && !requested {
            return Err(DropReason::NotSubscribed);
        }

        let requirements = if subscribed && !id.is_chunk() {
            let reliable = inner.node.requires_reliability(id.group(), header.tag())
                || (is_overheard && opportunistic);
            Requirements::new(
                inner.node.requires_sequencing(id.group(), header.tag()),
                reliable,
            )
        } else {
            Requirements::new(false, true)
        };

        let in_history = inner.node.is_in_history(header);
        if !in_history && !inner.subscriptions.is_relevant(id) {
            return Err(DropReason::Stale);
        }
        Ok(Admission {
            requirements,
            in_history,
        })
    }

    /// Store an admitted fragment and complete its message if possible.
    ///
    /// A record created for this fragment is removed again if the fragment
    /// is rejected, so errors never leave partial state behind.
    pub(super) fn accept(
        &self,
        state: &mut EngineState,
        message: Message,
        admission: Admission,
        is_overheard: bool,
        now: Instant,
    ) -> Result<(FragmentOutcome, Option<Handoff>), ReassemblyError> {
        let (header, payload) = message.into_parts();
        let id = header.id().clone();
        let pending = &state.pending;
        let record = state.index.get_or_insert_with(&id, || {
            let mut record = InFlightMessage::new(&header, admission.requirements, now);
            if let Some(details) = pending.get(&id) {
                record.attach_request_details(details.clone());
            }
            record
        });

        let fragment = FragmentRecord::new(header.fragment_offset(), id.is_chunk(), payload);
        if let Err(err) = record.insert(&header, fragment, now) {
            warn!("rejected fragment of {id}: {err}");
            if record.fragment_count() == 0 {
                state.index.remove(&id);
            }
            return Err(err);
        }

        match record.completeness() {
            Completeness::Complete => {
                self.complete(state, &id, DeliveryKind::Full, admission, is_overheard)
            }
            Completeness::MetadataComplete if !record.metadata_delivered() => {
                self.complete(state, &id, DeliveryKind::Metadata, admission, is_overheard)
            }
            Completeness::MetadataComplete | Completeness::Incomplete | Completeness::Dummy => {
                Ok((FragmentOutcome::Stored, None))
            }
        }
    }

    fn complete(
        &self,
        state: &mut EngineState,
        id: &MessageId,
        kind: DeliveryKind,
        admission: Admission,
        is_overheard: bool,
    ) -> Result<(FragmentOutcome, Option<Handoff>), ReassemblyError> {
        let Some(record) = state.index.get_mut(id) else {
            return Ok((FragmentOutcome::Stored, None));
        };
        let header = record.header().clone();

        let length = match kind {
            DeliveryKind::Full => header.total_length(),
            DeliveryKind::Metadata => header.metadata_length(),
        };
        let buffer = record
            .reassemble(length)
            .inspect_err(|err| error!("failed to reassemble {id}: {err}"))?;
        if usize::try_from(length).ok() != Some(buffer.len()) {
            error!(
                "reassembled {id} to {} bytes, expected {length}",
                buffer.len()
            );
            return Err(ReassemblyError::LengthMismatch {
                id: id.clone(),
                expected: length,
                actual: buffer.len(),
            });
        }
        let payload = Bytes::from(buffer);

        let (outcome, delivery) = match kind {
            DeliveryKind::Metadata => {
                record.mark_metadata_delivered();
                let details = record.request_details().cloned();
                debug!("metadata of {id} complete");
                let delivery = Delivery::new(header, payload, kind).with_request_details(details);
                (FragmentOutcome::MetadataDelivered, delivery)
            }
            DeliveryKind::Full => {
                let mut details = state
                    .index
                    .remove(id)
                    .and_then(InFlightMessage::into_request_details);
                if let Some(pending) = state.pending.message_arrived(id) {
                    match details.as_mut() {
                        Some(held) => held.merge(pending),
                        None => details = Some(pending),
                    }
                }
                state.scheduler.remove(id);
                self.inner.cache.store_complete(&header, payload.clone());
                debug!("{id} complete");
                let delivery =
                    Delivery::new(header.as_complete(), payload, kind).with_request_details(details);
                (FragmentOutcome::Delivered, delivery)
            }
        };

        if is_overheard {
            debug!("{id} was overheard; cached without local delivery");
            let outcome = match outcome {
                FragmentOutcome::Delivered => FragmentOutcome::Cached,
                other => other,
            };
            return Ok((outcome, None));
        }
        Ok((
            outcome,
            Some(Handoff {
                delivery,
                discipline: Discipline::from_requirements(admission.requirements),
                in_history: admission.in_history,
            }),
        ))
    }

    /// Pass completed messages through ordering and on to the sink.
    ///
    /// Must be called without the engine lock held.
    pub(super) fn hand_off(&self, handoffs: Vec<Handoff>, now: Instant) -> usize {
        self.release(|| {
            let released = handoffs
                .into_iter()
                .flat_map(|handoff| {
                    self.inner.subscriptions.message_arrived(
                        handoff.delivery,
                        handoff.discipline,
                        handoff.in_history,
                        now,
                    )
                })
                .collect();
            ((), released)
        });
        self.drain_outbox()
    }

    /// Run `release` with the outbox locked and queue the deliveries it
    /// returns.
    ///
    /// Every call into the subscription table that can release messages goes
    /// through here.
    pub(super) fn release<T>(&self, release: impl FnOnce() -> (T, Vec<Delivery>)) -> T {
        let mut queue = self.inner.outbox.queue();
        let (value, released) = release();
        queue.extend(released);
        value
    }

    /// Feed queued deliveries to the sink unless another thread already is.
    ///
    /// Returns how many deliveries this call handed over.
    pub(super) fn drain_outbox(&self) -> usize {
        let outbox = &self.inner.outbox;
        let mut delivered = 0;
        loop {
            let turn = match outbox.draining.try_lock() {
                Ok(turn) => turn,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => break,
            };
            loop {
                let next = outbox.queue().pop_front();
                let Some(delivery) = next else { break };
                self.inner.sink.deliver(delivery);
                delivered += 1;
            }
            drop(turn);
            // A release queued after the last pop may have seen `draining`
            // still held.
            if outbox.queue().is_empty() {
                break;
            }
        }
        metrics::inc_delivered(delivered);
        delivered
    }
}
