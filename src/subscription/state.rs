//! Per-sender ordering state for each delivery discipline.
//!
//! The discipline is chosen when the first message from a sender arrives and
//! never changes afterwards. Each variant owns only the fields its contract
//! needs, and every operation matches on the variant explicitly.

use std::{
    collections::{BTreeMap, BTreeSet},
    time::{Duration, Instant},
};

use log::debug;

use crate::{
    backoff,
    config::RequestLimit,
    delivery::Delivery,
    fragment::Requirements,
    range::{ByteRange, RangeSet},
};

/// Upper bound on sequence ids reported missing per sender and cycle.
const MAX_MISSING_PER_CYCLE: usize = 256;

/// How far below the newest id an unsequenced reliable sender tracks gaps.
const MAX_TRACKED_GAP: u32 = 4_096;

/// Delivery contract of a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Discipline {
    SequencedReliable,
    SequencedUnreliable,
    NonSequencedReliable,
    NonSequencedUnreliable,
}

impl Discipline {
    #[must_use]
    pub const fn from_requirements(requirements: Requirements) -> Self {
        match (requirements.sequenced, requirements.reliable) {
            (true, true) => Self::SequencedReliable,
            (true, false) => Self::SequencedUnreliable,
            (false, true) => Self::NonSequencedReliable,
            (false, false) => Self::NonSequencedUnreliable,
        }
    }

    #[must_use]
    pub const fn requirements(self) -> Requirements {
        match self {
            Self::SequencedReliable => Requirements::new(true, true),
            Self::SequencedUnreliable => Requirements::new(true, false),
            Self::NonSequencedReliable => Requirements::new(false, true),
            Self::NonSequencedUnreliable => Requirements::new(false, false),
        }
    }
}

/// Knobs for one gap scan.
#[derive(Clone, Copy, Debug)]
pub(crate) struct GapPolicy {
    pub limit: RequestLimit,
    pub timeout: Duration,
    pub exponential_backoff: bool,
    pub skip_after: Option<Duration>,
    pub new_peer: bool,
}

/// Outcome of one gap scan for one sender.
#[derive(Debug, Default)]
pub(crate) struct GapScan {
    pub missing: Vec<u32>,
    pub released: Vec<Delivery>,
}

#[derive(Debug)]
pub(crate) struct SequencedReliable {
    next_expected: u32,
    buffer: BTreeMap<u32, Delivery>,
    /// Metadata parts of messages ahead of `next_expected`.
    metadata: BTreeMap<u32, Delivery>,
    skipped: BTreeSet<u32>,
    attempts: BTreeMap<u32, u32>,
    gap_since: Option<Instant>,
    last_request: Option<Instant>,
    last_new_data: Instant,
}

#[derive(Debug)]
pub(crate) struct NonSequencedReliable {
    expected: u32,
    highest: Option<u32>,
    missing: BTreeMap<u32, u32>,
    last_request: Option<Instant>,
    last_new_data: Instant,
}

#[derive(Debug)]
pub(crate) enum OrderingState {
    SequencedReliable(SequencedReliable),
    SequencedUnreliable { next_expected: u32 },
    NonSequencedReliable(NonSequencedReliable),
    NonSequencedUnreliable { floor: u32, received: RangeSet },
}

impl OrderingState {
    pub(crate) fn new(discipline: Discipline, initial_seq: u32, now: Instant) -> Self {
        match discipline {
            Discipline::SequencedReliable => Self::SequencedReliable(SequencedReliable {
                next_expected: initial_seq,
                buffer: BTreeMap::new(),
                metadata: BTreeMap::new(),
                skipped: BTreeSet::new(),
                attempts: BTreeMap::new(),
                gap_since: None,
                last_request: None,
                last_new_data: now,
            }),
            Discipline::SequencedUnreliable => Self::SequencedUnreliable {
                next_expected: initial_seq,
            },
            Discipline::NonSequencedReliable => Self::NonSequencedReliable(NonSequencedReliable {
                expected: initial_seq,
                highest: None,
                missing: BTreeMap::new(),
                last_request: None,
                last_new_data: now,
            }),
            Discipline::NonSequencedUnreliable => Self::NonSequencedUnreliable {
                floor: initial_seq,
                received: RangeSet::new(),
            },
        }
    }

    pub(crate) const fn discipline(&self) -> Discipline {
        match self {
            Self::SequencedReliable(_) => Discipline::SequencedReliable,
            Self::SequencedUnreliable { .. } => Discipline::SequencedUnreliable,
            Self::NonSequencedReliable(_) => Discipline::NonSequencedReliable,
            Self::NonSequencedUnreliable { .. } => Discipline::NonSequencedUnreliable,
        }
    }

    /// Lowest sequence id not yet accounted for.
    pub(crate) fn watermark(&self) -> u32 {
        match self {
            Self::SequencedReliable(state) => state.next_expected,
            Self::SequencedUnreliable { next_expected } => *next_expected,
            Self::NonSequencedReliable(state) => state.expected,
            Self::NonSequencedUnreliable { floor, received } => received
                .gaps_within(ByteRange::new(*floor, u32::MAX))
                .first()
                .map_or(u32::MAX, |gap| gap.start()),
        }
    }

    pub(crate) fn is_relevant(&self, seq: u32) -> bool {
        match self {
            Self::SequencedReliable(state) => {
                seq >= state.next_expected && !state.buffer.contains_key(&seq)
            }
            Self::SequencedUnreliable { next_expected } => seq >= *next_expected,
            Self::NonSequencedReliable(state) => {
                seq >= state.expected
                    && (state.highest.is_none_or(|highest| seq > highest)
                        || state.missing.contains_key(&seq))
            }
            Self::NonSequencedUnreliable { received, .. } => !received.contains(seq),
        }
    }

    /// Apply a complete message and return whatever became deliverable.
    pub(crate) fn arrive(&mut self, delivery: Delivery, now: Instant) -> Vec<Delivery> {
        let seq = delivery.id().seq();
        let mut out = Vec::new();
        match self {
            Self::SequencedReliable(state) => {
                state.last_new_data = now;
                if seq < state.next_expected {
                    debug!("dropping {}: already past it", delivery.id());
                } else if seq > state.next_expected {
                    state.skipped.remove(&seq);
                    state.buffer.entry(seq).or_insert(delivery);
                    state.gap_since.get_or_insert(now);
                } else {
                    out.push(delivery);
                    state.advance_past_expected();
                    state.flush(&mut out);
                    state.restart_gap_clock(now);
                }
            }
            Self::SequencedUnreliable { next_expected } => {
                if seq >= *next_expected {
                    *next_expected = seq.saturating_add(1);
                    out.push(delivery);
                } else {
                    debug!("dropping {}: older than {next_expected}", delivery.id());
                }
            }
            Self::NonSequencedReliable(state) => {
                state.last_new_data = now;
                if state.accept(seq) {
                    out.push(delivery);
                } else {
                    debug!("dropping {}: already delivered", delivery.id());
                }
            }
            Self::NonSequencedUnreliable { received, .. } => {
                if received.insert(seq) {
                    out.push(delivery);
                } else {
                    debug!("dropping {}: already delivered", delivery.id());
                }
            }
        }
        out
    }

    /// Apply the metadata part of a message whose body is still incomplete.
    ///
    /// Metadata never moves the watermark. Sequenced reliable streams hold it
    /// back until every predecessor has been delivered or skipped.
    pub(crate) fn arrive_metadata(&mut self, delivery: Delivery) -> Vec<Delivery> {
        let seq = delivery.id().seq();
        if let Self::SequencedReliable(state) = self {
            if seq == state.next_expected {
                return vec![delivery];
            }
            if seq > state.next_expected && !state.buffer.contains_key(&seq) {
                state.metadata.entry(seq).or_insert(delivery);
                return Vec::new();
            }
        } else if self.is_relevant(seq) {
            return vec![delivery];
        }
        debug!("dropping metadata of {}: not deliverable", delivery.id());
        Vec::new()
    }

    /// Give up on `seq`, releasing anything it was holding back.
    pub(crate) fn skip(&mut self, seq: u32, now: Instant) -> Vec<Delivery> {
        let mut out = Vec::new();
        match self {
            Self::SequencedReliable(state) => {
                if seq >= state.next_expected && !state.buffer.contains_key(&seq) {
                    state.skipped.insert(seq);
                    state.flush(&mut out);
                    state.restart_gap_clock(now);
                }
            }
            Self::SequencedUnreliable { .. } => {}
            Self::NonSequencedReliable(state) => {
                state.missing.remove(&seq);
                state.recompute_expected();
            }
            Self::NonSequencedUnreliable { received, .. } => {
                received.insert(seq);
            }
        }
        out
    }

    /// Report missing sequence ids worth requesting now.
    ///
    /// `in_progress` reports ids already being reassembled; their missing
    /// fragments are requested by the fragment path instead.
    pub(crate) fn scan_gaps(
        &mut self,
        policy: GapPolicy,
        now: Instant,
        in_progress: impl Fn(u32) -> bool,
    ) -> GapScan {
        match self {
            Self::SequencedReliable(state) => state.scan_gaps(policy, now, in_progress),
            Self::NonSequencedReliable(state) => state.scan_gaps(policy, now, in_progress),
            Self::SequencedUnreliable { .. } | Self::NonSequencedUnreliable { .. } => {
                GapScan::default()
            }
        }
    }
}

fn backing_off(
    policy: GapPolicy,
    last_request: Option<Instant>,
    last_new_data: Instant,
    now: Instant,
) -> bool {
    if policy.new_peer {
        return false;
    }
    let wait = backoff::request_timeout(
        policy.exponential_backoff,
        policy.timeout,
        now.saturating_duration_since(last_new_data),
    );
    last_request.is_some_and(|at| now < at + wait)
}

impl SequencedReliable {
    fn advance_past_expected(&mut self) {
        self.attempts.remove(&self.next_expected);
        self.next_expected = self.next_expected.saturating_add(1);
    }

    /// Deliver buffered successors and pass skipped ids until a hole remains.
    ///
    /// Held metadata of the message at the watermark is released on the way
    /// without advancing past it.
    fn flush(&mut self, out: &mut Vec<Delivery>) {
        loop {
            if let Some(metadata) = self.metadata.remove(&self.next_expected) {
                out.push(metadata);
            }
            if let Some(next) = self.buffer.remove(&self.next_expected) {
                out.push(next);
            } else if !self.skipped.remove(&self.next_expected) {
                break;
            } else {
                debug!("skipped sequence id {}", self.next_expected);
            }
            if self.next_expected == u32::MAX {
                break;
            }
            self.advance_past_expected();
        }
        let floor = self.next_expected;
        self.metadata.retain(|&seq, _| seq >= floor);
        self.skipped.retain(|&seq| seq >= floor);
        self.attempts.retain(|&seq, _| seq >= floor);
    }

    fn restart_gap_clock(&mut self, now: Instant) {
        self.gap_since = (!self.buffer.is_empty()).then_some(now);
    }

    fn scan_gaps(
        &mut self,
        policy: GapPolicy,
        now: Instant,
        in_progress: impl Fn(u32) -> bool,
    ) -> GapScan {
        let mut scan = GapScan::default();
        let held = self.buffer.keys().next_back();
        let Some(&highest) = held.max(self.metadata.keys().next_back()) else {
            return scan;
        };

        if let (Some(after), Some(since)) = (policy.skip_after, self.gap_since)
            && now.saturating_duration_since(since) >= after
        {
            debug!(
                "giving up on sequence id {} after {:?}",
                self.next_expected, after
            );
            self.skipped.insert(self.next_expected);
            self.flush(&mut scan.released);
            self.restart_gap_clock(now);
        }

        if backing_off(policy, self.last_request, self.last_new_data, now) {
            return scan;
        }

        let mut exhausted = false;
        let candidates = (self.next_expected..highest)
            .filter(|seq| !self.buffer.contains_key(seq) && !self.skipped.contains(seq))
            .filter(|&seq| !in_progress(seq))
            .take(MAX_MISSING_PER_CYCLE)
            .collect::<Vec<_>>();
        for seq in candidates {
            let attempts = self.attempts.entry(seq).or_default();
            if policy.limit.allows(*attempts) {
                *attempts += 1;
                scan.missing.push(seq);
            } else {
                debug!("request budget for sequence id {seq} exhausted; skipping it");
                self.skipped.insert(seq);
                exhausted = true;
            }
        }
        if exhausted {
            self.flush(&mut scan.released);
            self.restart_gap_clock(now);
        }
        if !scan.missing.is_empty() {
            self.last_request = Some(now);
        }
        scan
    }
}

impl NonSequencedReliable {
    /// Record arrival of `seq`. Returns `false` for ids already delivered.
    fn accept(&mut self, seq: u32) -> bool {
        if seq < self.expected {
            return false;
        }
        let fresh = if self.missing.remove(&seq).is_some() {
            true
        } else if self.highest.is_none_or(|highest| seq > highest) {
            let next = self
                .highest
                .map_or(self.expected, |highest| highest.saturating_add(1));
            let from = next.max(seq.saturating_sub(MAX_TRACKED_GAP));
            if from > next {
                debug!("not tracking sequence ids {next}..{from}: too far behind {seq}");
                self.missing.retain(|&gap, _| gap >= from);
            }
            for gap in from..seq {
                self.missing.entry(gap).or_insert(0);
            }
            self.highest = Some(seq);
            true
        } else {
            false
        };
        self.recompute_expected();
        fresh
    }

    fn recompute_expected(&mut self) {
        self.expected = match self.missing.keys().next() {
            Some(&lowest) => lowest,
            None => self
                .highest
                .map_or(self.expected, |highest| highest.saturating_add(1).max(self.expected)),
        };
    }

    fn scan_gaps(
        &mut self,
        policy: GapPolicy,
        now: Instant,
        in_progress: impl Fn(u32) -> bool,
    ) -> GapScan {
        let mut scan = GapScan::default();
        if self.missing.is_empty()
            || backing_off(policy, self.last_request, self.last_new_data, now)
        {
            return scan;
        }
        for (&seq, attempts) in &mut self.missing {
            if scan.missing.len() >= MAX_MISSING_PER_CYCLE {
                break;
            }
            if in_progress(seq) || !policy.limit.allows(*attempts) {
                continue;
            }
            *attempts += 1;
            scan.missing.push(seq);
        }
        if !scan.missing.is_empty() {
            self.last_request = Some(now);
        }
        scan
    }
}
