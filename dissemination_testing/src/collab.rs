//! Recording implementations of the engine's collaborator traits.

use std::{
    collections::HashSet,
    io,
    sync::{
        Mutex,
        MutexGuard,
        PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use dissemination::{
    DataRequest,
    Delivery,
    DeliveryKind,
    DeliverySink,
    LocalNode,
    MessageHeader,
    MessageId,
    Transport,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> { mutex.lock().unwrap_or_else(PoisonError::into_inner) }

/// Transport that records every broadcast request.
#[derive(Debug)]
pub struct RecordingTransport {
    sent: Mutex<Vec<DataRequest>>,
    interfaces: Mutex<Vec<Option<Vec<String>>>>,
    backlog: AtomicUsize,
    max_request_size: AtomicUsize,
    fail: AtomicBool,
}

impl Default for RecordingTransport {
    fn default() -> Self { Self::with_max_request_size(1_400) }
}

impl RecordingTransport {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Transport whose link carries requests of at most `max` encoded bytes.
    #[must_use]
    pub fn with_max_request_size(max: usize) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            interfaces: Mutex::new(Vec::new()),
            backlog: AtomicUsize::new(0),
            max_request_size: AtomicUsize::new(max),
            fail: AtomicBool::new(false),
        }
    }

    /// Pretend `len` fragments are waiting to be processed.
    pub fn set_backlog(&self, len: usize) { self.backlog.store(len, Ordering::SeqCst); }

    /// Make every subsequent broadcast fail.
    pub fn fail_broadcasts(&self, fail: bool) { self.fail.store(fail, Ordering::SeqCst); }

    /// Requests broadcast so far, leaving them recorded.
    #[must_use]
    pub fn sent(&self) -> Vec<DataRequest> { lock(&self.sent).clone() }

    /// Take and clear the recorded requests.
    pub fn take(&self) -> Vec<DataRequest> { std::mem::take(&mut *lock(&self.sent)) }

    /// Interfaces passed with each broadcast.
    #[must_use]
    pub fn interfaces(&self) -> Vec<Option<Vec<String>>> { lock(&self.interfaces).clone() }

    /// Every message id named in the recorded requests, in order.
    #[must_use]
    pub fn requested_ids(&self) -> Vec<MessageId> {
        lock(&self.sent)
            .iter()
            .flat_map(|request| request.entries.iter().map(|entry| entry.id.clone()))
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn incoming_queue_len(&self) -> usize { self.backlog.load(Ordering::SeqCst) }

    fn max_request_size(&self) -> usize { self.max_request_size.load(Ordering::SeqCst) }

    fn target_interfaces(&self, _receive_rate_threshold: f32) -> Option<Vec<String>> {
        Some(vec!["wlan0".to_owned()])
    }

    fn broadcast(&self, request: &DataRequest, interfaces: Option<&[String]>) -> io::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link down"));
        }
        lock(&self.interfaces).push(interfaces.map(<[String]>::to_vec));
        lock(&self.sent).push(request.clone());
        Ok(())
    }
}

/// Local node with a fixed subscription set.
#[derive(Debug)]
pub struct StaticNode {
    node_id: String,
    groups: Mutex<HashSet<String>>,
    sequenced: bool,
    reliable: bool,
    history: Mutex<HashSet<MessageId>>,
    neighbors: u16,
}

impl StaticNode {
    /// Node subscribed to `groups` with the given delivery contract.
    #[must_use]
    pub fn new(groups: &[&str], sequenced: bool, reliable: bool) -> Self {
        Self {
            node_id: "node-1".to_owned(),
            groups: Mutex::new(groups.iter().map(|g| (*g).to_owned()).collect()),
            sequenced,
            reliable,
            history: Mutex::new(HashSet::new()),
            neighbors: 3,
        }
    }

    /// Node subscribed to group `G` with sequenced reliable delivery.
    #[must_use]
    pub fn sequenced_reliable() -> Self { Self::new(&["G"], true, true) }

    pub fn unsubscribe(&self, group: &str) { lock(&self.groups).remove(group); }

    /// Treat `id` as answering an open history request.
    pub fn add_history(&self, id: MessageId) { lock(&self.history).insert(id); }
}

impl LocalNode for StaticNode {
    fn node_id(&self) -> String { self.node_id.clone() }

    fn is_subscribed(&self, group: &str, _tag: u16) -> bool { lock(&self.groups).contains(group) }

    fn requires_sequencing(&self, _group: &str, _tag: u16) -> bool { self.sequenced }

    fn requires_reliability(&self, _group: &str, _tag: u16) -> bool { self.reliable }

    fn is_in_history(&self, header: &MessageHeader) -> bool { lock(&self.history).contains(header.id()) }

    fn active_neighbors(&self) -> u16 { self.neighbors }

    fn session_id(&self) -> Option<String> { Some("session-1".to_owned()) }
}

/// Sink that records every delivery in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<Delivery>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Every delivery so far.
    #[must_use]
    pub fn deliveries(&self) -> Vec<Delivery> { lock(&self.delivered).clone() }

    /// Sequence ids of full deliveries, in delivery order.
    #[must_use]
    pub fn seqs(&self) -> Vec<u32> {
        lock(&self.delivered)
            .iter()
            .filter(|d| d.kind() == DeliveryKind::Full)
            .map(|d| d.id().seq())
            .collect()
    }

    /// Number of metadata deliveries so far.
    #[must_use]
    pub fn metadata_count(&self) -> usize {
        lock(&self.delivered)
            .iter()
            .filter(|d| d.kind() == DeliveryKind::Metadata)
            .count()
    }
}

impl DeliverySink for RecordingSink {
    fn deliver(&self, delivery: Delivery) { lock(&self.delivered).push(delivery); }
}
