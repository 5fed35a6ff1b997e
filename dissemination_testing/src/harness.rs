//! An engine wired to recording collaborators.

use std::{sync::Arc, time::Instant};

use dissemination::{
    FragmentOutcome,
    MemoryCache,
    Message,
    Reassembler,
    ReassemblerConfig,
    ReassemblyError,
};

use crate::collab::{RecordingSink, RecordingTransport, StaticNode};

/// A [`Reassembler`] plus handles on every collaborator it talks to.
#[derive(Debug)]
pub struct Harness {
    pub reassembler: Reassembler,
    pub transport: Arc<RecordingTransport>,
    pub node: Arc<StaticNode>,
    pub sink: Arc<RecordingSink>,
    pub cache: Arc<MemoryCache>,
}

impl Default for Harness {
    fn default() -> Self { Self::new() }
}

impl Harness {
    /// Engine with [`Harness::config`] and a node subscribed to group `G`
    /// with sequenced reliable delivery.
    #[must_use]
    pub fn new() -> Self { Self::with(Self::config(), StaticNode::sequenced_reliable()) }

    /// Default configuration for a subscriber listening since every stream
    /// began at sequence id 0.
    #[must_use]
    pub fn config() -> ReassemblerConfig {
        ReassemblerConfig {
            initial_sequence_id: Some(0),
            ..ReassemblerConfig::default()
        }
    }

    #[must_use]
    pub fn with(config: ReassemblerConfig, node: StaticNode) -> Self {
        Self::with_transport(config, node, RecordingTransport::new())
    }

    /// # Panics
    ///
    /// Panics if `config` is invalid.
    #[must_use]
    pub fn with_transport(
        config: ReassemblerConfig,
        node: StaticNode,
        transport: RecordingTransport,
    ) -> Self {
        let transport = Arc::new(transport);
        let node = Arc::new(node);
        let sink = Arc::new(RecordingSink::new());
        let cache = Arc::new(MemoryCache::new());
        let reassembler = Reassembler::builder()
            .config(config)
            .transport(transport.clone())
            .cache(cache.clone())
            .local_node(node.clone())
            .sink(sink.clone())
            .seed(42)
            .build()
            .expect("valid test configuration");
        Self {
            reassembler,
            transport,
            node,
            sink,
            cache,
        }
    }

    /// Hand a fragment addressed to this node to the engine.
    ///
    /// # Errors
    ///
    /// Returns whatever the engine rejects the fragment with.
    pub fn feed(&self, message: Message) -> Result<FragmentOutcome, ReassemblyError> {
        self.reassembler.fragment_arrived(message, false)
    }

    /// As [`Harness::feed`], at an explicit time.
    ///
    /// # Errors
    ///
    /// Returns whatever the engine rejects the fragment with.
    pub fn feed_at(&self, message: Message, now: Instant) -> Result<FragmentOutcome, ReassemblyError> {
        self.reassembler.fragment_arrived_at(message, false, now)
    }

    /// Hand a fragment addressed to another node to the engine.
    ///
    /// # Errors
    ///
    /// Returns whatever the engine rejects the fragment with.
    pub fn overhear(&self, message: Message) -> Result<FragmentOutcome, ReassemblyError> {
        self.reassembler.fragment_arrived(message, true)
    }
}
