//! Builder for [`Reassembler`].

use std::sync::{Arc, Mutex};

use rand::{SeedableRng, rngs::StdRng};

use super::{BuildError, EngineState, Inner, Reassembler, deliver::Outbox};
use crate::{
    collab::{DeliverySink, LocalNode, MessageCache, Transport},
    config::ReassemblerConfig,
    fragment::ReassemblyIndex,
    request::{PendingRequests, RequestScheduler},
    subscription::SubscriptionTable,
};

/// Collects configuration and collaborators for a [`Reassembler`].
///
/// Every collaborator is required.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use dissemination::{MemoryCache, ReassemblerConfig, reassembler::ReassemblerBuilder};
/// # fn collaborators() -> (
/// #     Arc<dyn dissemination::Transport>,
/// #     Arc<dyn dissemination::LocalNode>,
/// #     Arc<dyn dissemination::DeliverySink>,
/// # ) { unimplemented!() }
///
/// let (transport, node, sink) = collaborators();
/// let reassembler = ReassemblerBuilder::new()
///     .config(ReassemblerConfig::default())
///     .transport(transport)
///     .cache(Arc::new(MemoryCache::new()))
///     .local_node(node)
///     .sink(sink)
///     .seed(7)
///     .build()
///     .expect("every collaborator supplied");
/// # let _ = reassembler;
/// ```
#[derive(Default)]
pub struct ReassemblerBuilder {
    config: ReassemblerConfig,
    transport: Option<Arc<dyn Transport>>,
    cache: Option<Arc<dyn MessageCache>>,
    node: Option<Arc<dyn LocalNode>>,
    sink: Option<Arc<dyn DeliverySink>>,
    seed: Option<u64>,
}

impl ReassemblerBuilder {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn config(mut self, config: ReassemblerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn MessageCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn local_node(mut self, node: Arc<dyn LocalNode>) -> Self {
        self.node = Some(node);
        self
    }

    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn DeliverySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Seed the generator behind request probabilities and jitter.
    ///
    /// Without a seed the generator is seeded from the operating system.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Validate the configuration and assemble the engine.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::MissingCollaborator`] if a collaborator was not
    /// supplied and [`BuildError::Config`] if the configuration is invalid.
    pub fn build(self) -> Result<Reassembler, BuildError> {
        self.config.validate()?;
        let transport = self
            .transport
            .ok_or(BuildError::MissingCollaborator("transport"))?;
        let cache = self.cache.ok_or(BuildError::MissingCollaborator("cache"))?;
        let node = self
            .node
            .ok_or(BuildError::MissingCollaborator("local node"))?;
        let sink = self.sink.ok_or(BuildError::MissingCollaborator("sink"))?;
        let rng = self
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);

        let state = EngineState {
            index: ReassemblyIndex::new(),
            scheduler: RequestScheduler::new(self.config.default_request_probability),
            pending: PendingRequests::new(),
            request_limit: self.config.request_limit,
            new_peer: false,
            rng,
        };
        Ok(Reassembler {
            inner: Arc::new(Inner {
                subscriptions: SubscriptionTable::new(&self.config),
                config: self.config,
                transport,
                cache,
                node,
                sink,
                outbox: Outbox::default(),
                state: Mutex::new(state),
            }),
        })
    }
}
