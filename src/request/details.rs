use std::{collections::BTreeSet, time::Instant};

/// Application pull request that a delivery is answering.
///
/// Several clients may ask for the same message under one query; their ids
/// are merged so that a single delivery can be routed to all of them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestDetails {
    query_id: String,
    clients: BTreeSet<u16>,
    expires_at: Option<Instant>,
}

impl RequestDetails {
    /// Details for `client` asking under `query_id`, never expiring.
    #[must_use]
    pub fn new(query_id: impl Into<String>, client: u16) -> Self {
        Self {
            query_id: query_id.into(),
            clients: BTreeSet::from([client]),
            expires_at: None,
        }
    }

    /// Stop serving the request at `deadline`.
    #[must_use]
    pub fn expiring_at(mut self, deadline: Instant) -> Self {
        self.expires_at = Some(deadline);
        self
    }

    #[must_use]
    pub fn query_id(&self) -> &str { &self.query_id }

    #[must_use]
    pub fn clients(&self) -> &BTreeSet<u16> { &self.clients }

    #[must_use]
    pub const fn expires_at(&self) -> Option<Instant> { self.expires_at }

    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool { self.expires_at.is_some_and(|at| now >= at) }

    /// Fold another request into this one.
    ///
    /// Clients are unioned; the later deadline wins and no deadline beats
    /// any deadline.
    pub fn merge(&mut self, other: Self) {
        self.clients.extend(other.clients);
        self.expires_at = match (self.expires_at, other.expires_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            _ => None,
        };
    }
}
