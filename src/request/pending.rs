//! Outstanding application pull requests.
//!
//! An entry stays registered until the message it names is delivered or its
//! deadline passes. While registered, the id is requested as a whole message
//! on every scheduling cycle.

use std::{collections::BTreeMap, time::Instant};

use log::debug;

use super::RequestDetails;
use crate::message::MessageId;

/// Table of pull requests keyed by message id.
#[derive(Debug, Default)]
pub struct PendingRequests {
    entries: BTreeMap<MessageId, RequestDetails>,
}

impl PendingRequests {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register interest in `id`, merging with an existing entry.
    ///
    /// Returns `true` when the id was not pending before.
    pub fn add(&mut self, id: MessageId, details: RequestDetails) -> bool {
        if let Some(held) = self.entries.get_mut(&id) {
            held.merge(details);
            return false;
        }
        self.entries.insert(id, details);
        true
    }

    /// Resolve the entry for a delivered message, returning its details.
    pub fn message_arrived(&mut self, id: &MessageId) -> Option<RequestDetails> {
        self.entries.remove(id)
    }

    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool { self.entries.contains_key(id) }

    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<&RequestDetails> { self.entries.get(id) }

    /// Drop entries whose deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Vec<MessageId> {
        let mut expired = Vec::new();
        self.entries.retain(|id, details| {
            let keep = !details.is_expired(now);
            if !keep {
                debug!("pull request for {id} expired");
                expired.push(id.clone());
            }
            keep
        });
        expired
    }

    pub fn ids(&self) -> impl Iterator<Item = &MessageId> { self.entries.keys() }

    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn arrival_resolves_and_returns_merged_details() {
        let mut pending = PendingRequests::new();
        let id = MessageId::new("G", "S", 4);
        assert!(pending.add(id.clone(), RequestDetails::new("q1", 1)));
        assert!(!pending.add(id.clone(), RequestDetails::new("q1", 2)));

        let details = pending.message_arrived(&id).expect("registered");
        assert_eq!(details.clients().len(), 2);
        assert!(!pending.contains(&id));
        assert!(pending.message_arrived(&id).is_none());
    }

    #[test]
    fn expired_entries_are_dropped() {
        let now = Instant::now();
        let mut pending = PendingRequests::new();
        let soon = MessageId::new("G", "S", 1);
        let later = MessageId::new("G", "S", 2);
        pending.add(
            soon.clone(),
            RequestDetails::new("q", 1).expiring_at(now + Duration::from_secs(1)),
        );
        pending.add(later.clone(), RequestDetails::new("q", 1));

        assert_eq!(pending.expire(now + Duration::from_secs(2)), vec![soon]);
        assert_eq!(pending.ids().collect::<Vec<_>>(), vec![&later]);
    }
}
