//! Lookup of in-flight messages.
//!
//! Records are stored in one flat map keyed by the full message id, which
//! already encodes (group, sender, sequence id, chunk id).

use std::collections::HashMap;

use super::InFlightMessage;
use crate::message::MessageId;

/// At most one [`InFlightMessage`] per message id.
#[derive(Debug, Default)]
pub struct ReassemblyIndex {
    records: HashMap<MessageId, InFlightMessage>,
}

impl ReassemblyIndex {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<&InFlightMessage> { self.records.get(id) }

    pub fn get_mut(&mut self, id: &MessageId) -> Option<&mut InFlightMessage> {
        self.records.get_mut(id)
    }

    /// Return the record for `id`, creating it with `create` when absent.
    pub fn get_or_insert_with(
        &mut self,
        id: &MessageId,
        create: impl FnOnce() -> InFlightMessage,
    ) -> &mut InFlightMessage {
        self.records.entry(id.clone()).or_insert_with(create)
    }

    pub fn remove(&mut self, id: &MessageId) -> Option<InFlightMessage> { self.records.remove(id) }

    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool { self.records.contains_key(id) }

    /// Keep only the records for which `keep` returns `true`.
    ///
    /// Returns the ids of the records that were dropped.
    pub fn retain(&mut self, mut keep: impl FnMut(&InFlightMessage) -> bool) -> Vec<MessageId> {
        let mut dropped = Vec::new();
        self.records.retain(|id, record| {
            let kept = keep(record);
            if !kept {
                dropped.push(id.clone());
            }
            kept
        });
        dropped
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut InFlightMessage> {
        self.records.values_mut()
    }

    #[must_use]
    pub fn len(&self) -> usize { self.records.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.records.is_empty() }
}
