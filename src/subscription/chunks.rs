use std::collections::{BTreeSet, HashMap};

use crate::message::{ChunkId, MessageId, SenderKey};

/// Chunk ids already delivered, per (group, sender, sequence id).
#[derive(Debug, Default)]
pub struct ReceivedChunks {
    delivered: HashMap<(SenderKey, u32), BTreeSet<ChunkId>>,
}

impl ReceivedChunks {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Record delivery of the chunk named by `id`.
    ///
    /// Returns `false` if the chunk had been delivered before.
    pub fn insert(&mut self, id: &MessageId) -> bool {
        self.delivered
            .entry((id.sender_key(), id.seq()))
            .or_default()
            .insert(id.chunk())
    }

    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.delivered
            .get(&(id.sender_key(), id.seq()))
            .is_some_and(|chunks| chunks.contains(&id.chunk()))
    }

    /// Chunks of one object delivered so far.
    #[must_use]
    pub fn delivered(&self, sender: &SenderKey, seq: u32) -> Vec<ChunkId> {
        self.delivered
            .get(&(sender.clone(), seq))
            .map(|chunks| chunks.iter().copied().collect())
            .unwrap_or_default()
    }
}
