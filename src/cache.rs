//! Concurrent in-memory [`MessageCache`].
//!
//! Keys are canonical message id strings. Complete messages and loose
//! fragments live in separate maps so that a complete entry never has to be
//! reassembled again.

use bytes::Bytes;
use dashmap::DashMap;

use crate::{
    collab::MessageCache,
    message::{Message, MessageHeader, MessageId},
};

/// Message cache backed by [`DashMap`].
#[derive(Debug, Default)]
pub struct MemoryCache {
    complete: DashMap<String, Message>,
    fragments: DashMap<String, Vec<Message>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Keep a fragment, for instance one overheard for another node.
    pub fn store_fragment(&self, fragment: Message) {
        let key = fragment.header().id().to_string();
        let mut held = self.fragments.entry(key).or_default();
        let duplicate = held.iter().any(|existing| {
            existing.header().fragment_offset() == fragment.header().fragment_offset()
                && existing.header().fragment_length() == fragment.header().fragment_length()
        });
        if !duplicate {
            held.push(fragment);
        }
    }

    /// Complete message stored under `id`.
    #[must_use]
    pub fn complete(&self, id: &MessageId) -> Option<Message> {
        self.complete
            .get(&id.to_string())
            .map(|entry| entry.value().clone())
    }

    /// Number of complete messages held.
    #[must_use]
    pub fn complete_len(&self) -> usize { self.complete.len() }

    /// Canonical ids of every complete message held.
    #[must_use]
    pub fn complete_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.complete.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

impl MessageCache for MemoryCache {
    fn store_complete(&self, header: &MessageHeader, payload: Bytes) {
        let key = header.id().to_string();
        self.fragments.remove(&key);
        self.complete
            .insert(key, Message::new(header.as_complete(), payload));
    }

    fn has_complete(&self, id: &MessageId) -> bool { self.complete.contains_key(&id.to_string()) }

    fn fragments(&self, id: &MessageId) -> Vec<Message> {
        let key = id.to_string();
        if let Some(message) = self.complete.get(&key) {
            return vec![message.value().clone()];
        }
        self.fragments
            .get(&key)
            .map(|held| held.value().clone())
            .unwrap_or_default()
    }
}
