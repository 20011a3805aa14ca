//! In-memory ring-buffer history.

use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;

use agora_protocol::Envelope;

use crate::channel::ChannelKey;
use crate::store::{HistoryStore, SequenceId, StoreError, StoredEnvelope};

/// Default per-channel ring capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

struct Ring {
    entries: VecDeque<StoredEnvelope>,
    next_seq: SequenceId,
}

/// Bounded per-channel history kept in process memory.
///
/// Each channel holds a fixed-capacity ring; appending to a full ring evicts
/// the oldest entry. Sequence numbers keep increasing across evictions.
/// Always available; contents are lost on restart.
pub struct MemoryStore {
    channels: DashMap<ChannelKey, Ring>,
    capacity: usize,
}

impl MemoryStore {
    /// Create a store with the given per-channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn append(
        &self,
        key: &ChannelKey,
        envelope: &Envelope,
    ) -> Result<SequenceId, StoreError> {
        let mut ring = self.channels.entry(key.clone()).or_insert_with(|| Ring {
            entries: VecDeque::new(),
            next_seq: 1,
        });

        let seq = ring.next_seq;
        ring.next_seq += 1;
        ring.entries.push_back(StoredEnvelope {
            seq,
            envelope: envelope.clone(),
        });
        if ring.entries.len() > self.capacity {
            ring.entries.pop_front();
        }

        Ok(seq)
    }

    async fn history(
        &self,
        key: &ChannelKey,
        limit: usize,
        before: Option<SequenceId>,
    ) -> Result<Vec<StoredEnvelope>, StoreError> {
        let Some(ring) = self.channels.get(key) else {
            return Ok(Vec::new());
        };

        Ok(ring
            .entries
            .iter()
            .rev()
            .filter(|entry| before.map_or(true, |bound| entry.seq < bound))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn purge(&self, key: &ChannelKey) -> Result<(), StoreError> {
        self.channels.remove(key);
        Ok(())
    }

    fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key() -> ChannelKey {
        ChannelKey::new("science", "general")
    }

    fn envelope(n: usize) -> Envelope {
        Envelope::message("science", "general", json!({"n": n}))
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_sequences() {
        let store = MemoryStore::default();

        assert_eq!(store.append(&key(), &envelope(1)).await.unwrap(), 1);
        assert_eq!(store.append(&key(), &envelope(2)).await.unwrap(), 2);
        assert_eq!(store.append(&key(), &envelope(3)).await.unwrap(), 3);

        // Channels are independent sequences.
        let other = ChannelKey::new("chat", "public");
        assert_eq!(store.append(&other, &envelope(4)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_history_newest_first() {
        let store = MemoryStore::default();
        for n in 1..=5 {
            store.append(&key(), &envelope(n)).await.unwrap();
        }

        let entries = store.history(&key(), 3, None).await.unwrap();
        let seqs: Vec<SequenceId> = entries.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![5, 4, 3]);
    }

    #[tokio::test]
    async fn test_history_before_pages_backwards() {
        let store = MemoryStore::default();
        for n in 1..=5 {
            store.append(&key(), &envelope(n)).await.unwrap();
        }

        let page = store.history(&key(), 2, Some(4)).await.unwrap();
        let seqs: Vec<SequenceId> = page.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![3, 2]);
    }

    #[tokio::test]
    async fn test_ring_evicts_oldest() {
        let store = MemoryStore::new(3);
        for n in 1..=5 {
            store.append(&key(), &envelope(n)).await.unwrap();
        }

        let entries = store.history(&key(), 10, None).await.unwrap();
        let seqs: Vec<SequenceId> = entries.iter().map(|e| e.seq).collect();
        // Sequences survive eviction; only the oldest entries are gone.
        assert_eq!(seqs, vec![5, 4, 3]);
    }

    #[tokio::test]
    async fn test_unknown_channel_has_empty_history() {
        let store = MemoryStore::default();
        assert!(store.history(&key(), 10, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purge_clears_channel() {
        let store = MemoryStore::default();
        store.append(&key(), &envelope(1)).await.unwrap();

        store.purge(&key()).await.unwrap();
        assert!(store.history(&key(), 10, None).await.unwrap().is_empty());

        // Sequences restart after a purge; the channel is brand new.
        assert_eq!(store.append(&key(), &envelope(2)).await.unwrap(), 1);
    }
}
