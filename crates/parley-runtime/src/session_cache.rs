//! Per-chat in-memory timeline cache.
//!
//! Bounded LRU keyed by chat id. Readers take snapshot clones; only the
//! turn orchestrator for a given chat mutates its entry, so no per-entry
//! locking is needed beyond the map mutex.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use tracing::debug;

use parley_ledger::{LedgerStore, MessageRow, TimelineMessage, ToolCallRow};

/// Default number of chats kept resident.
pub const DEFAULT_CAPACITY: usize = 64;

struct CacheInner {
    capacity: usize,
    entries: HashMap<String, Vec<TimelineMessage>>,
    /// Recency order, least recently used at the front.
    order: VecDeque<String>,
}

impl CacheInner {
    fn touch(&mut self, chat_id: &str) {
        if let Some(pos) = self.order.iter().position(|id| id == chat_id) {
            let _ = self.order.remove(pos);
        }
        self.order.push_back(chat_id.to_string());
    }

    fn insert(&mut self, chat_id: &str, timeline: Vec<TimelineMessage>) {
        if !self.entries.contains_key(chat_id) && self.entries.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                debug!(chat_id = %evicted, "evicting least recently used chat");
                let _ = self.entries.remove(&evicted);
            }
        }
        let _ = self.entries.insert(chat_id.to_string(), timeline);
        self.touch(chat_id);
    }

    fn remove(&mut self, chat_id: &str) -> bool {
        if let Some(pos) = self.order.iter().position(|id| id == chat_id) {
            let _ = self.order.remove(pos);
        }
        self.entries.remove(chat_id).is_some()
    }
}

/// Bounded LRU session cache.
pub struct SessionCache {
    inner: Mutex<CacheInner>,
}

impl SessionCache {
    /// Create a cache holding at most `capacity` chats.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                capacity: capacity.max(1),
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Create a cache with [`DEFAULT_CAPACITY`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Number of resident chats.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache holds no chats.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a chat is resident.
    #[must_use]
    pub fn contains(&self, chat_id: &str) -> bool {
        self.inner.lock().entries.contains_key(chat_id)
    }

    /// Snapshot of a chat's timeline, if resident. Refreshes recency.
    #[must_use]
    pub fn get(&self, chat_id: &str) -> Option<Vec<TimelineMessage>> {
        let mut inner = self.inner.lock();
        let snapshot = inner.entries.get(chat_id).cloned()?;
        inner.touch(chat_id);
        Some(snapshot)
    }

    /// Populate the entry from the ledger if not already resident.
    pub fn ensure_loaded(
        &self,
        store: &LedgerStore,
        chat_id: &str,
    ) -> Result<(), parley_ledger::LedgerError> {
        if self.contains(chat_id) {
            let _ = self.get(chat_id);
            return Ok(());
        }
        let timeline = store.timeline(chat_id)?;
        self.inner.lock().insert(chat_id, timeline);
        Ok(())
    }

    /// Replace a chat's entry outright.
    pub fn insert(&self, chat_id: &str, timeline: Vec<TimelineMessage>) {
        self.inner.lock().insert(chat_id, timeline);
    }

    /// Append a message to a resident entry. No-op on a cache miss.
    pub fn append(&self, chat_id: &str, message: TimelineMessage) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(chat_id) {
            entry.push(message);
            inner.touch(chat_id);
        }
    }

    /// Update a message in place by id, appending it if absent.
    /// Preserves nested tool calls and attachments on update.
    pub fn upsert_message(&self, chat_id: &str, message: MessageRow) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(chat_id) {
            if let Some(existing) = entry.iter_mut().find(|m| m.message.id == message.id) {
                existing.message = message;
            } else {
                entry.push(TimelineMessage::bare(message));
            }
            inner.touch(chat_id);
        }
    }

    /// Record a freshly attached tool call under its host message.
    pub fn attach_tool_call(&self, chat_id: &str, host: &MessageRow, call: ToolCallRow) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(chat_id) {
            if let Some(existing) = entry.iter_mut().find(|m| m.message.id == host.id) {
                existing.message = host.clone();
                existing.tool_calls.push(call);
            } else {
                entry.push(TimelineMessage {
                    message: host.clone(),
                    tool_calls: vec![call],
                    attachments: Vec::new(),
                });
            }
            inner.touch(chat_id);
        }
    }

    /// Replace a tool call row after resolution.
    pub fn update_tool_call(&self, chat_id: &str, call: ToolCallRow) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(chat_id)
            && let Some(host) = entry
                .iter_mut()
                .find(|m| m.message.id == call.message_id)
        {
            if let Some(existing) = host.tool_calls.iter_mut().find(|c| c.id == call.id) {
                *existing = call;
            } else {
                host.tool_calls.push(call);
            }
            inner.touch(chat_id);
        }
    }

    /// Drop a chat from the cache. Returns whether it was resident.
    pub fn evict(&self, chat_id: &str) -> bool {
        self.inner.lock().remove(chat_id)
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new()
    }
}
