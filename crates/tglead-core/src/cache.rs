//! Per-run memo of profile lookups, keyed by sender id.

use std::collections::{HashMap, VecDeque};

use crate::domain::UserProfile;

pub const DEFAULT_CAPACITY: usize = 50;

/// Bounded profile cache with insertion-order eviction.
///
/// When full, inserting a new key evicts the oldest *inserted* key. Reads and
/// overwrites do not refresh an entry's position (this is not an LRU).
#[derive(Debug)]
pub struct ProfileCache {
    capacity: usize,
    entries: HashMap<String, UserProfile>,
    order: VecDeque<String>,
}

impl Default for ProfileCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ProfileCache {
    /// `capacity` is clamped to at least one entry.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, sender_id: &str) -> Option<&UserProfile> {
        self.entries.get(sender_id)
    }

    pub fn contains(&self, sender_id: &str) -> bool {
        self.entries.contains_key(sender_id)
    }

    /// Insert or overwrite a profile. Returns the evicted sender id, if any.
    pub fn insert(&mut self, sender_id: impl Into<String>, profile: UserProfile) -> Option<String> {
        let sender_id = sender_id.into();
        if let Some(slot) = self.entries.get_mut(&sender_id) {
            *slot = profile;
            return None;
        }

        let mut evicted = None;
        if self.entries.len() >= self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.entries.remove(&old);
                evicted = Some(old);
            }
        }

        self.order.push_back(sender_id.clone());
        self.entries.insert(sender_id, profile);
        evicted
    }
}
