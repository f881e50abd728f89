//! Memory tier with least-recently-used eviction
//!
//! Entries live in a slab. Their recency order is a circular list threaded
//! through `links`, with slot 0 as the sentinel: `links[0].next` is the most
//! recently used entry and `links[0].prev` the next eviction victim.

use std::collections::HashMap;
use std::hash::Hash;

use ahash::RandomState;

const SENTINEL: usize = 0;

#[derive(Debug, Clone, Copy)]
struct Link {
    prev: usize,
    next: usize,
}

impl Link {
    const LOOSE: Link = Link {
        prev: SENTINEL,
        next: SENTINEL,
    };
}

/// Fixed-capacity map that evicts its least recently used entry
pub struct LruCache<K, V> {
    index: HashMap<K, usize, RandomState>,
    links: Vec<Link>,
    slots: Vec<Option<(K, V)>>,
    vacant: Vec<usize>,
    capacity: usize,
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Empty tier; a zero capacity is raised to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut links = Vec::with_capacity(capacity + 1);
        links.push(Link::LOOSE);
        let mut slots = Vec::with_capacity(capacity + 1);
        slots.push(None);

        Self {
            index: HashMap::with_capacity_and_hasher(capacity, RandomState::new()),
            links,
            slots,
            vacant: Vec::new(),
            capacity,
        }
    }

    /// Value for `key`, which becomes the most recently used
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let slot = *self.index.get(key)?;
        self.touch(slot);
        self.slots[slot].as_mut().map(|(_, value)| value)
    }

    /// Insert or replace; returns the entry evicted to make room
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&slot) = self.index.get(&key) {
            if let Some(entry) = self.slots[slot].as_mut() {
                entry.1 = value;
            }
            self.touch(slot);
            return None;
        }

        let evicted = if self.index.len() >= self.capacity {
            self.pop_oldest()
        } else {
            None
        };

        let slot = self.vacant.pop().unwrap_or_else(|| {
            self.links.push(Link::LOOSE);
            self.slots.push(None);
            self.slots.len() - 1
        });
        self.slots[slot] = Some((key.clone(), value));
        self.attach_front(slot);
        self.index.insert(key, slot);
        evicted
    }

    /// Drop `key`, returning its value
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.index.remove(key)?;
        self.release(slot).map(|(_, value)| value)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the tier holds nothing
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Entries held before eviction starts
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.index.clear();
        self.links.truncate(1);
        self.links[SENTINEL] = Link::LOOSE;
        self.slots.truncate(1);
        self.vacant.clear();
    }

    fn pop_oldest(&mut self) -> Option<(K, V)> {
        let slot = self.links[SENTINEL].prev;
        if slot == SENTINEL {
            return None;
        }
        let (key, value) = self.release(slot)?;
        self.index.remove(&key);
        Some((key, value))
    }

    fn release(&mut self, slot: usize) -> Option<(K, V)> {
        self.detach(slot);
        self.vacant.push(slot);
        self.slots[slot].take()
    }

    fn touch(&mut self, slot: usize) {
        if self.links[SENTINEL].next != slot {
            self.detach(slot);
            self.attach_front(slot);
        }
    }

    fn attach_front(&mut self, slot: usize) {
        let first = self.links[SENTINEL].next;
        self.links[slot] = Link {
            prev: SENTINEL,
            next: first,
        };
        self.links[first].prev = slot;
        self.links[SENTINEL].next = slot;
    }

    fn detach(&mut self, slot: usize) {
        let Link { prev, next } = self.links[slot];
        self.links[prev].next = next;
        self.links[next].prev = prev;
        self.links[slot] = Link::LOOSE;
    }
}
