use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::clock::Clock;

/// Process-local idempotency window. Best effort only: the durable
/// uniqueness constraint on inbound event ids remains the authoritative
/// replay defense, this guard just short-circuits the common case cheaply.
pub struct DedupeGuard {
    clock: Arc<dyn Clock>,
    capacity: usize,
    inner: Mutex<Inner>,
}

struct Inner {
    seen: HashMap<String, DateTime<Utc>>,
    // Insertion order for oldest-first eviction. Entries go stale when a key
    // is re-marked; they are skipped on pop by comparing timestamps.
    order: VecDeque<(String, DateTime<Utc>)>,
    calls_since_cleanup: usize,
}

// Expired-entry purging is amortized over this many calls rather than done
// per call.
const CLEANUP_EVERY_CALLS: usize = 64;

impl DedupeGuard {
    pub fn new(clock: Arc<dyn Clock>, capacity: usize) -> Self {
        Self {
            clock,
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                seen: HashMap::new(),
                order: VecDeque::new(),
                calls_since_cleanup: 0,
            }),
        }
    }

    /// Returns true when `key` was already marked within the last `ttl`.
    /// A first sighting (or a sighting after the window elapsed) marks the
    /// key and returns false.
    pub fn seen_recently(&self, key: &str, ttl: Duration) -> bool {
        let now = self.clock.now();
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };

        inner.calls_since_cleanup += 1;
        if inner.calls_since_cleanup >= CLEANUP_EVERY_CALLS {
            inner.calls_since_cleanup = 0;
            inner.purge_expired(now, ttl);
        }

        if let Some(seen_at) = inner.seen.get(key) {
            if now - *seen_at < ttl {
                return true;
            }
        }

        inner.seen.insert(key.to_string(), now);
        inner.order.push_back((key.to_string(), now));
        while inner.seen.len() > self.capacity {
            inner.evict_oldest();
        }
        false
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(inner) => inner.seen.len(),
            Err(poisoned) => poisoned.into_inner().seen.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Inner {
    fn purge_expired(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.seen.retain(|_, seen_at| now - *seen_at < ttl);
        let seen = &self.seen;
        self.order.retain(|(key, seen_at)| seen.get(key) == Some(seen_at));
    }

    fn evict_oldest(&mut self) {
        while let Some((key, seen_at)) = self.order.pop_front() {
            if self.seen.get(&key) == Some(&seen_at) {
                self.seen.remove(&key);
                return;
            }
        }
    }
}
