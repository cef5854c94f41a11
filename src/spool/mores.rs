//! Pagination cache for withheld reply chunks.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Key: who asked, and where. The requester is identified by `ident@host`
/// so a nick change does not orphan their pending pages.
type Key = (String, String);

struct Entry {
    /// Withheld chunks, stored newest-first so popping from the end yields
    /// the oldest chunk.
    chunks: Vec<Vec<u8>>,
    created: Instant,
}

/// Withheld chunks keyed by `(recipient, ident@host)`, expiring after a TTL.
pub struct MoreCache {
    ttl: Duration,
    entries: HashMap<Key, Entry>,
}

impl MoreCache {
    /// Cache with the given entry lifetime.
    pub fn new(ttl: Duration) -> Self {
        MoreCache {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Store withheld chunks in emission order, replacing any previous
    /// entry for the same requester and place.
    pub fn store(&mut self, recipient: &str, ident_host: &str, mut chunks: Vec<Vec<u8>>) {
        self.sweep();
        chunks.reverse();
        self.entries.insert(
            (recipient.to_string(), ident_host.to_string()),
            Entry {
                chunks,
                created: Instant::now(),
            },
        );
    }

    /// Pop the oldest withheld chunk, returning it and how many remain.
    /// The entry is dropped once drained.
    pub fn pop(&mut self, recipient: &str, ident_host: &str) -> Option<(Vec<u8>, usize)> {
        self.sweep();
        let key = (recipient.to_string(), ident_host.to_string());
        let entry = self.entries.get_mut(&key)?;
        let chunk = entry.chunks.pop()?;
        let remaining = entry.chunks.len();
        if remaining == 0 {
            self.entries.remove(&key);
        }
        Some((chunk, remaining))
    }

    /// Drop entries older than the TTL.
    fn sweep(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, e| e.created.elapsed() < ttl);
    }
}
