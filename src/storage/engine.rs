//! Thread-Safe Storage Engine with Expiry Support
//!
//! The store maps binary-safe keys to values with an optional expiry instant.
//! It is shared by every client connection through an `Arc`.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: keys are spread over 64 shards, each behind its own
//!    `RwLock`, so writers to different keys rarely wait on each other.
//! 2. **Lazy Expiry**: an expired entry is removed by the first `get` that sees it.
//! 3. **Whole-Entry Writes**: `set` swaps the entry in one insert, so readers
//!    observe either the old value or the new one, never a mix.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every operation on a key takes exactly one shard lock and releases it
//! before returning. No lock is ever held across an `.await`.

use bytes::Bytes;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Number of shards for the storage engine.
const NUM_SHARDS: usize = 64;

/// Represents a stored value with optional expiry time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The actual value stored
    pub value: Bytes,
    /// When this entry expires (None = never expires)
    pub expires_at: Option<Instant>,
}

impl Entry {
    /// Creates a new entry without expiry.
    pub fn new(value: Bytes) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    /// Creates an entry that expires `ttl` from now.
    ///
    /// A `ttl` too large to represent as an `Instant` never expires.
    pub fn with_ttl(value: Bytes, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now().checked_add(ttl),
        }
    }

    /// Checks whether the entry is expired at `now`.
    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// Checks if this entry has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }
}

/// A single shard containing a portion of the key-value pairs.
#[derive(Debug, Default)]
struct Shard {
    data: RwLock<HashMap<Bytes, Entry>>,
}

impl Shard {
    // A panic while holding the lock cannot leave a half-written entry:
    // every mutation is a single insert or remove. The map is still sound.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<Bytes, Entry>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Bytes, Entry>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Snapshot of storage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Entries currently held, including expired ones not yet collected
    pub keys: u64,
    /// Total GET operations
    pub get_ops: u64,
    /// Total SET operations
    pub set_ops: u64,
    /// Entries removed because they expired
    pub expired: u64,
}

/// Outcome of one [`StorageEngine::cleanup_expired`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sweep {
    /// Entries examined, expired or not
    pub scanned: u64,
    /// Entries removed
    pub removed: u64,
}

impl Sweep {
    /// Fraction of scanned entries that had expired. Zero for an empty store.
    pub fn expired_ratio(&self) -> f64 {
        if self.scanned == 0 {
            0.0
        } else {
            self.removed as f64 / self.scanned as f64
        }
    }
}

/// The key/value store shared by all connections.
///
/// # Example
///
/// ```
/// use quickkv::storage::StorageEngine;
/// use bytes::Bytes;
/// use std::time::Duration;
///
/// let engine = StorageEngine::new();
///
/// engine.set(Bytes::from("name"), Bytes::from("Nova"), None);
/// assert_eq!(engine.get(b"name"), Some(Bytes::from("Nova")));
///
/// engine.set(Bytes::from("session"), Bytes::from("abc123"), Some(Duration::from_secs(60)));
/// ```
pub struct StorageEngine {
    shards: Vec<Shard>,
    get_count: AtomicU64,
    set_count: AtomicU64,
    expired_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("shards", &self.shards.len())
            .field("keys", &self.len())
            .field("get_count", &self.get_count.load(Ordering::Relaxed))
            .field("set_count", &self.set_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates an empty storage engine.
    pub fn new() -> Self {
        let shards = (0..NUM_SHARDS).map(|_| Shard::default()).collect();

        Self {
            shards,
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    /// Determines which shard a key belongs to.
    #[inline]
    fn shard_index(&self, key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % NUM_SHARDS
    }

    #[inline]
    fn get_shard(&self, key: &[u8]) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    /// Stores `value` under `key`, replacing any previous entry and its expiry.
    ///
    /// With `expiry` set, the entry expires that long from now; without it the
    /// entry never expires.
    ///
    /// Returns `true` if no live entry existed for the key before.
    pub fn set(&self, key: Bytes, value: Bytes, expiry: Option<Duration>) -> bool {
        self.set_count.fetch_add(1, Ordering::Relaxed);

        let entry = match expiry {
            Some(ttl) => Entry::with_ttl(value, ttl),
            None => Entry::new(value),
        };

        let mut data = self.get_shard(&key).write();
        match data.insert(key, entry) {
            Some(previous) => previous.is_expired(),
            None => true,
        }
    }

    /// Gets the value for a key.
    ///
    /// Returns `None` if the key doesn't exist or has expired. An expired
    /// entry is removed on the way out.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.get_count.fetch_add(1, Ordering::Relaxed);

        let shard = self.get_shard(key);

        // Fast path: shared lock for live or missing keys.
        {
            let data = shard.read();
            match data.get(key) {
                Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Expired under the read lock. Re-check under the write lock: another
        // connection may have replaced the entry in between.
        let mut data = shard.write();
        match data.get(key) {
            Some(entry) if entry.is_expired() => {
                data.remove(key);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Removes every expired entry from all shards.
    ///
    /// Each shard is swept under its write lock, so this never races with the
    /// lazy removal done by `get`.
    pub fn cleanup_expired(&self) -> Sweep {
        let mut sweep = Sweep::default();

        for shard in &self.shards {
            let mut data = shard.write();
            let now = Instant::now();
            let before = data.len();

            data.retain(|_, entry| !entry.is_expired_at(now));

            sweep.scanned += before as u64;
            sweep.removed += (before - data.len()) as u64;
        }

        if sweep.removed > 0 {
            self.expired_count.fetch_add(sweep.removed, Ordering::Relaxed);
        }

        sweep
    }

    /// Number of stored entries, counting expired entries not yet collected.
    pub fn len(&self) -> u64 {
        self.shards.iter().map(|s| s.read().len() as u64).sum()
    }

    /// Returns true if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().is_empty())
    }

    /// Returns storage statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.len(),
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_set_and_get() {
        let engine = StorageEngine::new();

        assert!(engine.set(Bytes::from("key"), Bytes::from("value"), None));
        assert_eq!(engine.get(b"key"), Some(Bytes::from("value")));
    }

    #[test]
    fn test_get_nonexistent() {
        let engine = StorageEngine::new();
        assert_eq!(engine.get(b"nonexistent"), None);
    }

    #[test]
    fn test_set_overwrites() {
        let engine = StorageEngine::new();

        engine.set(Bytes::from("key"), Bytes::from("v1"), None);
        assert!(!engine.set(Bytes::from("key"), Bytes::from("v2"), None));
        assert_eq!(engine.get(b"key"), Some(Bytes::from("v2")));
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn test_binary_keys_and_values() {
        let engine = StorageEngine::new();
        let key = Bytes::from_static(b"k\r\n\x00");
        let value = Bytes::from_static(b"\xff\r\nv");

        engine.set(key.clone(), value.clone(), None);
        assert_eq!(engine.get(&key), Some(value));
    }

    #[test]
    fn test_expiry() {
        let engine = StorageEngine::new();

        engine.set(
            Bytes::from("key"),
            Bytes::from("value"),
            Some(Duration::from_millis(50)),
        );
        assert_eq!(engine.get(b"key"), Some(Bytes::from("value")));

        thread::sleep(Duration::from_millis(100));

        assert_eq!(engine.get(b"key"), None);
        // Lazy expiry removed the entry
        assert_eq!(engine.len(), 0);
        assert_eq!(engine.stats().expired, 1);
    }

    #[test]
    fn test_zero_ttl_is_immediately_expired() {
        let engine = StorageEngine::new();

        engine.set(Bytes::from("key"), Bytes::from("v1"), Some(Duration::ZERO));
        assert_eq!(engine.get(b"key"), None);
    }

    #[test]
    fn test_set_without_expiry_clears_previous_ttl() {
        let engine = StorageEngine::new();

        engine.set(
            Bytes::from("key"),
            Bytes::from("short"),
            Some(Duration::from_millis(20)),
        );
        engine.set(Bytes::from("key"), Bytes::from("forever"), None);

        thread::sleep(Duration::from_millis(50));
        assert_eq!(engine.get(b"key"), Some(Bytes::from("forever")));
    }

    #[test]
    fn test_set_over_expired_entry_counts_as_new() {
        let engine = StorageEngine::new();

        engine.set(Bytes::from("key"), Bytes::from("old"), Some(Duration::ZERO));
        assert!(engine.set(Bytes::from("key"), Bytes::from("new"), None));
    }

    #[test]
    fn test_huge_ttl_never_expires() {
        let engine = StorageEngine::new();

        engine.set(Bytes::from("key"), Bytes::from("v"), Some(Duration::MAX));
        assert_eq!(engine.get(b"key"), Some(Bytes::from("v")));
    }

    #[test]
    fn test_cleanup_expired() {
        let engine = StorageEngine::new();

        engine.set(
            Bytes::from("key1"),
            Bytes::from("value1"),
            Some(Duration::from_millis(10)),
        );
        engine.set(
            Bytes::from("key2"),
            Bytes::from("value2"),
            Some(Duration::from_millis(10)),
        );
        engine.set(Bytes::from("key3"), Bytes::from("value3"), None);

        thread::sleep(Duration::from_millis(50));

        let sweep = engine.cleanup_expired();
        assert_eq!(
            sweep,
            Sweep {
                scanned: 3,
                removed: 2
            }
        );
        assert!((sweep.expired_ratio() - 2.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.cleanup_expired().removed, 0);
        assert_eq!(Sweep::default().expired_ratio(), 0.0);
        assert_eq!(engine.get(b"key3"), Some(Bytes::from("value3")));
    }

    #[test]
    fn test_stats() {
        let engine = StorageEngine::new();
        assert!(engine.is_empty());

        engine.set(Bytes::from("a"), Bytes::from("1"), None);
        engine.set(Bytes::from("b"), Bytes::from("2"), None);
        engine.get(b"a");
        engine.get(b"missing");

        let stats = engine.stats();
        assert_eq!(stats.keys, 2);
        assert_eq!(stats.set_ops, 2);
        assert_eq!(stats.get_ops, 2);
        assert_eq!(stats.expired, 0);
    }

    #[test]
    fn test_concurrent_access() {
        let engine = Arc::new(StorageEngine::new());
        let mut handles = vec![];

        for i in 0..10 {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    let key = Bytes::from(format!("key-{}-{}", i, j));
                    engine.set(key.clone(), Bytes::from("value"), None);
                    assert_eq!(engine.get(&key), Some(Bytes::from("value")));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(engine.len(), 1000);
    }

    #[test]
    fn test_concurrent_writes_to_same_key_never_tear() {
        let engine = Arc::new(StorageEngine::new());
        let a = Bytes::from(vec![b'a'; 4096]);
        let b = Bytes::from(vec![b'b'; 4096]);

        let writers: Vec<_> = [a.clone(), b.clone()]
            .into_iter()
            .map(|value| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    for _ in 0..500 {
                        engine.set(Bytes::from("shared"), value.clone(), None);
                    }
                })
            })
            .collect();

        for _ in 0..500 {
            if let Some(seen) = engine.get(b"shared") {
                assert!(seen == a || seen == b);
            }
        }

        for writer in writers {
            writer.join().unwrap();
        }

        let last = engine.get(b"shared").unwrap();
        assert!(last == a || last == b);
    }
}
