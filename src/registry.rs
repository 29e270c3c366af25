//! Shared topology state: the sentinel registry, the master cell, and the
//! shutdown gate.
//!
//! The registry is a plain concurrent map; the reconciliation scheduler
//! snapshots it per tick and never holds a back-pointer into it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::address::RedisUri;
use crate::client::SentinelClient;

/// Concurrent map of registered sentinels, keyed by post-NAT IP-form URI.
///
/// Every URI in here has been PING-acknowledged before insertion;
/// [`try_register`](Self::try_register) enforces the at-most-one-entry
/// invariant under concurrent discovery.
#[derive(Default)]
pub struct SentinelRegistry {
    sentinels: DashMap<RedisUri, Arc<SentinelClient>>,
}

impl SentinelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert only if absent. Returns whether the insert occurred.
    pub fn try_register(&self, uri: RedisUri, client: Arc<SentinelClient>) -> bool {
        match self.sentinels.entry(uri) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(client);
                true
            }
        }
    }

    /// Remove and return the handle; the caller owns its async shutdown.
    pub fn remove(&self, uri: &RedisUri) -> Option<Arc<SentinelClient>> {
        self.sentinels.remove(uri).map(|(_, client)| client)
    }

    pub fn contains(&self, uri: &RedisUri) -> bool {
        self.sentinels.contains_key(uri)
    }

    /// Stable list of clients for shuffled iteration.
    pub fn snapshot(&self) -> Vec<Arc<SentinelClient>> {
        self.sentinels.iter().map(|e| e.value().clone()).collect()
    }

    pub fn uris(&self) -> Vec<RedisUri> {
        self.sentinels.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sentinels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentinels.is_empty()
    }

    /// Drain every entry, for shutdown.
    pub fn drain(&self) -> Vec<Arc<SentinelClient>> {
        let uris = self.uris();
        uris.iter().filter_map(|uri| self.remove(uri)).collect()
    }
}

/// Atomically-updatable cell holding the current master URI.
///
/// Transitions are compare-and-swap: a failed swap means someone else won
/// and is a no-op for the caller.
#[derive(Default)]
pub struct MasterCell {
    current: Mutex<Option<RedisUri>>,
}

impl MasterCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<RedisUri> {
        self.current.lock().clone()
    }

    /// Unconditional store, used once at bootstrap.
    pub fn set(&self, uri: RedisUri) {
        *self.current.lock() = Some(uri);
    }

    /// Swap to `new` only if the cell still holds `expected`.
    pub fn compare_and_set(&self, expected: Option<&RedisUri>, new: Option<RedisUri>) -> bool {
        let mut guard = self.current.lock();
        if guard.as_ref() == expected {
            *guard = new;
            true
        } else {
            false
        }
    }
}

/// Cooperative shutdown barrier.
///
/// Mutating work acquires the gate for the duration of a tick; once the
/// gate is closed, `acquire` refuses and the tick aborts without mutation.
/// [`close`](Self::close) also waits until every in-flight holder has
/// released, so callers may tear state down right after it returns.
#[derive(Default)]
pub struct ShutdownGate {
    closed: AtomicBool,
    active: AtomicUsize,
    drained: tokio::sync::Notify,
}

impl ShutdownGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false once the gate is closed.
    pub fn acquire(&self) -> bool {
        self.active.fetch_add(1, Ordering::AcqRel);
        if self.closed.load(Ordering::Acquire) {
            self.release();
            return false;
        }
        true
    }

    pub fn release(&self) {
        if self.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }

    /// Close the gate and wait out in-flight holders. All subsequent
    /// `acquire` calls fail.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        while self.active.load(Ordering::Acquire) != 0 {
            let notified = self.drained.notified();
            if self.active.load(Ordering::Acquire) == 0 {
                break;
            }
            notified.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of in-flight holders, for tests and diagnostics.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}
