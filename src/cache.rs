//! Auto-expiring concurrent map with a two-phase eviction protocol
//!
//! A keyed store with a per-entry TTL, an eviction enable/disable toggle,
//! and an eviction-hook callback that may veto a deletion. The map backs
//! the authorization proxy's single-flight cache:
//!
//! 1. [`AutoExpiryMap::insert`] reports whether the key was inserted,
//!    already present (returning the stored value), or currently being
//!    garbage-collected — the caller retries in the last case.
//! 2. [`AutoExpiryMap::disable_eviction`] pins an entry for the duration of
//!    an in-flight load so the TTL sweeper cannot race the loader.
//! 3. A background sweeper (active between [`run`](AutoExpiryMap::run) and
//!    [`stop`](AutoExpiryMap::stop)) marks expired entries as
//!    being-deleted, consults the eviction hook, and removes or unmarks.
//!
//! No eviction hook fires after `stop` returns.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{Error, Result};

/// One-shot decision handed to the eviction hook.
pub type EvictionDecision = Box<dyn FnOnce(bool) + Send>;

/// Callback consulted before an expired entry is deleted.
///
/// Invoked with the key, the stored value, and a `decide` closure. Calling
/// `decide(true)` permits the deletion; `decide(false)` (or not calling it
/// at all) keeps the entry for the next sweep.
pub type EvictionHook<V> = Arc<dyn Fn(&str, &Arc<V>, EvictionDecision) + Send + Sync>;

/// Outcome of [`AutoExpiryMap::insert`].
pub enum InsertOutcome<V> {
    /// The key was vacant; the value is now stored.
    Inserted,
    /// Another entry holds the key; the stored value is returned.
    Exists(Arc<V>),
    /// A garbage collection is in progress on this key; retry later.
    BeingDeleted,
}

struct Slot<V> {
    value: Arc<V>,
    created_at: Instant,
    eviction_disabled: bool,
    being_deleted: bool,
}

impl<V> Slot<V> {
    fn new(value: V) -> Self {
        Self {
            value: Arc::new(value),
            created_at: Instant::now(),
            eviction_disabled: false,
            being_deleted: false,
        }
    }

    fn is_expired(&self, lifetime: Duration) -> bool {
        self.created_at.elapsed() >= lifetime
    }
}

struct Inner<V> {
    entries: DashMap<String, Slot<V>>,
    lifetime: Duration,
    extend_on_access: bool,
    hook: Option<EvictionHook<V>>,
}

/// Concurrent map with per-entry TTL and hook-gated garbage collection.
pub struct AutoExpiryMap<V> {
    inner: Arc<Inner<V>>,
    sweep_interval: Duration,
    cancel: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

impl<V: Send + Sync + 'static> AutoExpiryMap<V> {
    /// Create a map whose entries expire `lifetime` after creation.
    ///
    /// With `extend_on_access` set, a successful [`find`](Self::find) resets
    /// the entry's creation instant. The authorization cache runs with it
    /// off so the TTL is measured from insertion.
    pub fn new(lifetime: Duration, extend_on_access: bool, hook: Option<EvictionHook<V>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                lifetime,
                extend_on_access,
                hook,
            }),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            cancel: CancellationToken::new(),
            sweeper: Mutex::new(None),
        }
    }

    /// Override the sweep cadence.
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Atomically insert `value` under `key`.
    pub fn insert(&self, key: &str, value: V) -> InsertOutcome<V> {
        match self.inner.entries.entry(key.to_string()) {
            Entry::Occupied(occupied) => {
                let slot = occupied.get();
                if slot.being_deleted {
                    InsertOutcome::BeingDeleted
                } else {
                    InsertOutcome::Exists(Arc::clone(&slot.value))
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::new(value));
                InsertOutcome::Inserted
            }
        }
    }

    /// Look up `key`, returning the stored value by shared reference.
    ///
    /// Entries undergoing garbage collection are reported as absent.
    pub fn find(&self, key: &str) -> Option<Arc<V>> {
        if self.inner.extend_on_access {
            let mut slot = self.inner.entries.get_mut(key)?;
            if slot.being_deleted {
                return None;
            }
            slot.created_at = Instant::now();
            return Some(Arc::clone(&slot.value));
        }
        let slot = self.inner.entries.get(key)?;
        if slot.being_deleted {
            return None;
        }
        Some(Arc::clone(&slot.value))
    }

    /// Best-effort removal of `key`. Safe against a concurrent sweep.
    pub fn erase(&self, key: &str) {
        self.inner.entries.remove(key);
    }

    /// Pin `key` so the sweeper skips it regardless of TTL.
    pub fn disable_eviction(&self, key: &str) -> Result<()> {
        self.set_eviction_disabled(key, true)
    }

    /// Unpin `key`, making it eligible for TTL eviction again.
    ///
    /// Fails with [`Error::EntryNotFound`] when the entry no longer exists.
    pub fn enable_eviction(&self, key: &str) -> Result<()> {
        self.set_eviction_disabled(key, false)
    }

    fn set_eviction_disabled(&self, key: &str, disabled: bool) -> Result<()> {
        let mut slot = self
            .inner
            .entries
            .get_mut(key)
            .ok_or(Error::EntryNotFound)?;
        if slot.being_deleted {
            return Err(Error::EntryNotFound);
        }
        slot.eviction_disabled = disabled;
        Ok(())
    }

    /// Current number of entries.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// Returns `true` when the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Start the periodic TTL sweeper on the current tokio runtime.
    pub fn run(&self) {
        let inner = Arc::clone(&self.inner);
        let cancel = self.cancel.clone();
        let interval = self.sweep_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => inner.sweep(),
                }
            }
        });
        *self.sweeper.lock() = Some(handle);
    }

    /// Stop the sweeper. Once this returns, no eviction hook fires.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl<V> Inner<V> {
    /// One garbage-collection pass over the map.
    fn sweep(&self) {
        let candidates: Vec<String> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let slot = entry.value();
                (slot.is_expired(self.lifetime) && !slot.eviction_disabled && !slot.being_deleted)
                    .then(|| entry.key().clone())
            })
            .collect();

        for key in candidates {
            // Re-check under the shard lock, then mark the entry so
            // concurrent inserts observe the in-progress deletion.
            let value = {
                let Some(mut slot) = self.entries.get_mut(&key) else {
                    continue;
                };
                if !slot.is_expired(self.lifetime) || slot.eviction_disabled || slot.being_deleted {
                    continue;
                }
                slot.being_deleted = true;
                Arc::clone(&slot.value)
            };

            // The hook runs without any shard lock held.
            let permitted = Arc::new(std::sync::atomic::AtomicBool::new(false));
            match &self.hook {
                Some(hook) => {
                    let decision = Arc::clone(&permitted);
                    hook(
                        &key,
                        &value,
                        Box::new(move |permit| {
                            decision.store(permit, std::sync::atomic::Ordering::SeqCst);
                        }),
                    );
                }
                None => permitted.store(true, std::sync::atomic::Ordering::SeqCst),
            }

            if permitted.load(std::sync::atomic::Ordering::SeqCst) {
                self.entries.remove_if(&key, |_, slot| slot.being_deleted);
                debug!(key, "evicted expired entry");
            } else {
                if let Some(mut slot) = self.entries.get_mut(&key) {
                    slot.being_deleted = false;
                }
                trace!(key, "eviction vetoed by hook");
            }
        }
    }
}
