// src/cache.rs
//! Per-category lookup cache with load timeouts and background refresh.
//!
//! Readers always get a complete snapshot. Reloads build a fresh value off to the side and
//! swap it in under a short write lock, so a reader sees either the old snapshot or the new
//! one, never a mix.

use chrono::{DateTime, Utc};
use crossbeam_channel::RecvTimeoutError;
use lexicon::LexiconError;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::CacheConfig;
use crate::services::audit::ErrorSink;

/// Loads one category. Called on request threads (first miss) and worker threads (refresh).
pub type Loader<V> = Arc<dyn Fn(&str) -> Result<V, LexiconError> + Send + Sync>;

/// Box a closure as a [`Loader`].
pub fn loader<V, F>(f: F) -> Loader<V>
where
    F: Fn(&str) -> Result<V, LexiconError> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub refresh_after: Duration,
    pub retry_after: Duration,
    pub load_timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for CacheSettings {
    fn from(cfg: &CacheConfig) -> Self {
        Self {
            refresh_after: cfg.refresh_after(),
            retry_after: cfg.retry_after(),
            load_timeout: cfg.load_timeout(),
        }
    }
}

/// One immutable cache entry. Replaced wholesale, never mutated.
#[derive(Debug)]
pub struct Snapshot<V> {
    key: String,
    value: Arc<V>,
    loaded_at: DateTime<Utc>,
    refresh_due: Instant,
    available: bool,
    failures: u32,
    generation: u64,
}

impl<V> Snapshot<V> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// False for the default-valued placeholder stored when no load ever succeeded.
    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Consecutive failed loads since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Number of successful loads behind this snapshot (0 for a placeholder).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn is_due(&self, now: Instant) -> bool {
        now >= self.refresh_due
    }
}

/// What `get` hands back: a shared handle on the snapshot current at call time.
#[derive(Debug)]
pub struct Lookup<V> {
    snapshot: Arc<Snapshot<V>>,
}

impl<V> Clone for Lookup<V> {
    fn clone(&self) -> Self {
        Self {
            snapshot: Arc::clone(&self.snapshot),
        }
    }
}

impl<V> Lookup<V> {
    pub fn value(&self) -> &V {
        self.snapshot.value()
    }

    pub fn is_available(&self) -> bool {
        self.snapshot.is_available()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.snapshot.loaded_at()
    }

    pub fn failures(&self) -> u32 {
        self.snapshot.failures()
    }

    pub fn generation(&self) -> u64 {
        self.snapshot.generation()
    }
}

struct Slot<V> {
    current: RwLock<Option<Arc<Snapshot<V>>>>,
    // first load of a key is serialized so concurrent misses share one load
    load_gate: Mutex<()>,
    reloading: Arc<AtomicBool>,
    // set while a loader call runs, including one abandoned after its timeout
    loading: Arc<AtomicBool>,
}

impl<V> Slot<V> {
    fn new() -> Self {
        Self {
            current: RwLock::new(None),
            load_gate: Mutex::new(()),
            reloading: Arc::new(AtomicBool::new(false)),
            loading: Arc::new(AtomicBool::new(false)),
        }
    }

    fn current(&self) -> Option<Arc<Snapshot<V>>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, snap: Arc<Snapshot<V>>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(snap);
    }
}

/// Clears an in-flight flag when the guarded work ends, however it ends.
struct InFlight(Arc<AtomicBool>);

impl InFlight {
    /// Raise `flag`, or `None` when it is already raised.
    fn claim(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Inner<V> {
    name: String,
    loader: Loader<V>,
    settings: CacheSettings,
    sink: Arc<dyn ErrorSink>,
    slots: RwLock<HashMap<String, Arc<Slot<V>>>>,
}

/// Category-keyed cache over values produced by a [`Loader`].
///
/// Cheap to clone; clones share the same entries.
pub struct LookupCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for LookupCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> LookupCache<V>
where
    V: Default + Send + Sync + 'static,
{
    pub fn new(
        name: impl Into<String>,
        loader: Loader<V>,
        settings: CacheSettings,
        sink: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                loader,
                settings,
                sink,
                slots: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn settings(&self) -> CacheSettings {
        self.inner.settings
    }

    /// Current snapshot for `key`.
    ///
    /// A miss loads synchronously (bounded by `load_timeout`). A stale hit schedules a
    /// background reload and returns the stale snapshot right away. Never fails: a key that
    /// cannot be loaded yields an unavailable placeholder.
    pub fn get(&self, key: &str) -> Lookup<V> {
        let slot = self.inner.slot(key);
        if let Some(snap) = slot.current() {
            if snap.is_due(Instant::now()) {
                Inner::spawn_refresh(&self.inner, key, &slot);
            }
            return Lookup { snapshot: snap };
        }

        let _gate = slot.load_gate.lock().unwrap_or_else(PoisonError::into_inner);
        // another caller may have finished the first load while we waited
        if let Some(snap) = slot.current() {
            return Lookup { snapshot: snap };
        }
        Lookup {
            snapshot: self.inner.load_into(key, &slot),
        }
    }

    /// Reload `key` now, on the calling thread.
    pub fn refresh_now(&self, key: &str) -> Lookup<V> {
        let slot = self.inner.slot(key);
        let _gate = slot.load_gate.lock().unwrap_or_else(PoisonError::into_inner);
        Lookup {
            snapshot: self.inner.load_into(key, &slot),
        }
    }

    /// Forget `key`; the next `get` loads it again.
    pub fn invalidate(&self, key: &str) {
        self.inner
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Keys that currently hold a snapshot, sorted.
    pub fn keys(&self) -> Vec<String> {
        let slots = self.inner.slots.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| slot.current().is_some())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// True while a loader call for `key` is still running, even one `get` stopped waiting for.
    pub fn is_loading(&self, key: &str) -> bool {
        self.inner
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .is_some_and(|s| s.loading.load(Ordering::Acquire))
    }

    /// True while a background reload of `key` is running.
    pub fn is_reloading(&self, key: &str) -> bool {
        self.inner
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .is_some_and(|s| s.reloading.load(Ordering::Acquire))
    }
}

impl<V> Inner<V>
where
    V: Default + Send + Sync + 'static,
{
    fn slot(&self, key: &str) -> Arc<Slot<V>> {
        if let Some(slot) = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            slots
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Slot::new())),
        )
    }

    fn spawn_refresh(this: &Arc<Self>, key: &str, slot: &Arc<Slot<V>>) {
        // an abandoned loader still holds the key; wait for it instead of piling on
        if slot.loading.load(Ordering::Acquire) {
            return;
        }
        let Some(flight) = InFlight::claim(&slot.reloading) else {
            return;
        };
        let inner = Arc::clone(this);
        let worker_slot = Arc::clone(slot);
        let worker_key = key.to_string();
        let spawned = thread::Builder::new()
            .name(format!("{}-refresh", this.name))
            .spawn(move || {
                let _flight = flight;
                inner.load_into(&worker_key, &worker_slot);
            });
        if let Err(e) = spawned {
            self_report(this, key, &format!("could not start refresh worker: {e}"));
        }
    }

    /// Run the loader and publish the resulting snapshot (fresh, stale-kept or placeholder).
    ///
    /// While an earlier loader call for `key` is still running nothing new starts: the current
    /// snapshot is served as is, or a placeholder when there is none.
    fn load_into(&self, key: &str, slot: &Slot<V>) -> Arc<Snapshot<V>> {
        let previous = slot.current();
        let now = Instant::now();
        let Some(running) = InFlight::claim(&slot.loading) else {
            self_report(self, key, "load still in progress");
            if let Some(prev) = previous {
                return prev;
            }
            let snap = Arc::new(self.placeholder(key, now, 0));
            slot.publish(Arc::clone(&snap));
            return snap;
        };
        let snap = match self.call_loader(key, running) {
            Ok(value) => {
                let generation = previous.as_ref().map_or(0, |p| p.generation) + 1;
                tracing::info!(cache = %self.name, key, generation, "category loaded");
                Snapshot {
                    key: key.to_string(),
                    value: Arc::new(value),
                    loaded_at: Utc::now(),
                    refresh_due: now + self.settings.refresh_after,
                    available: true,
                    failures: 0,
                    generation,
                }
            }
            Err(reason) => {
                self_report(self, key, &reason);
                match previous {
                    Some(prev) => Snapshot {
                        key: key.to_string(),
                        value: Arc::clone(&prev.value),
                        loaded_at: prev.loaded_at,
                        refresh_due: now + self.settings.retry_after,
                        available: prev.available,
                        failures: prev.failures.saturating_add(1),
                        generation: prev.generation,
                    },
                    None => self.placeholder(key, now, 1),
                }
            }
        };
        let snap = Arc::new(snap);
        slot.publish(Arc::clone(&snap));
        snap
    }

    fn placeholder(&self, key: &str, now: Instant, failures: u32) -> Snapshot<V> {
        Snapshot {
            key: key.to_string(),
            value: Arc::new(V::default()),
            loaded_at: Utc::now(),
            refresh_due: now + self.settings.retry_after,
            available: false,
            failures,
            generation: 0,
        }
    }

    /// Run the loader on its own thread and wait at most `load_timeout` for it.
    ///
    /// A loader that overruns is abandoned; its result is dropped when it finally arrives.
    /// `running` moves onto the loader thread, so the key stays marked until the loader returns.
    fn call_loader(&self, key: &str, running: InFlight) -> Result<V, String> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let loader = Arc::clone(&self.loader);
        let owned_key = key.to_string();
        thread::Builder::new()
            .name(format!("{}-load", self.name))
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| loader(&owned_key)));
                // lower the flag before handing over, so a caller woken by the result can load again
                drop(running);
                let _ = tx.send(result);
            })
            .map_err(|e| format!("could not start loader thread: {e}"))?;

        match rx.recv_timeout(self.settings.load_timeout) {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(_)) => Err("loader panicked".to_string()),
            Err(RecvTimeoutError::Timeout) => Err(format!(
                "load timed out after {} ms",
                self.settings.load_timeout.as_millis()
            )),
            Err(RecvTimeoutError::Disconnected) => {
                Err("loader exited without a result".to_string())
            }
        }
    }
}

fn self_report<V>(inner: &Inner<V>, key: &str, reason: &str) {
    inner.sink.report_failure(&format!("cache:{key}"), reason);
}
