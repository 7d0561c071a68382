//! Request/resolve orchestration over the loader registry, the worker pool
//! and the resident cache.
//!
//! Every key is in at most one of three places: pending (a task exists and
//! has not been settled), resident (a decoded asset or a substituted
//! fallback), or failed (the last decode failure, re-raised on resolve).
//! All three maps and the counters live behind one state lock; the resident
//! cache has its own lock and is always taken after the state lock.
//!
//! Streams are opened with the state lock released. A request or implicit
//! resolve checks the key, opens the stream, then re-checks before
//! registering its task; a stream that lost that race is dropped unread.

use std::any::type_name;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};

use crate::asset::{downcast, Asset};
use crate::asset_id::{AssetIds, AssetKey, AssetType};
use crate::cache::{EvictionHook, Reclaim, SharedCache, Weigher};
use crate::config::AssetConfig;
use crate::error::AssetError;
use crate::jobs::{JobHandle, Jobs};
use crate::loader::{LoadOutcome, Loader, LoaderRegistry, Task};
use crate::loaders::{BytesLoader, PngLoader};
use crate::source::{AssetSource, DirSource};

/// Counter snapshot. `requested` counts every request that started a load
/// (explicit or implicit); `settled` counts loads that reached an outcome.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub requested: u64,
    pub loaded: u64,
    pub failed: u64,
    pub settled: u64,
    pub pending: usize,
    pub resident: usize,
}

#[derive(Clone)]
pub struct AssetManager {
    inner: Arc<AssetManagerInner>,
}

struct AssetManagerInner {
    ids: AssetIds,
    source: Arc<dyn AssetSource>,
    loaders: LoaderRegistry,
    jobs: Jobs,
    resident: SharedCache<AssetKey, dyn Asset>,
    state: Mutex<AssetManagerState>,
}

#[derive(Default)]
struct AssetManagerState {
    pending: HashMap<AssetKey, PendingLoad>,
    failures: HashMap<AssetKey, AssetError>,
    fallbacks: HashMap<AssetType, Arc<dyn Asset>>,
    counters: Counters,
}

#[derive(Clone, Copy, Debug, Default)]
struct Counters {
    requested: u64,
    loaded: u64,
    failed: u64,
    settled: u64,
}

struct PendingLoad {
    task: Arc<Task>,
    job: Option<JobHandle>,
}

/// What a resolve found already in place for a key.
enum Existing {
    Resident(Arc<dyn Asset>),
    Pending(Arc<Task>),
    Failed(AssetError),
}

impl PendingLoad {
    fn cancel(&self) {
        self.task.cancel();
        if let Some(job) = &self.job {
            job.cancel();
        }
    }
}

impl AssetManager {
    pub fn new(source: Arc<dyn AssetSource>, jobs: Jobs) -> Self {
        Self::with_resident_budget(source, jobs, usize::MAX)
    }

    /// `budget_bytes` bounds the summed `decoded_size` of resident assets;
    /// least-recently-resolved assets are dropped first when it is exceeded.
    pub fn with_resident_budget(source: Arc<dyn AssetSource>, jobs: Jobs, budget_bytes: usize) -> Self {
        let weigher: Weigher<dyn Asset> = Arc::new(|asset| asset.decoded_size().max(1));
        let on_evict: EvictionHook<AssetKey, dyn Asset> = Arc::new(|key, asset| {
            debug!("evicted {} ({} bytes)", key, asset.decoded_size());
        });
        let resident = SharedCache::new(Reclaim::Soft)
            .with_budget(budget_bytes)
            .with_weigher(weigher)
            .with_eviction_hook(on_evict);
        let inner = AssetManagerInner {
            ids: AssetIds::new(),
            source,
            loaders: LoaderRegistry::new(),
            jobs,
            resident,
            state: Mutex::new(AssetManagerState::default()),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Filesystem-backed manager with the PNG loader registered.
    pub fn from_config(config: &AssetConfig) -> Self {
        let manager = Self::with_resident_budget(
            Arc::new(DirSource::new(config.root.clone())),
            Jobs::new(config.jobs_config()),
            config.resident_budget_bytes,
        );
        let png = PngLoader::new(codec_png::DecodeOptions {
            flip_vertically: config.flip_vertically,
            ..codec_png::DecodeOptions::default()
        });
        manager.register_builtin(Arc::new(png), "PNG");
        manager
    }

    fn register_builtin(&self, loader: Arc<dyn Loader>, extension: &str) {
        match self.inner.ids.kind(extension) {
            Ok(kind) => self.inner.loaders.register(loader, &[kind]),
            Err(err) => warn!("skipping built-in loader: {}", err),
        }
    }

    pub fn ids(&self) -> &AssetIds {
        &self.inner.ids
    }

    pub fn loaders(&self) -> &LoaderRegistry {
        &self.inner.loaders
    }

    pub fn key(&self, path: &str) -> Result<AssetKey, AssetError> {
        self.inner.ids.key(path)
    }

    pub fn asset_type(&self, extension: &str) -> Result<AssetType, AssetError> {
        self.inner.ids.kind(extension)
    }

    pub fn register_loader(&self, loader: Arc<dyn Loader>, extensions: &[&str]) -> Result<(), AssetError> {
        let types = extensions
            .iter()
            .map(|extension| self.inner.ids.kind(extension))
            .collect::<Result<Vec<_>, _>>()?;
        self.inner.loaders.register(loader, &types);
        Ok(())
    }

    /// Registers [`BytesLoader`] for `extensions`.
    pub fn register_bytes(&self, extensions: &[&str]) -> Result<(), AssetError> {
        self.register_loader(Arc::new(BytesLoader), extensions)
    }

    /// Sets the asset substituted when a key of one of these types fails.
    pub fn set_fallback(&self, asset: Arc<dyn Asset>, extensions: &[&str]) -> Result<(), AssetError> {
        let types = extensions
            .iter()
            .map(|extension| self.inner.ids.kind(extension))
            .collect::<Result<Vec<_>, _>>()?;
        let mut state = self.inner.lock_state();
        for kind in types {
            info!("fallback for type {} set to {}", kind, asset.key());
            state.fallbacks.insert(kind, Arc::clone(&asset));
        }
        Ok(())
    }

    /// Starts loading `key` in the background. With `reuse`, a key that is
    /// already pending or resident is left alone. Without it, a pending load
    /// is cancelled and a resident asset is dropped before reloading.
    ///
    /// A missing loader or stream is reported here; with a fallback for the
    /// key's type the fallback is made resident instead.
    pub fn request(&self, key: &AssetKey, reuse: bool) -> Result<AssetKey, AssetError> {
        if reuse && self.inner.is_tracked(&self.inner.lock_state(), key) {
            debug!("request for {} reused", key);
            return Ok(key.clone());
        }

        let prepared = self.inner.prepare(key);
        let mut state = self.inner.lock_state();
        if reuse && self.inner.is_tracked(&state, key) {
            drop(state);
            debug!("request for {} reused; dropping its stream", key);
            return Ok(key.clone());
        }
        let superseded = state.pending.remove(key);
        if superseded.is_some() {
            state.counters.failed += 1;
            state.counters.settled += 1;
            debug!("superseded pending load of {}", key);
        }
        self.inner.resident.remove(key);
        state.failures.remove(key);
        state.counters.requested += 1;

        let task = match prepared {
            Ok(task) => Arc::new(task),
            Err(err) => {
                let settled = self.inner.settle_unstarted(&mut state, key, err);
                drop(state);
                if let Some(superseded) = superseded {
                    superseded.cancel();
                }
                return settled.map(|_| key.clone());
            }
        };
        state.pending.insert(
            key.clone(),
            PendingLoad {
                task: Arc::clone(&task),
                job: None,
            },
        );
        drop(state);
        if let Some(superseded) = superseded {
            superseded.cancel();
        }
        debug!("requested {} via {}", key, task.loader_name());
        AssetManagerInner::schedule(&self.inner, key, task);
        Ok(key.clone())
    }

    pub fn request_path(&self, path: &str, reuse: bool) -> Result<AssetKey, AssetError> {
        let key = self.key(path)?;
        self.request(&key, reuse)
    }

    /// Returns the decoded asset for `key`, waiting for a pending load or
    /// loading it on the calling thread when nothing was requested.
    pub fn resolve(&self, key: &AssetKey) -> LoadOutcome {
        if let Some(asset) = self.inner.resident.get(key) {
            debug!("resolved {} from cache", key);
            return Ok(asset);
        }
        let existing = self.inner.existing(&self.inner.lock_state(), key);
        if let Some(existing) = existing {
            return self.inner.join(key, existing);
        }

        let prepared = self.inner.prepare(key);
        let mut state = self.inner.lock_state();
        if let Some(existing) = self.inner.existing(&state, key) {
            drop(state);
            drop(prepared);
            return self.inner.join(key, existing);
        }

        // Registered as pending first so concurrent resolvers join this load.
        state.counters.requested += 1;
        let task = match prepared {
            Ok(task) => Arc::new(task),
            Err(err) => return self.inner.settle_unstarted(&mut state, key, err),
        };
        state.pending.insert(
            key.clone(),
            PendingLoad {
                task: Arc::clone(&task),
                job: None,
            },
        );
        drop(state);
        debug!("loading {} on the calling thread", key);
        self.inner.finish_on_caller(key, &task)
    }

    pub fn resolve_path(&self, path: &str) -> LoadOutcome {
        let key = self.key(path)?;
        self.resolve(&key)
    }

    pub fn resolve_as<T: Asset>(&self, key: &AssetKey) -> Result<Arc<T>, AssetError> {
        let asset = self.resolve(key)?;
        downcast::<T>(asset).ok_or_else(|| AssetError::type_mismatch(key, type_name::<T>()))
    }

    pub fn is_pending(&self, key: &AssetKey) -> bool {
        self.inner.lock_state().pending.contains_key(key)
    }

    pub fn is_resident(&self, key: &AssetKey) -> bool {
        self.inner.resident.contains(key)
    }

    pub fn failure(&self, key: &AssetKey) -> Option<AssetError> {
        self.inner.lock_state().failures.get(key).cloned()
    }

    pub fn is_loading(&self) -> bool {
        let counters = self.inner.lock_state().counters;
        counters.settled < counters.requested
    }

    /// Fraction of requested loads that have settled, 1.0 when idle.
    pub fn progress(&self) -> f32 {
        let counters = self.inner.lock_state().counters;
        if counters.requested == 0 || counters.settled >= counters.requested {
            return 1.0;
        }
        counters.settled as f32 / counters.requested as f32
    }

    /// Zeroes the counters. Pending loads keep running.
    pub fn reset(&self) {
        self.inner.lock_state().counters = Counters::default();
    }

    /// Drops every resident asset and every recorded failure.
    pub fn clear(&self) {
        let mut state = self.inner.lock_state();
        state.failures.clear();
        self.inner.resident.clear();
    }

    /// Cancels every pending load and discards queued jobs. Each cancelled
    /// key settles as a failure and is recorded as `Cancelled`.
    pub fn abort(&self) {
        let cancelled: Vec<(AssetKey, PendingLoad)> = {
            let mut state = self.inner.lock_state();
            let drained: Vec<(AssetKey, PendingLoad)> = state.pending.drain().collect();
            for (key, _) in &drained {
                state.counters.failed += 1;
                state.counters.settled += 1;
                state.failures.insert(key.clone(), AssetError::cancelled(key));
            }
            drained
        };
        for (_, pending) in &cancelled {
            pending.cancel();
        }
        let purged = self.inner.jobs.purge();
        info!(
            "aborted {} pending loads ({} queued jobs discarded)",
            cancelled.len(),
            purged
        );
    }

    pub fn restart(&self) {
        self.abort();
        self.reset();
        self.clear();
    }

    pub fn requested_count(&self) -> u64 {
        self.inner.lock_state().counters.requested
    }

    pub fn loaded_count(&self) -> u64 {
        self.inner.lock_state().counters.loaded
    }

    pub fn failed_count(&self) -> u64 {
        self.inner.lock_state().counters.failed
    }

    pub fn settled_count(&self) -> u64 {
        self.inner.lock_state().counters.settled
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock_state().pending.len()
    }

    pub fn cache_size(&self) -> usize {
        self.inner.resident.len()
    }

    pub fn cache_size_of(&self, kind: &AssetType) -> usize {
        self.inner
            .resident
            .keys()
            .iter()
            .filter(|key| key.kind() == kind)
            .count()
    }

    pub fn resident_bytes(&self) -> usize {
        self.inner.resident.weight()
    }

    pub fn active_worker_count(&self) -> usize {
        self.inner.jobs.telemetry().active_workers
    }

    pub fn live_worker_count(&self) -> usize {
        self.inner.jobs.telemetry().live_workers
    }

    pub fn queue_depth(&self) -> usize {
        self.inner.jobs.telemetry().queue_depth
    }

    pub fn stats(&self) -> LoadStats {
        let (counters, pending) = {
            let state = self.inner.lock_state();
            (state.counters, state.pending.len())
        };
        LoadStats {
            requested: counters.requested,
            loaded: counters.loaded,
            failed: counters.failed,
            settled: counters.settled,
            pending,
            resident: self.inner.resident.len(),
        }
    }
}

impl AssetManagerInner {
    fn lock_state(&self) -> MutexGuard<'_, AssetManagerState> {
        self.state.lock().expect("asset state lock poisoned")
    }

    fn is_tracked(&self, state: &AssetManagerState, key: &AssetKey) -> bool {
        state.pending.contains_key(key) || self.resident.contains(key)
    }

    fn existing(&self, state: &AssetManagerState, key: &AssetKey) -> Option<Existing> {
        if let Some(asset) = self.resident.get(key) {
            return Some(Existing::Resident(asset));
        }
        if let Some(pending) = state.pending.get(key) {
            return Some(Existing::Pending(Arc::clone(&pending.task)));
        }
        state.failures.get(key).cloned().map(Existing::Failed)
    }

    fn join(&self, key: &AssetKey, existing: Existing) -> LoadOutcome {
        match existing {
            Existing::Resident(asset) => Ok(asset),
            Existing::Pending(task) => self.finish_on_caller(key, &task),
            Existing::Failed(err) => self.substitute(key, err),
        }
    }

    /// Resolves the loader, then opens the stream. Never called under the
    /// state lock; callers re-check the key before registering the task.
    fn prepare(&self, key: &AssetKey) -> Result<Task, AssetError> {
        let loader = self
            .loaders
            .loader_for(key.kind())
            .ok_or_else(|| AssetError::unsupported_type(key))?;
        let stream = self.source.open(key)?;
        Ok(Task::new(key.clone(), loader, stream))
    }

    fn schedule(this: &Arc<Self>, key: &AssetKey, task: Arc<Task>) {
        let weak = Arc::downgrade(this);
        let run_task = Arc::clone(&task);
        let hook_task = Arc::clone(&task);
        let hook_key = key.clone();
        let submitted = this.jobs.submit(
            move || run_task.run(),
            move |outcome| {
                if let Some(inner) = weak.upgrade() {
                    inner.complete(&hook_key, &hook_task, outcome);
                }
            },
        );
        match submitted {
            Ok(handle) => {
                let mut state = this.lock_state();
                if let Some(pending) = state.pending.get_mut(key) {
                    if Arc::ptr_eq(&pending.task, &task) {
                        pending.job = Some(handle);
                    }
                }
            }
            Err(err) => {
                task.cancel();
                this.complete(key, &task, Err(AssetError::rejected(key, err.to_string())));
            }
        }
    }

    /// Settles `task` if it is still the pending load for `key`. Returns
    /// false when the key was already settled by another path.
    fn complete(&self, key: &AssetKey, task: &Arc<Task>, outcome: LoadOutcome) -> bool {
        let mut state = self.lock_state();
        let owned = state
            .pending
            .get(key)
            .is_some_and(|pending| Arc::ptr_eq(&pending.task, task));
        if !owned {
            return false;
        }
        state.pending.remove(key);
        state.counters.settled += 1;
        match outcome {
            Ok(asset) => {
                state.counters.loaded += 1;
                debug!("loaded {} ({} bytes)", key, asset.decoded_size());
                self.resident.put(key.clone(), asset);
            }
            Err(err) => {
                state.counters.failed += 1;
                warn!("load of {} failed: {}", key, err);
                state.failures.insert(key.clone(), err);
            }
        }
        true
    }

    fn finish_on_caller(&self, key: &AssetKey, task: &Arc<Task>) -> LoadOutcome {
        let outcome = task.run();
        self.complete(key, task, outcome.clone());
        match outcome {
            Ok(asset) => Ok(asset),
            Err(err) => self.substitute(key, err),
        }
    }

    /// Counts a load that failed before any task ran and applies the fallback.
    fn settle_unstarted(
        &self,
        state: &mut AssetManagerState,
        key: &AssetKey,
        err: AssetError,
    ) -> LoadOutcome {
        state.counters.failed += 1;
        state.counters.settled += 1;
        match state.fallbacks.get(key.kind()).cloned() {
            Some(fallback) => {
                state.counters.loaded += 1;
                warn!("substituting fallback for {}: {}", key, err);
                self.resident.put(key.clone(), Arc::clone(&fallback));
                Ok(fallback)
            }
            None => Err(err),
        }
    }

    /// Replaces a recorded failure with the fallback for the key's type, or
    /// returns the failure when there is none.
    fn substitute(&self, key: &AssetKey, err: AssetError) -> LoadOutcome {
        let mut state = self.lock_state();
        if let Some(asset) = self.resident.get(key) {
            return Ok(asset);
        }
        if state.pending.contains_key(key) {
            return Err(err);
        }
        let Some(fallback) = state.fallbacks.get(key.kind()).cloned() else {
            return Err(err);
        };
        state.failures.remove(key);
        state.counters.loaded += 1;
        warn!("substituting fallback for {}: {}", key, err);
        self.resident.put(key.clone(), Arc::clone(&fallback));
        Ok(fallback)
    }
}
