use std::collections::HashMap;
use std::io::Read;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use log::{debug, warn};

use crate::asset::Asset;
use crate::asset_id::{AssetKey, AssetType};
use crate::error::AssetError;
use crate::observability;
use crate::source::AssetStream;

pub type LoadOutcome = Result<Arc<dyn Asset>, AssetError>;

/// Decodes one asset type from a byte stream.
pub trait Loader: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn decode(&self, key: &AssetKey, stream: &mut dyn Read) -> LoadOutcome;
}

/// One pending decode of one key. The first `run` performs the work; every
/// later or concurrent `run` blocks until it finishes and returns the same
/// outcome.
pub struct Task {
    key: AssetKey,
    loader: Arc<dyn Loader>,
    stream: Mutex<Option<AssetStream>>,
    cancelled: AtomicBool,
    outcome: OnceLock<LoadOutcome>,
}

impl Task {
    pub fn new(key: AssetKey, loader: Arc<dyn Loader>, stream: AssetStream) -> Self {
        Self {
            key,
            loader,
            stream: Mutex::new(Some(stream)),
            cancelled: AtomicBool::new(false),
            outcome: OnceLock::new(),
        }
    }

    pub fn key(&self) -> &AssetKey {
        &self.key
    }

    pub fn loader_name(&self) -> &str {
        self.loader.name()
    }

    pub fn run(&self) -> LoadOutcome {
        self.outcome.get_or_init(|| self.execute()).clone()
    }

    pub fn is_done(&self) -> bool {
        self.outcome.get().is_some()
    }

    pub fn outcome(&self) -> Option<LoadOutcome> {
        self.outcome.get().cloned()
    }

    /// A cancelled task that has not finished yields `Cancelled`, including
    /// when the decode itself completes after the cancel. A stream the task
    /// has not started reading is closed here.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        let unread = self.stream.lock().expect("task stream lock poisoned").take();
        drop(unread);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn execute(&self) -> LoadOutcome {
        let stream = self.stream.lock().expect("task stream lock poisoned").take();
        if self.is_cancelled() {
            return Err(AssetError::cancelled(&self.key));
        }
        let Some(mut stream) = stream else {
            return Err(AssetError::initialization(&self.key, "stream already consumed"));
        };

        let loader = &self.loader;
        let key = &self.key;
        let result = panic::catch_unwind(AssertUnwindSafe(|| loader.decode(key, stream.as_mut())));
        drop(stream);

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = observability::panic_message(payload.as_ref());
                observability::record_failure(format!(
                    "loader '{}' panicked on {}: {}",
                    loader.name(),
                    key,
                    message
                ));
                Err(AssetError::initialization(key, format!("loader panicked: {}", message)))
            }
        };
        if self.is_cancelled() {
            return Err(AssetError::cancelled(key));
        }
        outcome
    }
}

/// Maps asset types to loaders. Registering a type again replaces its
/// loader; the last registration wins.
#[derive(Default)]
pub struct LoaderRegistry {
    loaders: RwLock<HashMap<AssetType, Arc<dyn Loader>>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, loader: Arc<dyn Loader>, types: &[AssetType]) {
        let mut loaders = self.loaders.write().expect("loader registry lock poisoned");
        for kind in types {
            match loaders.insert(kind.clone(), Arc::clone(&loader)) {
                Some(previous) => warn!(
                    "loader for type {} replaced: {} -> {}",
                    kind,
                    previous.name(),
                    loader.name()
                ),
                None => debug!("registered loader {} for type {}", loader.name(), kind),
            }
        }
    }

    pub fn loader_for(&self, kind: &AssetType) -> Option<Arc<dyn Loader>> {
        self.loaders
            .read()
            .expect("loader registry lock poisoned")
            .get(kind)
            .cloned()
    }

    pub fn registered_types(&self) -> Vec<AssetType> {
        let mut types: Vec<AssetType> = self
            .loaders
            .read()
            .expect("loader registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        types.sort_by(|a, b| a.extension().cmp(b.extension()));
        types
    }

    /// Builds an unstarted task; nothing is read from `stream` until `run`.
    pub fn new_task(&self, key: &AssetKey, stream: AssetStream) -> Result<Task, AssetError> {
        let loader = self
            .loader_for(key.kind())
            .ok_or_else(|| AssetError::unsupported_type(key))?;
        Ok(Task::new(key.clone(), loader, stream))
    }

    pub fn load_inline(&self, key: &AssetKey, stream: AssetStream) -> LoadOutcome {
        self.new_task(key, stream)?.run()
    }
}
