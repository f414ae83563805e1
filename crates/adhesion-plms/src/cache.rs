//! Process scoped cache of loaded embedding models.
//!
//! Models are keyed by `(model_name, device)`. Every key has its own slot lock
//! so concurrent first requests for the same key load it once, while loads of
//! different keys proceed in parallel. A failed load leaves the slot empty and
//! the next request tries again.
use crate::device::DeviceSpec;
use crate::embedder::EmbeddingModel;
use crate::error::ModelLoadError;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub type ModelHandle = Arc<dyn EmbeddingModel>;

/// Loads a model on a device. Called at most once per key while it stays cached.
pub trait ModelLoader: Send + Sync {
    fn load(&self, model_name: &str, device: DeviceSpec) -> Result<ModelHandle, ModelLoadError>;
}

impl<F> ModelLoader for F
where
    F: Fn(&str, DeviceSpec) -> Result<ModelHandle, ModelLoadError> + Send + Sync,
{
    fn load(&self, model_name: &str, device: DeviceSpec) -> Result<ModelHandle, ModelLoadError> {
        self(model_name, device)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelKey {
    pub model_name: String,
    pub device: DeviceSpec,
}

struct CachedModel {
    model: ModelHandle,
    last_used: Instant,
}

type Slot = Arc<Mutex<Option<CachedModel>>>;

pub struct ModelCache {
    loader: Box<dyn ModelLoader>,
    entries: Mutex<HashMap<ModelKey, Slot>>,
}

// A panicking loader never stores a partial entry, so poisoned data is still valid.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ModelCache {
    pub fn new(loader: impl ModelLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, key: &ModelKey) -> Slot {
        let mut entries = lock(&self.entries);
        Arc::clone(entries.entry(key.clone()).or_default())
    }

    // Whether `slot` is still the entry for `key`; an eviction may have
    // replaced it while we waited for its lock.
    fn is_current(&self, key: &ModelKey, slot: &Slot) -> bool {
        lock(&self.entries)
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    fn remove_slot(&self, key: &ModelKey, slot: &Slot) {
        let mut entries = lock(&self.entries);
        if entries.get(key).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            entries.remove(key);
        }
    }

    /// Return the cached model for the key, loading it on first use.
    pub fn get_model(&self, model_name: &str, device: DeviceSpec) -> Result<ModelHandle, ModelLoadError> {
        let key = ModelKey {
            model_name: model_name.to_string(),
            device,
        };
        loop {
            let slot = self.slot(&key);
            let mut guard = lock(&slot);
            if !self.is_current(&key, &slot) {
                continue;
            }
            if let Some(cached) = guard.as_mut() {
                cached.last_used = Instant::now();
                debug!(model = model_name, %device, "model cache hit");
                return Ok(Arc::clone(&cached.model));
            }

            info!(model = model_name, %device, "loading model");
            let start = Instant::now();
            let model = match self.loader.load(model_name, device) {
                Ok(model) => model,
                Err(e) => {
                    self.remove_slot(&key, &slot);
                    return Err(e);
                }
            };
            info!(
                model = model_name,
                %device,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "model loaded"
            );
            *guard = Some(CachedModel {
                model: Arc::clone(&model),
                last_used: Instant::now(),
            });
            return Ok(model);
        }
    }

    /// Drop the entry for a key. Handles already given out stay valid.
    pub fn evict(&self, model_name: &str, device: DeviceSpec) -> bool {
        let key = ModelKey {
            model_name: model_name.to_string(),
            device,
        };
        let removed = lock(&self.entries).remove(&key);
        removed.is_some_and(|slot| lock(&slot).is_some())
    }

    /// Drop every loaded entry unused for longer than `max_idle`. Entries that
    /// are being loaded are skipped. Returns the number evicted.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|key, slot| {
            let guard = match slot.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return true,
            };
            let keep = match guard.as_ref() {
                Some(cached) => cached.last_used.elapsed() <= max_idle,
                None => false,
            };
            if !keep {
                debug!(model = %key.model_name, device = %key.device, "evicting idle model");
            }
            keep
        });
        before - entries.len()
    }

    pub fn last_used(&self, model_name: &str, device: DeviceSpec) -> Option<Instant> {
        let key = ModelKey {
            model_name: model_name.to_string(),
            device,
        };
        let slot = lock(&self.entries).get(&key).cloned()?;
        let guard = lock(&slot);
        guard.as_ref().map(|cached| cached.last_used)
    }

    pub fn contains(&self, model_name: &str, device: DeviceSpec) -> bool {
        self.last_used(model_name, device).is_some()
    }

    /// Number of loaded models.
    pub fn len(&self) -> usize {
        let slots: Vec<Slot> = lock(&self.entries).values().cloned().collect();
        slots.iter().filter(|slot| lock(slot).is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<ModelKey> = lock(&self.entries).keys().cloned().collect();
        f.debug_struct("ModelCache").field("keys", &keys).finish()
    }
}
