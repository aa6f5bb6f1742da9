//! Hot-swappable setting cells
//!
//! A [`DynamicSetting`] holds the current value of one settings group behind an
//! atomic snapshot pointer. Readers take a cheap `Arc` snapshot and never block
//! writers for longer than a pointer swap. Writers go through
//! [`DynamicSetting::set_value`], which:
//!
//! 1. compares the new value with the current one (equal values are a no-op),
//! 2. notifies every observer with `(old, new)` *before* the swap,
//! 3. on the first rejecting observer, replays `(new, old)` to the observers
//!    that already accepted (in reverse order) and leaves the value untouched,
//! 4. otherwise swaps the value, bumps the version and returns a diff string.
//!
//! Every holder of the same `Arc<DynamicSetting<T>>` sees the new value on its
//! next read.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

/// Errors raised by setting validation or observers
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingError {
    /// An observer refused the update
    #[error("observer rejected {setting} update: {reason}")]
    Rejected {
        setting: &'static str,
        reason: String,
    },

    /// A settings value failed validation
    #[error("invalid {setting}: {reason}")]
    Invalid {
        setting: &'static str,
        reason: String,
    },
}

/// A settings group that can live inside a [`DynamicSetting`].
pub trait SettingValue: Clone + PartialEq + Debug + Send + Sync + 'static {
    /// Name used in diffs and log records
    const NAME: &'static str;

    /// Field-level differences against `old`, formatted as `field=old->new`.
    fn diff_fields(&self, old: &Self) -> Vec<String>;
}

/// Format one changed field, or nothing when unchanged.
pub(crate) fn diff_field<V: PartialEq + Debug>(name: &str, old: &V, new: &V) -> Option<String> {
    (old != new).then(|| format!("{name}={old:?}->{new:?}"))
}

/// Handle returned by [`DynamicSetting::register_observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer<T> = Arc<dyn Fn(&T, &T) -> Result<(), SettingError> + Send + Sync>;

/// Hot-swappable settings cell with observer notification
pub struct DynamicSetting<T: SettingValue> {
    current: RwLock<Arc<T>>,
    version: AtomicU64,
    observers: Mutex<Vec<(ObserverId, Observer<T>)>>,
    next_observer: AtomicU64,
    update_lock: Mutex<()>,
}

impl<T: SettingValue> DynamicSetting<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(value)),
            version: AtomicU64::new(0),
            observers: Mutex::new(Vec::new()),
            next_observer: AtomicU64::new(0),
            update_lock: Mutex::new(()),
        }
    }

    /// Snapshot of the current value
    pub fn get(&self) -> Arc<T> {
        Arc::clone(&self.current.read())
    }

    /// Number of committed updates since construction
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Register an observer called with `(old, new)` before every change.
    ///
    /// Returning an error aborts the update.
    pub fn register_observer<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&T, &T) -> Result<(), SettingError> + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::Relaxed));
        self.observers.lock().push((id, Arc::new(observer)));
        id
    }

    /// Remove a previously registered observer. Returns false when unknown.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(observer_id, _)| *observer_id != id);
        observers.len() != before
    }

    /// Replace the value.
    ///
    /// Returns the diff (`name(field=old->new,...)`), or an empty string when
    /// nothing changed or an observer rejected the update.
    pub fn set_value(&self, new_value: T) -> String {
        match self.try_set_value(new_value) {
            Ok(diff) => diff,
            Err(err) => {
                warn!(setting = T::NAME, error = %err, "setting update aborted");
                String::new()
            }
        }
    }

    /// Like [`set_value`](Self::set_value) but surfaces observer rejection.
    pub fn try_set_value(&self, new_value: T) -> Result<String, SettingError> {
        let _update = self.update_lock.lock();
        let old_value = self.get();
        if *old_value == new_value {
            return Ok(String::new());
        }

        // Observers may take their own locks; never call them under ours.
        let observers: Vec<Observer<T>> = self
            .observers
            .lock()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        for (notified, observer) in observers.iter().enumerate() {
            if let Err(err) = observer(&old_value, &new_value) {
                for accepted in observers[..notified].iter().rev() {
                    if let Err(rollback_err) = accepted(&new_value, &old_value) {
                        warn!(setting = T::NAME, error = %rollback_err, "observer rollback failed");
                    }
                }
                return Err(err);
            }
        }

        let diff = format!("{}({})", T::NAME, new_value.diff_fields(&old_value).join(","));
        *self.current.write() = Arc::new(new_value);
        self.version.fetch_add(1, Ordering::AcqRel);
        debug!(setting = T::NAME, %diff, "setting updated");
        Ok(diff)
    }
}

impl<T: SettingValue> Debug for DynamicSetting<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicSetting")
            .field("value", &*self.get())
            .field("version", &self.version())
            .finish()
    }
}
