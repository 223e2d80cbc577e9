// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory config store fake for testing without filesystem I/O.

use epa_app_core::config::{ConfigError, ConfigStore};
use epa_app_core::settings::{ControllerSettings, CONTROLLER_KEY};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// In-memory implementation of [`ConfigStore`] for testing.
///
/// Clones share state. Every `load_raw`/`save_raw` attempt is counted,
/// including those that fail.
///
/// # Example
///
/// ```
/// use epa_dry_tests::InMemoryConfigStore;
/// use epa_app_core::config::ConfigService;
/// use epa_app_core::settings::ControllerSettings;
///
/// let store = InMemoryConfigStore::new();
/// let service = ConfigService::new(store.clone());
///
/// let settings: ControllerSettings = service.load_or_init("controller").unwrap();
/// assert_eq!(settings, ControllerSettings::default());
/// assert_eq!(store.save_count(), 1);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryConfigStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    data: HashMap<String, Vec<u8>>,
    load_count: usize,
    save_count: usize,
    fail_on_load: bool,
    fail_on_save: bool,
}

impl InMemoryConfigStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding `settings` under the controller key.
    pub fn with_settings(settings: &ControllerSettings) -> Self {
        let store = Self::new();
        if let Ok(bytes) = serde_json::to_vec(settings) {
            store.inner().data.insert(CONTROLLER_KEY.into(), bytes);
        }
        store
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every load fail with [`ConfigError::Other`].
    pub fn set_fail_on_load(&self, fail: bool) {
        self.inner().fail_on_load = fail;
    }

    /// Make every save fail with [`ConfigError::Other`].
    pub fn set_fail_on_save(&self, fail: bool) {
        self.inner().fail_on_save = fail;
    }

    /// `load_raw` attempts so far.
    pub fn load_count(&self) -> usize {
        self.inner().load_count
    }

    /// `save_raw` attempts so far.
    pub fn save_count(&self) -> usize {
        self.inner().save_count
    }

    /// Raw blob under `key`.
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.inner().data.get(key).cloned()
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        let mut inner = self.inner();
        inner.load_count += 1;
        if inner.fail_on_load {
            return Err(ConfigError::Other("simulated load failure".into()));
        }
        inner.data.get(key).cloned().ok_or(ConfigError::NotFound)
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let mut inner = self.inner();
        inner.save_count += 1;
        if inner.fail_on_save {
            return Err(ConfigError::Other("simulated save failure".into()));
        }
        inner.data.insert(key.to_string(), data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use epa_app_core::config::ConfigService;

    #[test]
    fn stored_settings_win_over_defaults() {
        let mut settings = ControllerSettings::default();
        settings.socket_path = "/run/epa.sock".into();
        let store = InMemoryConfigStore::with_settings(&settings);
        let service = ConfigService::new(store.clone());
        let loaded: ControllerSettings = service.load_or_init(CONTROLLER_KEY).unwrap();
        assert_eq!(loaded.socket_path, "/run/epa.sock");
        assert_eq!(store.save_count(), 0);
    }

    #[test]
    fn missing_settings_are_persisted_once() {
        let store = InMemoryConfigStore::new();
        let service = ConfigService::new(store.clone());
        let _: ControllerSettings = service.load_or_init(CONTROLLER_KEY).unwrap();
        let _: ControllerSettings = service.load_or_init(CONTROLLER_KEY).unwrap();
        assert_eq!(store.save_count(), 1);
        assert!(store.raw(CONTROLLER_KEY).is_some());
    }

    #[test]
    fn failures_are_counted_and_nothing_is_stored() {
        let store = InMemoryConfigStore::new();
        store.set_fail_on_save(true);
        assert!(matches!(
            store.save_raw("k", b"v"),
            Err(ConfigError::Other(_))
        ));
        assert_eq!(store.save_count(), 1);
        assert!(store.raw("k").is_none());

        store.set_fail_on_load(true);
        let service = ConfigService::new(store.clone());
        assert!(service.load::<ControllerSettings>(CONTROLLER_KEY).is_err());
    }
}
