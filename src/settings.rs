/*
 * SPDX-FileCopyrightText: 2022 perillamint
 *
 * SPDX-License-Identifier: MPL-2.0
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::catalog::CommandCatalog;
use crate::error::RemoteError;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Flat string key/value persistence for the command catalog.
pub trait KeyValueStore {
    /// Load every persisted pair. An empty store yields an empty map.
    fn load(&self) -> Result<BTreeMap<String, String>, RemoteError>;
    /// Replace the persisted pairs.
    fn save(&self, entries: &BTreeMap<String, String>) -> Result<(), RemoteError>;
    /// Drop every persisted override.
    fn clear(&self) -> Result<(), RemoteError>;
}

/// Pairs kept as one JSON object on disk.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/ble-remote/commands.json`
    pub fn default_location() -> Result<Self, RemoteError> {
        let mut path = dirs::config_dir().ok_or_else(|| {
            RemoteError::Storage("Could not determine config directory".to_string())
        })?;
        path.push("ble-remote");
        path.push("commands.json");
        Ok(Self::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStore for JsonFileStore {
    fn load(&self) -> Result<BTreeMap<String, String>, RemoteError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(RemoteError::Storage(e.to_string())),
        };
        serde_json::from_str(&contents).map_err(|e| RemoteError::Storage(e.to_string()))
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<(), RemoteError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| RemoteError::Storage(e.to_string()))?;
        }
        let json =
            serde_json::to_string_pretty(entries).map_err(|e| RemoteError::Storage(e.to_string()))?;
        fs::write(&self.path, json).map_err(|e| RemoteError::Storage(e.to_string()))
    }

    fn clear(&self) -> Result<(), RemoteError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RemoteError::Storage(e.to_string())),
        }
    }
}

/// In-process store. Clones share the same backing map, which lets a test
/// drop one `CatalogSettings` and load a fresh one as if after a restart.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryStore {
    fn entries(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>, RemoteError> {
        self.entries
            .lock()
            .map_err(|_| RemoteError::Storage("Lock error".to_string()))
    }
}

impl KeyValueStore for MemoryStore {
    fn load(&self) -> Result<BTreeMap<String, String>, RemoteError> {
        Ok(self.entries()?.clone())
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<(), RemoteError> {
        *self.entries()? = entries.clone();
        Ok(())
    }

    fn clear(&self) -> Result<(), RemoteError> {
        self.entries()?.clear();
        Ok(())
    }
}

/// Owner of the live catalog and its persistence.
pub struct CatalogSettings<S: KeyValueStore> {
    store: S,
    catalog: CommandCatalog,
}

impl<S: KeyValueStore> CatalogSettings<S> {
    /// Load once at startup. A failing store leaves the compiled defaults.
    pub fn new(store: S) -> Self {
        let mut settings = Self {
            store,
            catalog: CommandCatalog::default(),
        };
        if let Err(e) = settings.load_settings() {
            warn!("Failed to load command catalog, using defaults: {}", e);
        }
        settings
    }

    pub fn load_settings(&mut self) -> Result<&CommandCatalog, RemoteError> {
        let pairs = self.store.load()?;
        debug!("Loaded {} persisted catalog entries", pairs.len());
        self.catalog = CommandCatalog::from_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        Ok(&self.catalog)
    }

    pub fn update_settings(&mut self, catalog: CommandCatalog) -> Result<(), RemoteError> {
        catalog.validate()?;
        self.store.save(&catalog.to_pairs())?;
        self.catalog = catalog;
        info!("Command catalog updated");
        Ok(())
    }

    pub fn reset_to_defaults(&mut self) -> Result<(), RemoteError> {
        self.store.clear()?;
        self.catalog = CommandCatalog::default();
        info!("Command catalog reset to defaults");
        Ok(())
    }

    pub fn catalog(&self) -> &CommandCatalog {
        &self.catalog
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::catalog::CommandKey;

    fn custom_catalog() -> CommandCatalog {
        let mut catalog = CommandCatalog::default();
        catalog.set(CommandKey::JoystickForward, "FWD\n").unwrap();
        catalog.set(CommandKey::SpeedTemplate, "S={level}").unwrap();
        catalog
    }

    #[test]
    fn update_survives_restart() {
        let store = MemoryStore::default();
        let mut settings = CatalogSettings::new(store.clone());
        settings.update_settings(custom_catalog()).unwrap();
        drop(settings);

        let mut restarted = CatalogSettings::new(store);
        assert_eq!(restarted.load_settings().unwrap(), &custom_catalog());
    }

    #[test]
    fn reset_restores_defaults() {
        let store = MemoryStore::default();
        let mut settings = CatalogSettings::new(store.clone());
        settings.update_settings(custom_catalog()).unwrap();
        settings.reset_to_defaults().unwrap();
        assert_eq!(settings.load_settings().unwrap(), &CommandCatalog::default());
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn invalid_persisted_value_falls_back() {
        let store = MemoryStore::default();
        let mut settings = CatalogSettings::new(store.clone());
        let mut pairs = CommandCatalog::default().to_pairs();
        pairs.insert("speedTemplate".to_string(), "FAST".to_string());
        store.save(&pairs).unwrap();

        // The persisted value is invalid, so loading falls back for that key.
        let catalog = settings.load_settings().unwrap().clone();
        assert_eq!(catalog.get(CommandKey::SpeedTemplate), "SPEED_{level}");
        assert_eq!(catalog, CommandCatalog::default());
    }

    #[test]
    fn json_file_round_trip() {
        let dir = std::env::temp_dir().join(format!(
            "ble-remote-test-{}-{}",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let path = dir.join("commands.json");

        let mut settings = CatalogSettings::new(JsonFileStore::new(&path));
        assert_eq!(settings.catalog(), &CommandCatalog::default());
        settings.update_settings(custom_catalog()).unwrap();

        let mut restarted = CatalogSettings::new(JsonFileStore::new(&path));
        assert_eq!(restarted.load_settings().unwrap(), &custom_catalog());
        restarted.reset_to_defaults().unwrap();
        assert!(!path.exists());
        assert_eq!(restarted.load_settings().unwrap(), &CommandCatalog::default());

        let _ = fs::remove_dir_all(dir);
    }
}
