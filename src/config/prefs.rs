//! Preference store: `{enabled, desiredPanel, dwellSeconds}` under a fixed key.
//!
//! The JSON store treats its file as a flat key/value map, so the preference
//! record can share storage with other keys. Reads merge over defaults and
//! never fail; writes clamp the dwell time before persisting.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::error::ConfigError;
use crate::models::{PanelKind, Preference};

/// Namespace key of the preference record.
pub const PREF_KEY: &str = "persistent-sidebar-panel-prefs";

/// External key/value holder for the user's preference.
pub trait PreferenceStore: Send + Sync {
    /// Current preference, merged over defaults.
    fn get(&self) -> Preference;

    /// Persist a preference; returns the value actually stored.
    fn set(&self, prefs: Preference) -> Result<Preference, ConfigError>;
}

/// On-disk shape, tolerant of the legacy key names.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct StoredPreference {
    #[serde(alias = "autoRestoreEnabled")]
    enabled: Option<bool>,
    #[serde(alias = "autoRestorePanel")]
    desired_panel: Option<String>,
    #[serde(alias = "autoRestoreTimeout")]
    dwell_seconds: Option<Value>,
}

impl StoredPreference {
    fn into_preference(self) -> Preference {
        let defaults = Preference::default();
        let desired_panel = self.desired_panel.and_then(|label| {
            let kind = PanelKind::from_label(&label);
            if kind.is_none() && !label.trim().is_empty() {
                log::warn!(target: "pinned_panel::prefs", "Ignoring unknown panel '{}' in stored preference", label);
            }
            kind
        });
        let dwell_seconds = self
            .dwell_seconds
            .and_then(|v| match v {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            })
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(|secs| secs as u64)
            .unwrap_or(defaults.dwell_seconds);

        Preference {
            enabled: self.enabled.unwrap_or(defaults.enabled),
            desired_panel,
            dwell_seconds,
        }
        .clamped()
    }
}

/// Decode a stored preference record, falling back to defaults on malformed input.
pub fn decode_preference(value: &Value) -> Preference {
    match StoredPreference::deserialize(value) {
        Ok(stored) => stored.into_preference(),
        Err(e) => {
            log::warn!(target: "pinned_panel::prefs", "Malformed preference record, using defaults: {}", e);
            Preference::default()
        }
    }
}

/// JSON file acting as a key/value store.
pub struct JsonPreferenceStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonPreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonPreferenceStore {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Store at the default location (~/.config/pinned-panel/storage.json).
    pub fn open_default() -> Result<Self, ConfigError> {
        Ok(Self::new(super::loader::get_preference_storage_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Map<String, Value> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(_) => return Map::new(),
        };
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                log::warn!(
                    target: "pinned_panel::prefs",
                    "Storage file {} is not a JSON object, treating as empty",
                    self.path.display()
                );
                Map::new()
            }
        }
    }
}

impl PreferenceStore for JsonPreferenceStore {
    fn get(&self) -> Preference {
        match self.read_map().get(PREF_KEY) {
            // Older builds stored the record as a JSON string, like localStorage.
            Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
                Ok(value) => decode_preference(&value),
                Err(e) => {
                    log::warn!(target: "pinned_panel::prefs", "Stored preference is not JSON, using defaults: {}", e);
                    Preference::default()
                }
            },
            Some(value) => decode_preference(value),
            None => Preference::default(),
        }
    }

    fn set(&self, prefs: Preference) -> Result<Preference, ConfigError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let stored = prefs.clamped();
        let mut map = self.read_map();
        map.insert(PREF_KEY.to_string(), serde_json::to_value(stored)?);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, serde_json::to_string_pretty(&Value::Object(map))?)?;
        log::debug!(target: "pinned_panel::prefs", "Saved preference {:?} to {}", stored, self.path.display());
        Ok(stored)
    }
}

/// Process-local store.
#[derive(Default)]
pub struct MemoryPreferenceStore {
    value: Mutex<Preference>,
}

impl MemoryPreferenceStore {
    pub fn new(initial: Preference) -> Self {
        MemoryPreferenceStore {
            value: Mutex::new(initial.clamped()),
        }
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self) -> Preference {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, prefs: Preference) -> Result<Preference, ConfigError> {
        let stored = prefs.clamped();
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = stored;
        Ok(stored)
    }
}
