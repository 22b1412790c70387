use crate::settings::local::LocalServerSettings;
use crate::settings::server_config;
use netlab_core::ServerDescriptor;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

const LOCAL_SERVER_SECTION: &str = "LocalServer";
const REMOTE_SERVERS_SECTION: &str = "RemoteServers";
const SERVER_CONFIG_SECTION: &str = "Server";

/// Settings read from the config store.
#[derive(Clone, Debug, Default)]
pub struct StoredSettings {
    pub local: LocalServerSettings,
    pub remotes: Vec<ServerDescriptor>,
}

/// Location of the client settings file and the backend config file.
#[derive(Clone, Debug)]
pub struct SettingsStore {
    settings_path: PathBuf,
    server_config_path: PathBuf,
}

/// Get the config directory path
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("netlab")
}

impl SettingsStore {
    pub fn default_location() -> Self {
        Self::in_dir(&config_dir())
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self {
            settings_path: dir.join("settings.json"),
            server_config_path: dir.join("gns3_server.conf"),
        }
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    pub fn server_config_path(&self) -> &Path {
        &self.server_config_path
    }

    /// Load stored settings. Never fails: unreadable or invalid data falls
    /// back to defaults, and a damaged section only loses the bad keys.
    pub fn load(&self) -> StoredSettings {
        let path = &self.settings_path;
        if !path.exists() {
            log::info!("Settings file not found at {}, using defaults", path.display());
            return StoredSettings::default();
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                log::error!("Failed to read settings file {}: {}", path.display(), e);
                return StoredSettings::default();
            }
        };

        let root = match parse_root(&content) {
            Ok(root) => root,
            Err(e) => {
                log::error!("Failed to parse settings file {}: {:#}", path.display(), e);
                return StoredSettings::default();
            }
        };

        StoredSettings {
            local: root
                .get(LOCAL_SERVER_SECTION)
                .map(load_local_section)
                .unwrap_or_default(),
            remotes: root
                .get(REMOTE_SERVERS_SECTION)
                .map(load_remote_section)
                .unwrap_or_default(),
        }
    }

    /// Write both sections to the settings file, keeping unrelated
    /// top-level keys, then the `[Server]` section of the backend config.
    pub fn save(&self, local: &LocalServerSettings, remotes: &[ServerDescriptor]) -> Result<()> {
        let mut root = match std::fs::read_to_string(&self.settings_path) {
            Ok(content) => parse_root(&content).unwrap_or_else(|e| {
                log::warn!("Overwriting unparsable settings file: {:#}", e);
                Map::new()
            }),
            Err(_) => Map::new(),
        };
        root.insert(
            LOCAL_SERVER_SECTION.to_string(),
            serde_json::to_value(local).context("Failed to serialize local server settings")?,
        );
        root.insert(
            REMOTE_SERVERS_SECTION.to_string(),
            serde_json::to_value(remotes).context("Failed to serialize remote servers")?,
        );

        if let Some(parent) = self.settings_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(&Value::Object(root))?;
        std::fs::write(&self.settings_path, content)
            .with_context(|| format!("Failed to write {}", self.settings_path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(
                &self.settings_path,
                std::fs::Permissions::from_mode(0o600),
            );
        }

        server_config::save_section(
            &self.server_config_path,
            SERVER_CONFIG_SECTION,
            &local.server_config_entries(),
        )
    }
}

fn parse_root(content: &str) -> Result<Map<String, Value>> {
    let value: Value = serde_json::from_str(content).context("Settings file is not valid JSON")?;
    match value {
        Value::Object(map) => Ok(map),
        _ => anyhow::bail!("Settings file root is not a JSON object"),
    }
}

fn load_local_section(value: &Value) -> LocalServerSettings {
    match serde_json::from_value::<LocalServerSettings>(value.clone()) {
        Ok(settings) => settings,
        Err(e) => {
            log::warn!("Failed to parse local server settings: {}, attempting partial recovery", e);
            recover_local_section(value)
        }
    }
}

/// Apply the stored keys one by one on top of the defaults, skipping every
/// key whose value does not parse.
fn recover_local_section(value: &Value) -> LocalServerSettings {
    let Some(stored) = value.as_object() else {
        log::warn!("Local server settings are not a JSON object, using defaults");
        return LocalServerSettings::default();
    };
    let mut merged = match serde_json::to_value(LocalServerSettings::default()) {
        Ok(Value::Object(map)) => map,
        _ => return LocalServerSettings::default(),
    };

    for (key, v) in stored {
        if !merged.contains_key(key) {
            continue;
        }
        let mut candidate = merged.clone();
        candidate.insert(key.clone(), v.clone());
        if serde_json::from_value::<LocalServerSettings>(Value::Object(candidate.clone())).is_ok() {
            merged = candidate;
        } else {
            log::warn!("Could not parse local server setting {}, using default", key);
        }
    }

    serde_json::from_value(Value::Object(merged)).unwrap_or_default()
}

fn load_remote_section(value: &Value) -> Vec<ServerDescriptor> {
    let Some(entries) = value.as_array() else {
        log::warn!("Remote servers setting is not a list, ignoring it");
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| match serde_json::from_value::<ServerDescriptor>(entry.clone()) {
            Ok(descriptor) => Some(descriptor),
            Err(e) => {
                log::warn!("Skipping invalid remote server entry {}: {}", entry, e);
                None
            }
        })
        .collect()
}
