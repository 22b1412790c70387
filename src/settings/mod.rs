//! Persistence of the server settings.
//!
//! The client keeps its settings in a JSON file (`LocalServer` and
//! `RemoteServers` sections); part of the local server settings is mirrored
//! into the backend's own INI configuration file.

pub mod local;
pub mod server_config;
pub mod store;

pub use local::LocalServerSettings;
pub use store::{config_dir, SettingsStore, StoredSettings};
