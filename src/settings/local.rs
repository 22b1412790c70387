use crate::servers::discovery::{self, PlatformHints};

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

/// Length of the generated local server credentials.
const CREDENTIAL_LENGTH: usize = 64;

/// Settings of the local backend server (`LocalServer` section).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    /// Empty when not generated yet
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,

    /// Path to the server executable, empty when unknown
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub ubridge_path: String,

    #[serde(default)]
    pub allow_console_from_anywhere: bool,
    #[serde(default = "default_true")]
    pub auto_start: bool,

    #[serde(default = "default_images_path")]
    pub images_path: String,
    #[serde(default = "default_projects_path")]
    pub projects_path: String,

    #[serde(default = "default_console_start_port")]
    pub console_start_port_range: u16,
    #[serde(default = "default_console_end_port")]
    pub console_end_port_range: u16,
    #[serde(default = "default_udp_start_port")]
    pub udp_start_port_range: u16,
    #[serde(default = "default_udp_end_port")]
    pub udp_end_port_range: u16,

    #[serde(default = "default_true")]
    pub report_errors: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3080
}

fn default_true() -> bool {
    true
}

fn default_data_dir(name: &str) -> String {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("GNS3")
        .join(name)
        .to_string_lossy()
        .into_owned()
}

fn default_images_path() -> String {
    default_data_dir("images")
}

fn default_projects_path() -> String {
    default_data_dir("projects")
}

fn default_console_start_port() -> u16 {
    2000
}

fn default_console_end_port() -> u16 {
    5000
}

fn default_udp_start_port() -> u16 {
    10000
}

fn default_udp_end_port() -> u16 {
    20000
}

impl Default for LocalServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: String::new(),
            password: String::new(),
            path: String::new(),
            ubridge_path: String::new(),
            allow_console_from_anywhere: false,
            auto_start: true,
            images_path: default_images_path(),
            projects_path: default_projects_path(),
            console_start_port_range: default_console_start_port(),
            console_end_port_range: default_console_end_port(),
            udp_start_port_range: default_udp_start_port(),
            udp_end_port_range: default_udp_end_port(),
            report_errors: true,
        }
    }
}

impl LocalServerSettings {
    /// Repair settings after loading: executables that vanished are looked
    /// up again and missing credentials are generated.
    pub fn heal(&mut self, hints: &PlatformHints) {
        if !Path::new(&self.path).exists() {
            self.path = path_string(discovery::find_local_server(hints));
        }
        if !Path::new(&self.ubridge_path).exists() {
            self.ubridge_path = path_string(discovery::find_ubridge(hints));
        }
        if !self.has_credentials() {
            log::info!("Generating credentials for the local server");
            self.user = generate_credential();
            self.password = generate_credential();
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.user.is_empty() && !self.password.is_empty()
    }

    pub fn console_port_range(&self) -> RangeInclusive<u16> {
        self.console_start_port_range..=self.console_end_port_range
    }

    pub fn udp_port_range(&self) -> RangeInclusive<u16> {
        self.udp_start_port_range..=self.udp_end_port_range
    }

    /// Whether switching to `other` requires a new connection handle.
    pub fn endpoint_changed(&self, other: &LocalServerSettings) -> bool {
        self.host != other.host
            || self.port != other.port
            || self.user != other.user
            || self.password != other.password
    }

    /// Ordered `[Server]` entries of the backend configuration file.
    pub fn server_config_entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("host", self.host.clone()),
            ("port", self.port.to_string()),
            ("ubridge_path", self.ubridge_path.clone()),
            ("user", self.user.clone()),
            ("password", self.password.clone()),
            ("images_path", self.images_path.clone()),
            ("projects_path", self.projects_path.clone()),
            ("console_start_port_range", self.console_start_port_range.to_string()),
            ("console_end_port_range", self.console_end_port_range.to_string()),
            ("udp_start_port_range", self.udp_start_port_range.to_string()),
            ("udp_end_port_range", self.udp_end_port_range.to_string()),
            ("report_errors", ini_bool(self.report_errors).to_string()),
        ]
    }
}

fn path_string(path: Option<PathBuf>) -> String {
    path.map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn ini_bool(value: bool) -> &'static str {
    if value { "True" } else { "False" }
}

fn generate_credential() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CREDENTIAL_LENGTH)
        .map(char::from)
        .collect()
}
