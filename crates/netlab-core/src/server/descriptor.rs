use crate::server::address::server_url;
use crate::server::error::ServerError;

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Port used for ssh tunnels when a descriptor does not name one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Transport used to reach a backend server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
    Ssh,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Ssh => "ssh",
        }
    }

    /// Map a URL scheme onto a protocol (case-insensitive).
    pub fn from_scheme(scheme: &str) -> Result<Self, ServerError> {
        match scheme.to_ascii_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            "ssh" => Ok(Protocol::Ssh),
            _ => Err(ServerError::UnsupportedProtocol(scheme.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extra connection parameters that are not part of the http identity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    pub ssh_port: Option<u16>,
    pub ssh_key: Option<String>,
}

/// Everything needed to reach one backend server.
///
/// Persisted as an entry of the `RemoteServers` list. The canonical URL
/// returned by [`ServerDescriptor::url`] is the identity key used by the
/// registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    #[serde(default)]
    pub protocol: Protocol,
    pub host: String,
    /// Older settings files store the port as a string.
    #[serde(deserialize_with = "deserialize_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<String>,
}

impl ServerDescriptor {
    pub fn new(protocol: Protocol, host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol,
            host: host.into(),
            port,
            user: None,
            password: None,
            ssh_port: None,
            ssh_key: None,
        }
    }

    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user.filter(|u| !u.is_empty());
        self
    }

    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }

    pub fn with_options(mut self, options: ConnectOptions) -> Self {
        self.ssh_port = options.ssh_port;
        self.ssh_key = options.ssh_key;
        self
    }

    /// Canonical identity URL of this server.
    pub fn url(&self) -> String {
        server_url(
            self.protocol,
            &self.host,
            self.port,
            self.user.as_deref(),
            self.ssh_port,
        )
    }
}

fn deserialize_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawPort {
        Number(u16),
        Text(String),
    }

    match RawPort::deserialize(deserializer)? {
        RawPort::Number(port) => Ok(port),
        RawPort::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid port '{}'", text))),
    }
}
