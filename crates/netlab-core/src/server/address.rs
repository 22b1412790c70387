//! Canonical server URLs and the string forms accepted for server lookup.
//!
//! Identity URLs look like `http://[user@]host:port`. Servers reached
//! through an ssh tunnel also carry the ssh port in the authority:
//! `ssh://[user@]host:ssh_port:port`. Both directions are handled here so
//! that a URL produced by [`server_url`] always parses back to the same
//! descriptor.

use crate::server::descriptor::{ConnectOptions, Protocol, ServerDescriptor, DEFAULT_SSH_PORT};
use crate::server::error::ServerError;

use url::{Host, Url};

/// Token that designates the local server in server strings.
pub const LOCAL_SERVER_TOKEN: &str = "local";

/// Build the canonical identity URL for a server.
pub fn server_url(
    protocol: Protocol,
    host: &str,
    port: u16,
    user: Option<&str>,
    ssh_port: Option<u16>,
) -> String {
    let user = match user {
        Some(u) if !u.is_empty() => format!("{}@", u),
        _ => String::new(),
    };
    let host = format_host(host);
    match protocol {
        Protocol::Ssh => format!(
            "ssh://{}{}:{}:{}",
            user,
            host,
            ssh_port.unwrap_or(DEFAULT_SSH_PORT),
            port
        ),
        _ => format!("{}://{}{}:{}", protocol, user, host, port),
    }
}

/// IPv6 literals need brackets to stay unambiguous next to the port.
fn format_host(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]", host)
    } else {
        host.to_string()
    }
}

/// Result of parsing a server string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerSpec {
    Local,
    Remote(ServerDescriptor),
}

/// Parse the three accepted server string shapes: the `local` token, a full
/// URL, or a bare `host:port` pair (http, no user).
pub fn parse_server_string(input: &str) -> Result<ServerSpec, ServerError> {
    let input = input.trim();
    if input == LOCAL_SERVER_TOKEN {
        return Ok(ServerSpec::Local);
    }
    if input.is_empty() {
        return Err(ServerError::parse(input, "empty server string"));
    }

    let descriptor = match input.split_once("://") {
        Some((scheme, rest)) => match Protocol::from_scheme(scheme)? {
            Protocol::Ssh => parse_ssh_authority(input, rest)?,
            protocol => parse_http_url(input, rest, protocol)?,
        },
        None => parse_host_port(input)?,
    };
    Ok(ServerSpec::Remote(descriptor))
}

fn parse_http_url(
    input: &str,
    rest: &str,
    protocol: Protocol,
) -> Result<ServerDescriptor, ServerError> {
    // `Url` hides the scheme's default port, so look at the authority itself
    if !has_explicit_port(rest) {
        return Err(ServerError::parse(input, "missing port"));
    }
    let url = Url::parse(input).map_err(|e| ServerError::parse(input, e.to_string()))?;
    let host = match url.host() {
        Some(Host::Domain(domain)) => domain.to_string(),
        Some(Host::Ipv4(addr)) => addr.to_string(),
        Some(Host::Ipv6(addr)) => addr.to_string(),
        None => return Err(ServerError::parse(input, "missing host")),
    };
    let port = url
        .port_or_known_default()
        .ok_or_else(|| ServerError::parse(input, "missing port"))?;
    let user = Some(url.username().to_string());
    Ok(ServerDescriptor::new(protocol, host, port).with_user(user))
}

/// Whether `[user@]host:port[/path]` ends its host part with a port.
fn has_explicit_port(rest: &str) -> bool {
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = match authority.rsplit_once('@') {
        Some((_, tail)) => tail,
        None => authority,
    };
    let after_host = match host_port.rsplit_once(']') {
        Some((_, tail)) => tail,
        None => host_port,
    };
    match after_host.rsplit_once(':') {
        Some((_, port)) => !port.is_empty(),
        None => false,
    }
}

/// `[user@]host:ssh_port:port`, optionally followed by a path.
fn parse_ssh_authority(input: &str, rest: &str) -> Result<ServerDescriptor, ServerError> {
    let authority = rest.split('/').next().unwrap_or_default();
    let (user, host_ports) = match authority.rsplit_once('@') {
        Some((user, tail)) => (Some(user.to_string()), tail),
        None => (None, authority),
    };

    let (host, ports) = if let Some(bracketed) = host_ports.strip_prefix('[') {
        let (host, tail) = bracketed
            .split_once(']')
            .ok_or_else(|| ServerError::parse(input, "unterminated IPv6 address"))?;
        let ports = tail
            .strip_prefix(':')
            .ok_or_else(|| ServerError::parse(input, "expected host:ssh_port:port"))?;
        (host, ports)
    } else {
        host_ports
            .split_once(':')
            .ok_or_else(|| ServerError::parse(input, "expected host:ssh_port:port"))?
    };

    let (ssh_port, port) = ports
        .split_once(':')
        .ok_or_else(|| ServerError::parse(input, "expected host:ssh_port:port"))?;
    if host.is_empty() {
        return Err(ServerError::parse(input, "missing host"));
    }

    let ssh_port = parse_port(input, ssh_port)?;
    let port = parse_port(input, port)?;
    Ok(ServerDescriptor::new(Protocol::Ssh, host, port)
        .with_user(user)
        .with_options(ConnectOptions {
            ssh_port: Some(ssh_port),
            ssh_key: None,
        }))
}

fn parse_host_port(input: &str) -> Result<ServerDescriptor, ServerError> {
    let (host, port) = if let Some(bracketed) = input.strip_prefix('[') {
        let (host, tail) = bracketed
            .split_once(']')
            .ok_or_else(|| ServerError::parse(input, "unterminated IPv6 address"))?;
        let port = tail
            .strip_prefix(':')
            .ok_or_else(|| ServerError::parse(input, "expected host:port"))?;
        (host, port)
    } else {
        let mut parts = input.split(':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(host), Some(port), None) => (host, port),
            _ => return Err(ServerError::parse(input, "expected host:port")),
        }
    };
    if host.is_empty() {
        return Err(ServerError::parse(input, "missing host"));
    }
    let port = parse_port(input, port)?;
    Ok(ServerDescriptor::new(Protocol::Http, host, port))
}

fn parse_port(input: &str, port: &str) -> Result<u16, ServerError> {
    port.trim()
        .parse()
        .map_err(|_| ServerError::parse(input, format!("invalid port '{}'", port)))
}
