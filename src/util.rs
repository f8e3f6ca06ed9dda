// Target string parsing and host resolution used before a prober is built.

use std::net::IpAddr;
use thiserror::Error;
use trust_dns_resolver::error::ResolveErrorKind;
use trust_dns_resolver::TokioAsyncResolver;

pub const DEFAULT_PORT: u16 = 80;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("Unknown protocol '{0}'")]
    UnknownScheme(String),
    #[error("Missing host in '{0}'")]
    MissingHost(String),
    #[error("Invalid port in '{0}'")]
    InvalidPort(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Host '{0}' not found")]
    NotFound(String),
    #[error("{0}")]
    Other(String),
}

/// Well-known port for a URL scheme.
pub fn well_known_port(scheme: &str) -> Option<u16> {
    let port = match scheme.to_ascii_lowercase().as_str() {
        "http" | "ws" => 80,
        "https" | "wss" => 443,
        "ftp" => 21,
        "ssh" | "sftp" => 22,
        "telnet" => 23,
        "smtp" => 25,
        "dns" | "domain" => 53,
        "gopher" => 70,
        "pop3" => 110,
        "nntp" => 119,
        "imap" => 143,
        "ldap" => 389,
        "smtps" => 465,
        "submission" => 587,
        "ldaps" => 636,
        "imaps" => 993,
        "pop3s" => 995,
        "mysql" => 3306,
        "rdp" => 3389,
        "postgres" | "postgresql" => 5432,
        "redis" => 6379,
        _ => return None,
    };
    Some(port)
}

/// Split `host:port`, keeping bracketed and bare IPv6 literals intact.
pub fn parse_host_port(s: &str, default_port: u16) -> (String, u16) {
    if let Some(rest) = s.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail
                .strip_prefix(':')
                .and_then(|p| p.parse::<u16>().ok())
                .unwrap_or(default_port);
            return (host.to_string(), port);
        }
    }
    if s.parse::<IpAddr>().is_ok() {
        return (s.to_string(), default_port);
    }
    if let Some(idx) = s.rfind(':') {
        if let Ok(port) = s[idx+1..].parse::<u16>() {
            return (s[..idx].to_string(), port);
        }
    }
    (s.to_string(), default_port)
}

/// Turn the positional arguments into a host and port.
///
/// Accepts `host`, `host:port` (only without an explicit port argument) and
/// `scheme://host[:port][/path]`.
pub fn parse_target(input: &str, port_arg: Option<u16>) -> Result<(String, u16), TargetError> {
    if port_arg == Some(0) {
        return Err(TargetError::InvalidPort(input.to_string()));
    }

    if let Some((scheme, rest)) = input.split_once("://") {
        let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
        // drop userinfo
        let authority = authority.rsplit_once('@').map_or(authority, |(_, a)| a);
        let (host, explicit) = {
            let (host, port) = parse_host_port(authority, 0);
            (host, (port != 0).then_some(port))
        };
        if host.is_empty() {
            return Err(TargetError::MissingHost(input.to_string()));
        }
        let port = match port_arg.or(explicit) {
            Some(port) => port,
            None => well_known_port(scheme).ok_or_else(|| TargetError::UnknownScheme(scheme.to_string()))?,
        };
        return Ok((host, port));
    }

    let (host, port) = match port_arg {
        Some(port) => (input.trim_matches(['[', ']']).to_string(), port),
        None => parse_host_port(input, DEFAULT_PORT),
    };
    if host.is_empty() {
        return Err(TargetError::MissingHost(input.to_string()));
    }
    if port == 0 {
        return Err(TargetError::InvalidPort(input.to_string()));
    }
    Ok((host, port))
}

pub async fn resolve_host_to_ip(host: &str) -> Result<IpAddr, ResolveError> {
    // First try to parse as IP address
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }

    let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
        Ok(resolver) => resolver,
        Err(e) => {
            tracing::debug!(error = %e, "no system resolver config, using platform lookup");
            return lookup_with_platform(host).await;
        }
    };

    match resolver.lookup_ip(host).await {
        Ok(lookup) => lookup
            .iter()
            .next()
            .ok_or_else(|| ResolveError::NotFound(host.to_string())),
        Err(e) => match e.kind() {
            ResolveErrorKind::NoRecordsFound { .. } => Err(ResolveError::NotFound(host.to_string())),
            _ => Err(ResolveError::Other(e.to_string())),
        },
    }
}

async fn lookup_with_platform(host: &str) -> Result<IpAddr, ResolveError> {
    let addr = format!("{}:0", host);
    let mut addrs = tokio::net::lookup_host(&addr)
        .await
        .map_err(|e| ResolveError::Other(e.to_string()))?;
    addrs
        .next()
        .map(|a| a.ip())
        .ok_or_else(|| ResolveError::NotFound(host.to_string()))
}
