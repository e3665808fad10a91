//! Parsing for the `ss://method:password@host:port` tunnel textual form.

use crate::tunnel::TunnelSpec;
use crate::util::{BridgeError, Result};

const SCHEME: &str = "ss://";

/// Parse one tunnel string. Accepts exactly
/// `ss://<method>:<password>@<host>:<port>`, where method matches
/// `[A-Za-z0-9-]+`, password matches `[A-Za-z0-9]+`, host matches
/// `[A-Za-z0-9.]+`, and port is a decimal number in `1..=65535`.
pub fn parse_tunnel_spec(raw: &str) -> Result<TunnelSpec> {
    let body = raw
        .strip_prefix(SCHEME)
        .ok_or_else(|| BridgeError::ConfigParse(format!("missing ss:// scheme: {raw}")))?;

    let (credentials, host_port) = body
        .split_once('@')
        .ok_or_else(|| BridgeError::ConfigParse(format!("missing '@' in tunnel spec: {raw}")))?;

    let (method, password) = credentials.split_once(':').ok_or_else(|| {
        BridgeError::ConfigParse(format!("missing ':' in tunnel credentials: {raw}"))
    })?;

    let (host, port_str) = host_port
        .rsplit_once(':')
        .ok_or_else(|| BridgeError::ConfigParse(format!("missing ':' before port: {raw}")))?;

    if method.is_empty() || !method.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(BridgeError::ConfigParse(format!(
            "invalid cipher method in tunnel spec: {method}"
        )));
    }
    if password.is_empty() || !password.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(BridgeError::ConfigParse(format!(
            "invalid password in tunnel spec: {raw}"
        )));
    }
    if host.is_empty() || !host.chars().all(|c| c.is_ascii_alphanumeric() || c == '.') {
        return Err(BridgeError::ConfigParse(format!(
            "invalid host in tunnel spec: {host}"
        )));
    }
    let port: u16 = port_str
        .parse()
        .map_err(|_| BridgeError::ConfigParse(format!("invalid port in tunnel spec: {raw}")))?;
    if port == 0 {
        return Err(BridgeError::ConfigParse(format!(
            "port must be in 1..=65535: {raw}"
        )));
    }

    Ok(TunnelSpec {
        host: host.to_string(),
        port,
        password: password.to_string(),
        method: method.to_string(),
    })
}

/// Render a tunnel spec back to its textual form.
pub fn format_tunnel_spec(spec: &TunnelSpec) -> String {
    format!(
        "ss://{}:{}@{}:{}",
        spec.method, spec.password, spec.host, spec.port
    )
}
