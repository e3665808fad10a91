//! The HTTP proxy front-end. Every outbound connection is made by dialing
//! the local SOCKS5 listener as a SOCKS5 client, so this front-end shares
//! the tunnel pool transparently and carries no retry policy of its own.

use crate::socks5::{dial_via_local_socks5, TargetAddress};
use crate::util::{BridgeError, ConnTracker, Result};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const MAX_HEADER_SIZE: usize = 64 * 1024;

/// Accept HTTP proxy clients on `listen_addr`, dialing upstream via the
/// SOCKS5 listener at `socks5_addr` for every request. Stops accepting once
/// `shutdown` fires, after which `tracker` can be drained by the caller.
pub async fn start_http_proxy_server(
    listen_addr: &str,
    socks5_addr: String,
    tracker: ConnTracker,
    shutdown: Arc<Notify>,
) -> Result<()> {
    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!("[HTTP] Listening on {}", listen_addr);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        tracing::debug!("[HTTP] New connection from {}", addr);
                        let socks5_addr = socks5_addr.clone();
                        let guard = tracker.track();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, &socks5_addr).await {
                                tracing::debug!("[HTTP] Connection closed: {}", e);
                            }
                            drop(guard);
                        });
                    }
                    Err(e) => {
                        tracing::error!("[HTTP] Accept error: {}", e);
                    }
                }
            }
            _ = shutdown.notified() => {
                tracing::info!("[HTTP] shutdown signal received, no longer accepting connections");
                return Ok(());
            }
        }
    }
}

struct ParsedRequest {
    method: String,
    version: String,
    host: String,
    port: u16,
    path: String,
    is_connect: bool,
    headers: Vec<String>,
    body: Vec<u8>,
}

async fn handle_connection(mut client_conn: TcpStream, socks5_addr: &str) -> Result<()> {
    let (header_bytes, remaining) = read_http_header(&mut client_conn).await?;
    let header_str = String::from_utf8(header_bytes)
        .map_err(|e| BridgeError::Protocol(format!("invalid HTTP header encoding: {e}")))?;
    let request = parse_http_request(&header_str, remaining)?;

    tracing::info!(
        "[HTTP] {} {}:{} connect={}",
        request.method,
        request.host,
        request.port,
        request.is_connect
    );

    let target = TargetAddress::from_host(&request.host, request.port)?;
    let mut upstream = match dial_via_local_socks5(socks5_addr, &target).await {
        Ok(stream) => stream,
        Err(e) => {
            send_http_error(&mut client_conn, 502, "Bad Gateway").await?;
            return Err(e);
        }
    };

    if request.is_connect {
        send_connect_success(&mut client_conn).await?;
    } else {
        let request_bytes = build_forward_request(&request);
        upstream.write_all(&request_bytes).await?;
        if !request.body.is_empty() {
            upstream.write_all(&request.body).await?;
        }
    }

    let (mut client_read, mut client_write) = client_conn.into_split();
    let (mut up_read, mut up_write) = upstream.into_split();

    let to_client = tokio::spawn(async move { tokio::io::copy(&mut up_read, &mut client_write).await });
    let to_upstream = tokio::spawn(async move { tokio::io::copy(&mut client_read, &mut up_write).await });

    let _ = tokio::join!(to_client, to_upstream);
    tracing::info!("[HTTP] connection to {}:{} closed", request.host, request.port);
    Ok(())
}

async fn read_http_header(stream: &mut TcpStream) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut buf = Vec::with_capacity(1024);
    let mut tmp = [0u8; 1024];

    loop {
        let n = stream.read(&mut tmp).await?;
        if n == 0 {
            return Err(BridgeError::Protocol(
                "connection closed before HTTP header complete".into(),
            ));
        }
        buf.extend_from_slice(&tmp[..n]);
        if buf.len() > MAX_HEADER_SIZE {
            return Err(BridgeError::Protocol("HTTP header too large".to_string()));
        }
        if let Some(end) = find_header_end(&buf) {
            let header = buf[..end].to_vec();
            let remaining = buf[end..].to_vec();
            return Ok((header, remaining));
        }
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
        .map(|pos| pos + HEADER_TERMINATOR.len())
}

fn parse_http_request(header: &str, body: Vec<u8>) -> Result<ParsedRequest> {
    let mut lines = header.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| BridgeError::Protocol("missing HTTP request line".into()))?;

    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| BridgeError::Protocol("invalid HTTP request line".into()))?;
    let target = parts
        .next()
        .ok_or_else(|| BridgeError::Protocol("invalid HTTP request line".into()))?;
    let version = parts.next().unwrap_or("HTTP/1.1");

    let header_lines: Vec<String> = lines
        .map(|line| line.to_string())
        .filter(|line| !line.is_empty())
        .collect();

    let (host, port, path, is_connect) = determine_target(method, target, &header_lines)?;

    Ok(ParsedRequest {
        method: method.to_string(),
        version: version.to_string(),
        host,
        port,
        path,
        is_connect,
        headers: header_lines,
        body,
    })
}

fn determine_target(
    method: &str,
    target: &str,
    headers: &[String],
) -> Result<(String, u16, String, bool)> {
    if method.eq_ignore_ascii_case("CONNECT") {
        let (host, port) = split_host_port(target, 443);
        return Ok((host, port, String::new(), true));
    }

    let mut host_header: Option<String> = None;
    for header in headers {
        if let Some(rest) = header
            .strip_prefix("Host:")
            .or_else(|| header.strip_prefix("host:"))
        {
            host_header = Some(rest.trim().to_string());
            break;
        }
    }

    let mut host = String::new();
    let mut port = 80u16;
    let mut path = target.to_string();

    if let Some(pos) = target.find("://") {
        let without_scheme = &target[pos + 3..];
        if let Some(slash) = without_scheme.find('/') {
            host = without_scheme[..slash].to_string();
            path = without_scheme[slash..].to_string();
        } else {
            host = without_scheme.to_string();
            path = "/".to_string();
        }
        if target.starts_with("https://") {
            port = 443;
        }
    } else if let Some(h) = host_header {
        host = h;
    }

    if host.is_empty() {
        return Err(BridgeError::Protocol("Host header missing".into()));
    }

    let (host_only, port_resolved) = split_host_port(&host, port);
    if !path.starts_with('/') && !path.starts_with('*') {
        path = format!("/{path}");
    }

    Ok((host_only, port_resolved, path, false))
}

fn split_host_port(value: &str, default_port: u16) -> (String, u16) {
    if let Some(idx) = value.rfind(':') {
        let host_part = &value[..idx];
        let port_part = &value[idx + 1..];
        if let Ok(port) = port_part.parse::<u16>() {
            return (
                host_part.trim().trim_matches(['[', ']']).to_string(),
                port,
            );
        }
    }
    (value.trim().trim_matches(['[', ']']).to_string(), default_port)
}

fn build_forward_request(req: &ParsedRequest) -> Vec<u8> {
    let mut out = Vec::new();
    let request_line = format!(
        "{} {} {}\r\n",
        req.method,
        if req.path.is_empty() { "/" } else { &req.path },
        req.version
    );
    out.extend_from_slice(request_line.as_bytes());

    let host_header_value = if req.port == 80 || req.port == 443 {
        req.host.clone()
    } else {
        format!("{}:{}", req.host, req.port)
    };

    let mut host_written = false;
    for header in &req.headers {
        if header.to_ascii_lowercase().starts_with("host:") {
            host_written = true;
            out.extend_from_slice(format!("Host: {host_header_value}\r\n").as_bytes());
        } else {
            out.extend_from_slice(header.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
    }
    if !host_written {
        out.extend_from_slice(format!("Host: {host_header_value}\r\n").as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out
}

async fn send_connect_success(stream: &mut TcpStream) -> Result<()> {
    stream
        .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
        .await
        .map_err(BridgeError::Io)
}

async fn send_http_error(stream: &mut TcpStream, code: u16, message: &str) -> Result<()> {
    let body = format!("HTTP/1.1 {code} {message}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
    stream.write_all(body.as_bytes()).await.map_err(BridgeError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_absolute_form_get() {
        let req = parse_http_request("GET http://example.com/path HTTP/1.1\r\n\r\n", vec![]).unwrap();
        assert_eq!(req.host, "example.com");
        assert_eq!(req.port, 80);
        assert_eq!(req.path, "/path");
        assert!(!req.is_connect);
    }

    #[test]
    fn parses_connect_target() {
        let req = parse_http_request("CONNECT example.com:443 HTTP/1.1\r\n\r\n", vec![]).unwrap();
        assert_eq!(req.host, "example.com");
        assert_eq!(req.port, 443);
        assert!(req.is_connect);
    }

    #[test]
    fn falls_back_to_host_header_for_origin_form() {
        let req = parse_http_request(
            "GET /index.html HTTP/1.1\r\nHost: example.com:8080\r\n\r\n",
            vec![],
        )
        .unwrap();
        assert_eq!(req.host, "example.com");
        assert_eq!(req.port, 8080);
        assert_eq!(req.path, "/index.html");
    }

    #[test]
    fn rejects_missing_host() {
        let err = parse_http_request("GET /index.html HTTP/1.1\r\n\r\n", vec![]).unwrap_err();
        assert!(matches!(err, BridgeError::Protocol(_)));
    }
}
