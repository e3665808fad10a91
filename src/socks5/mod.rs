//! The SOCKS5 front-end: `AWAIT_GREETING -> AWAIT_REQUEST -> RELAY -> CLOSED`.

pub mod address;
pub mod client;

pub use address::TargetAddress;
pub use client::dial_via_local_socks5;

use crate::meter::Meter;
use crate::tunnel::TunnelPool;
use crate::util::net::read_at_least;
use crate::util::{BridgeError, ConnTracker, Result};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::time::timeout;

const SOCKS5_VERSION: u8 = 0x05;
const AUTH_NO_AUTHENTICATION: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;

/// Greeting and request carry a generous read deadline to bound misbehaving
/// clients; once in RELAY, timing is left to the splice layer (see the
/// concurrency section of the design notes).
const HANDSHAKE_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Greeting buffer size: version + nmethods + up to 256 method bytes, the
/// largest a SOCKS5 greeting can legally be.
const GREETING_BUF_LEN: usize = 258;
/// Request buffer size: 3 header bytes + 1 ATYP + up to a 255-byte domain +
/// 1 length byte + 2 port bytes, the largest a SOCKS5 request can be.
const REQUEST_BUF_LEN: usize = 263;

/// The fixed 10-byte success reply: version 5, success, reserved, IPv4
/// `0.0.0.0:0` as the bound address. Sent immediately after a valid request,
/// before the upstream dial is even attempted, trading a client round-trip
/// for the possibility of a mid-stream reset if the dial later fails.
const SUCCESS_REPLY: [u8; 10] = [0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0];

/// Accept SOCKS5 clients on `listen_addr` and relay every CONNECT through
/// `pool`, counting bytes through `meter`. Stops accepting once `shutdown`
/// fires, after which `tracker` can be drained by the caller.
pub async fn start_socks5_server(
    listen_addr: &str,
    pool: Arc<TunnelPool>,
    meter: Arc<Meter>,
    tracker: ConnTracker,
    shutdown: Arc<Notify>,
) -> Result<()> {
    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!("[SOCKS5] Listening on {}", listen_addr);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        tracing::debug!("[SOCKS5] New connection from {}", addr);
                        let pool = Arc::clone(&pool);
                        let meter = Arc::clone(&meter);
                        let guard = tracker.track();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, pool, meter).await {
                                tracing::debug!("[SOCKS5] Connection closed: {}", e);
                            }
                            drop(guard);
                        });
                    }
                    Err(e) => {
                        tracing::error!("[SOCKS5] Accept error: {}", e);
                    }
                }
            }
            _ = shutdown.notified() => {
                tracing::info!("[SOCKS5] shutdown signal received, no longer accepting connections");
                return Ok(());
            }
        }
    }
}

async fn handle_connection(
    mut client_conn: TcpStream,
    pool: Arc<TunnelPool>,
    meter: Arc<Meter>,
) -> Result<()> {
    crate::util::net::configure_tcp_stream(&client_conn, "socks5-client");

    greet(&mut client_conn).await?;
    let target = read_request(&mut client_conn).await?;
    tracing::debug!("[SOCKS5] CONNECT {}", target.display());

    client_conn.write_all(&SUCCESS_REPLY).await?;
    client_conn.flush().await?;

    let mut upstream = match pool.pick_and_dial(&target).await {
        Ok(upstream) => upstream,
        Err(e) => {
            tracing::warn!("[SOCKS5] no upstream available for {}: {}", target.display(), e);
            return Err(e);
        }
    };

    relay(client_conn, &mut upstream, meter).await;
    tracing::debug!("[SOCKS5] connection to {} closed", target.display());
    Ok(())
}

/// Read and validate the two-byte-plus-methods greeting, replying with the
/// fixed no-auth selection regardless of which methods the client offered
/// (no other auth method is ever accepted). A single read may deliver more
/// of the client's buffer than the declared method count calls for; that
/// surplus is rejected as [`BridgeError::ExtraGreetingData`] rather than
/// silently consumed, the same way the request parser treats trailing bytes.
async fn greet(conn: &mut TcpStream) -> Result<()> {
    let mut buf = [0u8; GREETING_BUF_LEN];
    let n = timeout(HANDSHAKE_READ_TIMEOUT, read_at_least(conn, &mut buf, 2)).await??;

    if buf[0] != SOCKS5_VERSION {
        return Err(BridgeError::UnsupportedVersion(buf[0]));
    }

    let nmethods = buf[1] as usize;
    let msg_len = nmethods + 2;
    match n.cmp(&msg_len) {
        Ordering::Equal => {}
        Ordering::Less => {
            timeout(
                HANDSHAKE_READ_TIMEOUT,
                conn.read_exact(&mut buf[n..msg_len]),
            )
            .await??;
        }
        Ordering::Greater => return Err(BridgeError::ExtraGreetingData),
    }

    conn.write_all(&[SOCKS5_VERSION, AUTH_NO_AUTHENTICATION]).await?;
    Ok(())
}

/// Read `VER CMD RSV` plus the address block in one buffered pass, rejecting
/// anything but version 5 CONNECT requests and any trailing bytes past the
/// address type's computed total length.
async fn read_request(conn: &mut TcpStream) -> Result<TargetAddress> {
    let mut buf = [0u8; REQUEST_BUF_LEN];
    // idDmLen (the domain-length byte, present only for ATYP_DOMAIN) sits at
    // index 4, so 5 bytes is the minimum needed to know the total length.
    let n = timeout(HANDSHAKE_READ_TIMEOUT, read_at_least(conn, &mut buf, 5)).await??;

    if buf[0] != SOCKS5_VERSION {
        return Err(BridgeError::UnsupportedVersion(buf[0]));
    }
    if buf[1] != CMD_CONNECT {
        return Err(BridgeError::UnsupportedCommand(buf[1]));
    }
    // buf[2] is RSV, always 0x00.

    const ADDR_OFFSET: usize = 3;
    let req_len = match buf[ADDR_OFFSET] {
        0x01 => 10,                              // IPv4: 3 + 1 + 4 + 2
        0x04 => 22,                              // IPv6: 3 + 1 + 16 + 2
        0x03 => 5 + buf[ADDR_OFFSET + 1] as usize + 2, // domain: 3 + 1 + 1 + len + 2
        other => return Err(BridgeError::UnsupportedAddrType(other)),
    };

    match n.cmp(&req_len) {
        Ordering::Equal => {}
        Ordering::Less => {
            timeout(
                HANDSHAKE_READ_TIMEOUT,
                conn.read_exact(&mut buf[n..req_len]),
            )
            .await??;
        }
        Ordering::Greater => return Err(BridgeError::ExtraRequestData),
    }

    TargetAddress::from_raw_block(&buf[ADDR_OFFSET..req_len]).await
}

/// Splice the client and upstream sockets bidirectionally until either side
/// closes, counting bytes through the meter. A threshold-crossing flush is
/// spawned rather than awaited, so a slow config store never stalls the
/// splice loop. Closure of either direction ends both; the upstream's
/// decryption/encryption happens inline in [`crate::tunnel::UpstreamStream`].
async fn relay(client_conn: TcpStream, upstream: &mut crate::tunnel::UpstreamStream, meter: Arc<Meter>) {
    let (mut client_read, mut client_write) = client_conn.into_split();

    let mut up_to_client_buf = vec![0u8; 8192];
    let mut client_to_up_buf = vec![0u8; 8192];

    loop {
        tokio::select! {
            result = upstream.read_app(&mut up_to_client_buf) => {
                match result {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if meter.add_in(n) {
                            let meter = Arc::clone(&meter);
                            tokio::spawn(async move {
                                if let Err(err) = meter.flush().await {
                                    tracing::warn!("[Meter] flush failed: {}", err);
                                }
                            });
                        }
                        if client_write.write_all(&up_to_client_buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
            result = client_read.read(&mut client_to_up_buf) => {
                match result {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        meter.add_out(n);
                        if upstream.write_app(&client_to_up_buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
}
