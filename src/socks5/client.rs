//! A minimal SOCKS5 client, used by the HTTP front-end to reach the tunnel
//! pool through the local SOCKS5 listener instead of dialing it directly.

use crate::socks5::TargetAddress;
use crate::util::{BridgeError, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const SOCKS5_VERSION: u8 = 0x05;
const AUTH_NO_AUTHENTICATION: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;

/// Connect to `socks5_addr` as a SOCKS5 client and issue a CONNECT for
/// `target`, returning the live socket once the server's success reply has
/// been consumed. Mirrors the front-end's own framing byte-for-byte so the
/// two halves agree on the wire format.
pub async fn dial_via_local_socks5(socks5_addr: &str, target: &TargetAddress) -> Result<TcpStream> {
    let mut conn = TcpStream::connect(socks5_addr).await?;

    conn.write_all(&[SOCKS5_VERSION, 0x01, AUTH_NO_AUTHENTICATION])
        .await?;
    let mut greeting_reply = [0u8; 2];
    conn.read_exact(&mut greeting_reply).await?;
    if greeting_reply != [SOCKS5_VERSION, AUTH_NO_AUTHENTICATION] {
        return Err(BridgeError::Protocol(
            "local SOCKS5 listener rejected no-auth greeting".into(),
        ));
    }

    let mut request = Vec::with_capacity(4 + target.as_bytes().len());
    request.extend_from_slice(&[SOCKS5_VERSION, CMD_CONNECT, 0x00]);
    request.extend_from_slice(target.as_bytes());
    conn.write_all(&request).await?;

    // The reply is always the fixed 10-byte form this crate's own front-end
    // emits: VER REP RSV ATYP BND.ADDR(4) BND.PORT(2).
    let mut reply = [0u8; 10];
    conn.read_exact(&mut reply).await?;
    if reply[1] != 0x00 {
        return Err(BridgeError::NoUpstreamAvailable);
    }

    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// A fake SOCKS5 listener that greets normally but always replies
    /// general-failure (REP=0x01), standing in for a pool with no upstream.
    async fn serve_one_failing_reply(listener: TcpListener) {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut greeting = [0u8; 3];
        stream.read_exact(&mut greeting).await.unwrap();
        stream
            .write_all(&[SOCKS5_VERSION, AUTH_NO_AUTHENTICATION])
            .await
            .unwrap();

        let mut header = [0u8; 3];
        stream.read_exact(&mut header).await.unwrap();
        let _ = TargetAddress::read_from(&mut stream).await.unwrap();

        stream
            .write_all(&[0x05, 0x01, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn surfaces_no_upstream_available_on_general_failure_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(serve_one_failing_reply(listener));

        let target = TargetAddress::from_domain("example.com", 80).unwrap();
        let err = dial_via_local_socks5(&addr, &target).await.unwrap_err();
        assert!(matches!(err, BridgeError::NoUpstreamAvailable));
    }
}
