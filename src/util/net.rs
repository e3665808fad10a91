//! Network-related utilities (TCP tuning)

use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Read into `buf` until at least `min` bytes have been read, returning the
/// total number actually read. Mirrors Go's `io.ReadAtLeast`: a single
/// underlying read may deliver more than `min` bytes in one shot, and the
/// caller uses the returned count (not just `min`) to detect that a SOCKS5
/// greeting or request arrived with trailing extra data in the same segment.
pub async fn read_at_least<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
    min: usize,
) -> io::Result<usize> {
    let mut n = 0;
    while n < min {
        let read = reader.read(&mut buf[n..]).await?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before minimum bytes were read",
            ));
        }
        n += read;
    }
    Ok(n)
}

/// Enable low-latency options on a TCP stream (best-effort).
pub fn configure_tcp_stream(stream: &TcpStream, context: &str) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(
            "[Net] Failed to enable TCP_NODELAY for {}: {}",
            context, err
        );
    }

    #[cfg(any(unix, windows))]
    {
        use socket2::{SockRef, TcpKeepalive};

        let keepalive = TcpKeepalive::new()
            .with_time(Duration::from_secs(120))
            .with_interval(Duration::from_secs(30));

        if let Err(err) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
            debug!(
                "[Net] Failed to configure TCP keepalive for {}: {}",
                context, err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn reads_until_minimum_even_across_short_reads() {
        let (mut client, mut server) = duplex(4);
        let write = tokio::spawn(async move {
            client.write_all(&[1, 2]).await.unwrap();
            client.write_all(&[3, 4, 5]).await.unwrap();
        });

        let mut buf = [0u8; 16];
        let n = read_at_least(&mut server, &mut buf, 5).await.unwrap();
        write.await.unwrap();

        assert!(n >= 5);
        assert_eq!(&buf[..5], &[1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn eof_before_minimum_is_an_error() {
        let (client, mut server) = duplex(4);
        drop(client);

        let mut buf = [0u8; 16];
        let err = read_at_least(&mut server, &mut buf, 5).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
