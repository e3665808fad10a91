//! End-to-end: a SOCKS5 client's CONNECT is relayed through the tunnel pool
//! to a fake Shadowsocks-style upstream that echoes bytes back, round-tripping
//! through cipher encryption/decryption on both legs.

use ss_bridge::cipher::{Cipher, KeystreamCipher};
use ss_bridge::config::MemoryConfigStore;
use ss_bridge::meter::Meter;
use ss_bridge::tunnel::{TunnelPool, TunnelSpec};
use ss_bridge::util::ConnTracker;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Notify;

const METHOD: &str = "aes-128-cfb";
const PASSWORD: &str = "hunter2";

/// A fake upstream tunnel server: reads the caller's IV and decrypts the
/// address block (discarding it), then echoes any further bytes back with
/// its own fresh IV and independent encryption state.
async fn spawn_fake_upstream() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let cipher = Cipher::new(METHOD, PASSWORD.as_bytes()).unwrap();

        let mut client_iv = vec![0u8; cipher.iv_len()];
        stream.read_exact(&mut client_iv).await.unwrap();
        let mut decryptor = cipher.decryptor(&client_iv);

        // Consume and discard the address block (1 + 4 + 2 bytes for IPv4).
        let mut addr_block = vec![0u8; 7];
        stream.read_exact(&mut addr_block).await.unwrap();
        decryptor.apply(&mut addr_block);

        let server_iv = cipher.generate_iv();
        let mut encryptor = cipher.encryptor(&server_iv);
        stream.write_all(&server_iv).await.unwrap();

        let mut buf = vec![0u8; 4096];
        loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            decryptor.apply(&mut buf[..n]);
            // Echo the plaintext straight back, re-encrypted.
            let mut reply = buf[..n].to_vec();
            encryptor.apply(&mut reply);
            if stream.write_all(&reply).await.is_err() {
                break;
            }
        }
    });

    addr
}

#[tokio::test]
async fn connect_and_echo_round_trips_through_the_cipher() {
    let upstream_addr = spawn_fake_upstream().await;
    let (host, port) = upstream_addr.rsplit_once(':').unwrap();

    let pool = Arc::new(TunnelPool::new());
    pool.install(vec![TunnelSpec {
        host: host.to_string(),
        port: port.parse().unwrap(),
        password: PASSWORD.to_string(),
        method: METHOD.to_string(),
    }])
    .await
    .unwrap();

    let meter = Arc::new(Meter::new(Arc::new(MemoryConfigStore::default())));

    let socks_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let socks_addr = socks_listener.local_addr().unwrap();
    drop(socks_listener);
    let socks_addr_str = socks_addr.to_string();

    {
        let pool = Arc::clone(&pool);
        let meter = Arc::clone(&meter);
        let addr = socks_addr_str.clone();
        tokio::spawn(async move {
            ss_bridge::socks5::start_socks5_server(
                &addr,
                pool,
                meter,
                ConnTracker::new(),
                Arc::new(Notify::new()),
            )
            .await
            .ok();
        });
    }

    // Give the listener a moment to bind.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let mut client = tokio::net::TcpStream::connect(&socks_addr_str).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut greeting_reply = [0u8; 2];
    client.read_exact(&mut greeting_reply).await.unwrap();
    assert_eq!(greeting_reply, [0x05, 0x00]);

    client
        .write_all(&[0x05, 0x01, 0x00, 0x01, 93, 184, 216, 34, 0, 80])
        .await
        .unwrap();
    let mut connect_reply = [0u8; 10];
    client.read_exact(&mut connect_reply).await.unwrap();
    assert_eq!(connect_reply, [0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);

    client.write_all(b"hello upstream").await.unwrap();
    let mut echoed = vec![0u8; b"hello upstream".len()];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"hello upstream");
}
