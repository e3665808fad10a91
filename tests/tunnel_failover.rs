//! Integration tests for the tunnel pool's probabilistic failover and
//! recovery selection algorithm.

use ss_bridge::socks5::TargetAddress;
use ss_bridge::tunnel::{TunnelPool, TunnelSpec};
use tokio::net::TcpListener;

fn spec(endpoint: &str) -> TunnelSpec {
    let (host, port) = endpoint.rsplit_once(':').unwrap();
    TunnelSpec {
        host: host.to_string(),
        port: port.parse().unwrap(),
        password: "hunter2".to_string(),
        method: "aes-128-cfb".to_string(),
    }
}

/// A listener that accepts connections and otherwise does nothing; enough
/// for a dial to be considered successful (TCP connect completes and the
/// small address-block write fits in the socket buffer).
async fn spawn_accepting_listener() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    // Keep the accepted socket alive for the test's duration.
                    std::mem::forget(stream);
                }
                Err(_) => break,
            }
        }
    });
    addr
}

/// An address nothing is listening on, so connect() fails quickly.
async fn unreachable_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

#[tokio::test]
async fn failover_skips_a_dead_server_and_increments_its_fail_count() {
    let dead = unreachable_endpoint().await;
    let alive = spawn_accepting_listener().await;

    let pool = TunnelPool::new();
    pool.install(vec![spec(&dead), spec(&alive)]).await.unwrap();

    let target = TargetAddress::from_domain("example.com", 80).unwrap();
    let upstream = pool.pick_and_dial(&target).await;
    assert!(upstream.is_ok(), "the live second server should serve the connection");

    assert_eq!(pool.fail_count_at(0).await, 1, "the dead server's fail count should increment");
    assert_eq!(pool.fail_count_at(1).await, 0, "the server that served the connection stays at zero");
}

#[tokio::test]
async fn empty_install_preserves_the_running_pool() {
    let alive = spawn_accepting_listener().await;
    let pool = TunnelPool::new();
    pool.install(vec![spec(&alive)]).await.unwrap();
    assert_eq!(pool.len().await, 1);

    pool.install(vec![]).await.unwrap();
    assert_eq!(pool.len().await, 1);

    let target = TargetAddress::from_domain("example.com", 80).unwrap();
    assert!(pool.pick_and_dial(&target).await.is_ok());
}

#[tokio::test]
async fn no_servers_installed_reports_no_upstream_available() {
    let pool = TunnelPool::new();
    let target = TargetAddress::from_domain("example.com", 80).unwrap();
    let err = pool.pick_and_dial(&target).await.unwrap_err();
    assert!(matches!(err, ss_bridge::BridgeError::NoUpstreamAvailable));
}
