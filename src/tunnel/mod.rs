//! Upstream tunnel pool: selection, failover, and wire framing.

pub mod pool;
pub mod stream;

pub use pool::{TunnelPool, TunnelSpec};
pub use stream::UpstreamStream;
