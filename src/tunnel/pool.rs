//! The upstream tunnel pool: an ordered list of servers with probabilistic
//! failover and recovery, guarded so reconfiguration never races a dial.

use crate::cipher::Cipher;
use crate::socks5::TargetAddress;
use crate::tunnel::stream::UpstreamStream;
use crate::util::{BridgeError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Lower bound on the per-server failure-probability denominator; keeps a
/// fresh server from being skipped too aggressively right after it starts
/// failing, while still letting `fail_counts` drive recovery.
const BASE_FAIL_COUNT: u32 = 20;
/// Upper bound a server's failure count saturates at.
const CAP_FAIL_COUNT: u32 = 30;

/// First-pass skip decision: a server with `fail_count` prior failures is
/// skipped with probability `fail_count / (fail_count + BASE_FAIL_COUNT)`.
/// A server with no failure history is never skipped.
fn should_skip_on_first_pass(fail_count: u32) -> bool {
    fail_count > 0 && rand::random_range(0..(fail_count + BASE_FAIL_COUNT)) < fail_count
}

/// A parsed, validated upstream tunnel credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSpec {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub method: String,
}

impl TunnelSpec {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct ServerEntry {
    spec: TunnelSpec,
    cipher: Cipher,
}

struct PoolState {
    entries: Vec<ServerEntry>,
    fail_counts: Vec<AtomicU32>,
}

/// Ordered upstream server list plus parallel failure counters, reconfigured
/// atomically and dialed without holding any lock across I/O.
pub struct TunnelPool {
    state: RwLock<Arc<PoolState>>,
}

impl Default for TunnelPool {
    fn default() -> Self {
        Self::new()
    }
}

impl TunnelPool {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(Arc::new(PoolState {
                entries: Vec::new(),
                fail_counts: Vec::new(),
            })),
        }
    }

    /// Replace the pool's server list atomically. An empty `specs` is a
    /// no-op so that a caller clearing-then-repopulating configuration
    /// never leaves the pool briefly empty.
    pub async fn install(&self, specs: Vec<TunnelSpec>) -> Result<()> {
        if specs.is_empty() {
            return Ok(());
        }

        let mut cipher_cache: HashMap<(String, String), Cipher> = HashMap::new();
        let mut entries = Vec::with_capacity(specs.len());
        let mut fail_counts = Vec::with_capacity(specs.len());

        for spec in specs {
            let cache_key = (spec.method.clone(), spec.password.clone());
            let cipher = match cipher_cache.get(&cache_key) {
                Some(cipher) => cipher.clone(),
                None => {
                    let cipher = Cipher::new(&spec.method, spec.password.as_bytes())?;
                    cipher_cache.insert(cache_key, cipher.clone());
                    cipher
                }
            };
            entries.push(ServerEntry { spec, cipher });
            fail_counts.push(AtomicU32::new(0));
        }

        let new_state = Arc::new(PoolState {
            entries,
            fail_counts,
        });
        let mut guard = self.state.write().await;
        *guard = new_state;
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    /// Current fail count for the installed server at `index`. Exposed
    /// mainly so tests can observe the failover/recovery algorithm's effect
    /// on pool state.
    pub async fn fail_count_at(&self, index: usize) -> u32 {
        self.state.read().await.fail_counts[index].load(Ordering::Relaxed)
    }

    /// Select and dial an upstream, applying the two-pass probabilistic
    /// failover algorithm: servers with failure history are skipped with
    /// probability `fail_count / (fail_count + BASE_FAIL_COUNT)` on the
    /// first pass, so a struggling server is still probed occasionally; any
    /// server skipped that way gets a second-pass attempt if everything
    /// else also failed.
    pub async fn pick_and_dial(&self, target: &TargetAddress) -> Result<UpstreamStream> {
        let state = Arc::clone(&*self.state.read().await);
        if state.entries.is_empty() {
            return Err(BridgeError::NoUpstreamAvailable);
        }

        let mut skipped = Vec::new();

        for i in 0..state.entries.len() {
            let fail_count = state.fail_counts[i].load(Ordering::Relaxed);
            if should_skip_on_first_pass(fail_count) {
                skipped.push(i);
                continue;
            }
            if let Some(stream) = Self::try_dial(&state, i, target).await {
                return Ok(stream);
            }
        }

        for i in skipped {
            if let Some(stream) = Self::try_dial(&state, i, target).await {
                return Ok(stream);
            }
        }

        Err(BridgeError::NoUpstreamAvailable)
    }

    async fn try_dial(
        state: &Arc<PoolState>,
        index: usize,
        target: &TargetAddress,
    ) -> Option<UpstreamStream> {
        let entry = &state.entries[index];
        match UpstreamStream::dial(&entry.spec.endpoint(), entry.cipher.clone(), target).await {
            Ok(stream) => {
                state.fail_counts[index].store(0, Ordering::Relaxed);
                Some(stream)
            }
            Err(err) => {
                tracing::warn!(
                    "[Pool] dial to {} failed: {}",
                    entry.spec.endpoint(),
                    err
                );
                let prev = state.fail_counts[index].load(Ordering::Relaxed);
                if prev < CAP_FAIL_COUNT {
                    state.fail_counts[index].store(prev + 1, Ordering::Relaxed);
                }
                None
            }
        }
    }
}
