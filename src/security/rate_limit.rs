//! Rate limiting for signed service calls.
//!
//! Provides fixed-window request counting per key behind an injected
//! [`CounterStore`]:
//! - [`MemoryStore`]: bounded in-process map, approximate, single instance only
//! - [`RedisStore`]: shared atomic INCR + EXPIRE for multi-instance deployments
//! - [`FallbackStore`]: shared store that degrades to memory when unreachable
//!
//! # Contract
//!
//! Every call to [`RateLimiter::allow`] counts. Once `count > max` inside the
//! window the key is denied until the window rolls over, whichever store backs
//! the limiter.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Namespace for counter keys in shared stores.
const KEY_PREFIX: &str = "rate-limit:";

/// INCR and set expiry on the first increment, as one atomic step.
const INCR_EXPIRE_SCRIPT: &str = r#"
local current = redis.call('INCR', KEYS[1])
if current == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return current
"#;

/// Rate limit store errors.
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u64,
}

/// Window counter storage.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter for `key`, opening a new window of length
    /// `window` when none is active. Returns the count after incrementing.
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, RateLimitError>;

    /// Current count without incrementing (0 when no window is active).
    async fn get(&self, key: &str) -> Result<u64, RateLimitError>;
}

/// A counting window for one key.
#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct MemoryState {
    windows: HashMap<String, Window>,
    /// Insertion order for eviction. May hold keys already removed.
    order: VecDeque<String>,
}

/// In-process bounded counter store.
///
/// Not shared across processes; only safe for single-instance deployments.
/// Evicts the oldest key once `capacity` is exceeded.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    capacity: usize,
}

impl MemoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            capacity: capacity.max(1),
        }
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.state.lock().windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn increment_sync(&self, key: &str, window: Duration) -> u64 {
        let now = Instant::now();
        let mut state = self.state.lock();

        if let Some(w) = state.windows.get_mut(key)
            && w.expires_at > now
        {
            w.count += 1;
            return w.count;
        }

        let fresh = Window {
            count: 1,
            expires_at: now + window,
        };
        if state.windows.insert(key.to_string(), fresh).is_none() {
            state.order.push_back(key.to_string());
        }

        while state.windows.len() > self.capacity {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            if oldest != key && state.windows.remove(&oldest).is_some() {
                debug!(key = %oldest, "evicted rate limit window (capacity reached)");
            } else if oldest == key {
                state.order.push_back(oldest);
            }
        }

        1
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, RateLimitError> {
        Ok(self.increment_sync(key, window))
    }

    async fn get(&self, key: &str) -> Result<u64, RateLimitError> {
        let now = Instant::now();
        let state = self.state.lock();
        Ok(state
            .windows
            .get(key)
            .filter(|w| w.expires_at > now)
            .map_or(0, |w| w.count))
    }
}

/// Shared Redis-backed counter store.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    script: Arc<redis::Script>,
}

impl RedisStore {
    /// Connect to `redis_url`.
    pub async fn connect(redis_url: &str) -> Result<Self, RateLimitError> {
        let client = redis::Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self {
            connection,
            script: Arc::new(redis::Script::new(INCR_EXPIRE_SCRIPT)),
        })
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, RateLimitError> {
        let mut conn = self.connection.clone();
        let count: u64 = self
            .script
            .key(key)
            .arg(window.as_secs().max(1))
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn get(&self, key: &str) -> Result<u64, RateLimitError> {
        let mut conn = self.connection.clone();
        let count: Option<u64> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(count.unwrap_or(0))
    }
}

/// Shared store with an in-process fallback for when it errors.
///
/// Counts taken by the fallback are local to this process, so limits are
/// approximate while the shared store is down.
pub struct FallbackStore<P> {
    primary: P,
    fallback: MemoryStore,
}

impl<P: CounterStore> FallbackStore<P> {
    pub fn new(primary: P, fallback: MemoryStore) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl<P: CounterStore> CounterStore for FallbackStore<P> {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, RateLimitError> {
        match self.primary.increment(key, window).await {
            Ok(count) => Ok(count),
            Err(e) => {
                warn!(error = %e, "shared rate limit store failed, counting in memory");
                crate::metrics::record_rate_limit_fallback();
                self.fallback.increment(key, window).await
            }
        }
    }

    async fn get(&self, key: &str) -> Result<u64, RateLimitError> {
        match self.primary.get(key).await {
            Ok(count) => Ok(count),
            Err(_) => self.fallback.get(key).await,
        }
    }
}

/// Window rate limiter over a [`CounterStore`].
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// In-process limiter tracking at most `capacity` keys.
    pub fn in_memory(capacity: usize) -> Self {
        Self::new(Arc::new(MemoryStore::new(capacity)))
    }

    /// Count a request for `key` and decide whether it is allowed.
    pub async fn allow(
        &self,
        key: &str,
        max: u64,
        window_secs: u64,
    ) -> Result<RateDecision, RateLimitError> {
        let namespaced = format!("{}{}", KEY_PREFIX, key);
        let count = self
            .store
            .increment(&namespaced, Duration::from_secs(window_secs))
            .await?;

        let decision = RateDecision {
            allowed: count <= max,
            remaining: max.saturating_sub(count),
        };
        if !decision.allowed {
            debug!(key = %key, count, max, "rate limit exceeded");
        }
        Ok(decision)
    }

    /// Requests counted for `key` in the current window.
    pub async fn current(&self, key: &str) -> Result<u64, RateLimitError> {
        self.store.get(&format!("{}{}", KEY_PREFIX, key)).await
    }
}
