//! # Redis Cache Store
//!
//! Redis backend built on the multiplexed `ConnectionManager`.
//!
//! Each connection attempt is a single dial bounded by the connect timeout.
//! Connecting retries with bounded exponential backoff and gives up after the
//! configured number of consecutive failures without taking the process down.
//! Every command runs under the configured command timeout. When a command
//! fails with a connection-level error the backend marks itself disconnected
//! and starts a single background reconnect loop; until it succeeds the
//! adapter above short-circuits every operation to its miss value.

use super::{ttl_secs, KvBackend};
use crate::caching::{CacheError, CacheResult};
use crate::core::config::RedisConfig;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Increment, then expire when the key was just created or has no expiry.
const INCR_WITH_EXPIRY_SCRIPT: &str = r#"
local current = redis.call("INCR", KEYS[1])
if current == 1 or redis.call("TTL", KEYS[1]) == -1 then
  redis.call("EXPIRE", KEYS[1], ARGV[1])
end
return current
"#;

/// Number of keys requested per SCAN round trip
const SCAN_BATCH: usize = 500;

struct RedisInner {
    config: RedisConfig,
    client: Client,
    connection: RwLock<Option<ConnectionManager>>,
    connected: AtomicBool,
    reconnecting: AtomicBool,
    incr_script: Script,
}

/// Redis key-value backend
#[derive(Clone)]
pub struct RedisBackend {
    inner: Arc<RedisInner>,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("url", &self.inner.config.url)
            .field("connected", &self.inner.connected.load(Ordering::Relaxed))
            .finish()
    }
}

impl RedisBackend {
    /// Create a backend for the configured URL. No connection is made yet.
    pub fn new(config: RedisConfig) -> CacheResult<Self> {
        let client = Client::open(config.url.as_str())?;

        Ok(Self {
            inner: Arc::new(RedisInner {
                config,
                client,
                connection: RwLock::new(None),
                connected: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
                incr_script: Script::new(INCR_WITH_EXPIRY_SCRIPT),
            }),
        })
    }

    /// Dial once under the connect timeout. The manager's own retry loop is
    /// disabled so each attempt is a single dial; retries and backoff belong
    /// to [`Self::connect_with_backoff`].
    async fn open_connection(inner: &RedisInner) -> CacheResult<ConnectionManager> {
        let client = inner.client.clone();
        let mut manager = tokio::time::timeout(
            inner.config.connect_timeout,
            ConnectionManager::new_with_backoff(client, 2, 100, 0),
        )
        .await
        .map_err(|_| CacheError::Timeout)??;

        let pong: String = tokio::time::timeout(
            inner.config.command_timeout,
            redis::cmd("PING").query_async(&mut manager),
        )
        .await
        .map_err(|_| CacheError::Timeout)??;
        debug!("Redis answered {}", pong);

        Ok(manager)
    }

    /// Try to connect with backoff; `Err` after the last attempt fails.
    async fn connect_with_backoff(inner: &RedisInner) -> CacheResult<()> {
        let attempts = inner.config.max_connect_attempts.max(1);
        let mut last_error = CacheError::Unavailable;

        for attempt in 1..=attempts {
            match Self::open_connection(inner).await {
                Ok(manager) => {
                    *inner.connection.write().await = Some(manager);
                    inner.connected.store(true, Ordering::SeqCst);
                    info!(url = %inner.config.url, attempt, "Redis connected");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, max_attempts = attempts, error = %e, "Redis connection attempt failed");
                    last_error = e;
                    if attempt < attempts {
                        tokio::time::sleep(inner.config.backoff_for(attempt)).await;
                    }
                }
            }
        }

        error!(
            url = %inner.config.url,
            attempts,
            "Giving up on Redis after repeated failures; continuing without cache"
        );
        Err(last_error)
    }

    /// Mark the link as lost and start a reconnect loop unless one is running.
    fn handle_connection_loss(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);

        if self.inner.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }

        if tokio::runtime::Handle::try_current().is_err() {
            self.inner.reconnecting.store(false, Ordering::SeqCst);
            return;
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            warn!("Redis connection lost, reconnecting in background");
            if Self::connect_with_backoff(&inner).await.is_err() {
                *inner.connection.write().await = None;
            }
            inner.reconnecting.store(false, Ordering::SeqCst);
        });
    }

    /// Run one command against the current connection.
    async fn run<T, F, Fut>(&self, operation: F) -> CacheResult<T>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let connection = self
            .inner
            .connection
            .read()
            .await
            .clone()
            .ok_or(CacheError::Unavailable)?;

        let result = tokio::time::timeout(self.inner.config.command_timeout, operation(connection))
            .await
            .map_err(|_| CacheError::Timeout)
            .and_then(|r| r.map_err(CacheError::from));

        if let Err(e) = &result {
            if e.is_connection_error() {
                self.handle_connection_loss();
            }
        }

        result
    }
}

#[async_trait]
impl KvBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> CacheResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        Self::connect_with_backoff(&self.inner).await
    }

    async fn disconnect(&self) -> CacheResult<()> {
        self.inner.connected.store(false, Ordering::SeqCst);
        if self.inner.connection.write().await.take().is_some() {
            info!("Redis disconnected");
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.run(|mut conn| async move {
            redis::cmd("GET").arg(key).query_async(&mut conn).await
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        self.run(|mut conn| async move {
            match ttl {
                Some(ttl) => {
                    redis::cmd("SETEX")
                        .arg(key)
                        .arg(ttl_secs(ttl))
                        .arg(value)
                        .query_async::<_, ()>(&mut conn)
                        .await
                }
                None => {
                    redis::cmd("SET")
                        .arg(key)
                        .arg(value)
                        .query_async::<_, ()>(&mut conn)
                        .await
                }
            }
        })
        .await
    }

    async fn del(&self, keys: &[String]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.run(|mut conn| async move {
            redis::cmd("DEL").arg(keys).query_async(&mut conn).await
        })
        .await
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        self.run(|mut conn| async move {
            let mut cursor: u64 = 0;
            let mut all_keys = Vec::new();

            loop {
                let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .query_async(&mut conn)
                    .await?;

                all_keys.extend(batch);

                if next_cursor == 0 {
                    break;
                }
                cursor = next_cursor;
            }

            // SCAN may return a key more than once
            all_keys.sort();
            all_keys.dedup();
            Ok::<_, redis::RedisError>(all_keys)
        })
        .await
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.run(|mut conn| async move {
            redis::cmd("EXISTS").arg(key).query_async(&mut conn).await
        })
        .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        self.run(|mut conn| async move {
            redis::cmd("EXPIRE")
                .arg(key)
                .arg(ttl_secs(ttl))
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn incr(&self, key: &str) -> CacheResult<i64> {
        self.run(|mut conn| async move {
            redis::cmd("INCR").arg(key).query_async(&mut conn).await
        })
        .await
    }

    async fn decr(&self, key: &str) -> CacheResult<i64> {
        self.run(|mut conn| async move {
            redis::cmd("DECR").arg(key).query_async(&mut conn).await
        })
        .await
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> CacheResult<i64> {
        let script = &self.inner.incr_script;
        self.run(|mut conn| async move {
            script
                .key(key)
                .arg(ttl_secs(ttl))
                .invoke_async(&mut conn)
                .await
        })
        .await
    }

    async fn ttl(&self, key: &str) -> CacheResult<i64> {
        self.run(|mut conn| async move {
            redis::cmd("TTL").arg(key).query_async(&mut conn).await
        })
        .await
    }

    async fn flush_all(&self) -> CacheResult<()> {
        self.run(|mut conn| async move {
            redis::cmd("FLUSHALL").query_async::<_, ()>(&mut conn).await
        })
        .await
    }

    async fn db_size(&self) -> CacheResult<u64> {
        self.run(|mut conn| async move {
            redis::cmd("DBSIZE").query_async(&mut conn).await
        })
        .await
    }

    async fn info(&self) -> CacheResult<String> {
        self.run(|mut conn| async move {
            redis::cmd("INFO").query_async(&mut conn).await
        })
        .await
    }
}
