//! L2 tier backend (Redis), via `redis = "0.27"`; see DESIGN.md for
//! where this crate choice is grounded.

use async_trait::async_trait;
use mnemolite_storage::Result;
use std::time::Duration;

#[async_trait]
pub trait L2Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;
    async fn delete_pattern(&self, pattern: &str) -> Result<()>;
    async fn flush(&self) -> Result<()>;
}

/// No-op L2: always a miss, set/delete/flush succeed trivially. Used when
/// the `redis-cache` feature is off or no `cache.l2.url` is configured —
/// the cascade then runs as L1 <-> L3 only, per spec §4.7's degraded mode.
pub struct NullL2;

#[async_trait]
impl L2Cache for NullL2 {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<()> {
        Ok(())
    }

    async fn delete_pattern(&self, _pattern: &str) -> Result<()> {
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(feature = "redis-cache")]
pub use redis_backend::RedisL2;

#[cfg(feature = "redis-cache")]
mod redis_backend {
    use super::*;
    use mnemolite_storage::error::EngineError;
    use redis::aio::ConnectionManager;
    use redis::AsyncCommands;

    pub struct RedisL2 {
        conn: ConnectionManager,
    }

    impl RedisL2 {
        pub async fn connect(url: &str) -> Result<Self> {
            let client = redis::Client::open(url)
                .map_err(|e| EngineError::storage_unavailable(e.to_string()))?;
            let conn = client
                .get_connection_manager()
                .await
                .map_err(|e| EngineError::storage_unavailable(e.to_string()))?;
            Ok(Self { conn })
        }
    }

    #[async_trait]
    impl L2Cache for RedisL2 {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            let mut conn = self.conn.clone();
            let value: Option<Vec<u8>> = conn
                .get(key)
                .await
                .map_err(|e| EngineError::storage_unavailable(e.to_string()))?;
            Ok(value)
        }

        async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
            let mut conn = self.conn.clone();
            conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
                .await
                .map_err(|e| EngineError::storage_unavailable(e.to_string()))?;
            Ok(())
        }

        async fn delete_pattern(&self, pattern: &str) -> Result<()> {
            let mut conn = self.conn.clone();
            let keys: Vec<String> = conn
                .keys(pattern)
                .await
                .map_err(|e| EngineError::storage_unavailable(e.to_string()))?;
            if !keys.is_empty() {
                conn.del::<_, ()>(keys)
                    .await
                    .map_err(|e| EngineError::storage_unavailable(e.to_string()))?;
            }
            Ok(())
        }

        async fn flush(&self) -> Result<()> {
            self.delete_pattern("*").await
        }
    }
}
