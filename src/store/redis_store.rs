//! Distributed L2 store backed by Redis: a `REDIS_URL` environment convention, a
//! `ConnectionManager`, and a `SET EX` / `GET` / `TTL` / `DEL` command set operating on
//! raw bytes.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;

use crate::store::{Store, TtlIntrospectingStore};

#[derive(Debug)]
pub struct DistributedStore {
    conn: redis::aio::ConnectionManager,
}

impl DistributedStore {
    /// Connect using `REDIS_URL`, defaulting to `redis://127.0.0.1:6379`, verifying
    /// reachability with a `PING`.
    pub async fn new() -> anyhow::Result<Self> {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        Self::with_url(&url).await
    }

    pub async fn with_url(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let mut conn = redis::aio::ConnectionManager::new(client).await?;
        let _: String = redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Store for DistributedStore {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut conn = self.conn.clone();
        conn.get::<_, Option<Vec<u8>>>(key).await.ok().flatten()
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let secs = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key, value, secs).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn health_check(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }

    fn name(&self) -> &'static str {
        "Redis (L2)"
    }
}

#[async_trait]
impl TtlIntrospectingStore for DistributedStore {
    async fn get_with_ttl(&self, key: &str) -> Option<(Vec<u8>, Option<Duration>)> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await.ok().flatten();
        let value = value?;
        let ttl_secs: i64 = conn.ttl(key).await.unwrap_or(-1);
        // Redis sentinel semantics: -1 means no expiry, -2 means the key is gone
        // (a race we simply treat as "no TTL info").
        let ttl = if ttl_secs >= 0 {
            Some(Duration::from_secs(ttl_secs as u64))
        } else {
            None
        };
        Some((value, ttl))
    }
}
