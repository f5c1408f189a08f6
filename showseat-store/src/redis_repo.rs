use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use showseat_core::{LockStore, LockToken, SeatId, StoreError, StoreResult};
use std::time::Duration;
use tracing::debug;

// Delete only while the value still holds the releasing token, so a late release can't
// drop a lock that expired and was re-claimed.
const RELEASE_IF_OWNER: &str = r#"
    if redis.call("GET", KEYS[1]) == ARGV[1] then
        return redis.call("DEL", KEYS[1])
    else
        return 0
    end
"#;

fn lock_err(e: redis::RedisError) -> StoreError {
    StoreError::Lock(e.to_string())
}

#[derive(Clone)]
pub struct RedisLockStore {
    conn: ConnectionManager,
}

impl RedisLockStore {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    pub fn lock_key(seat_id: SeatId) -> String {
        format!("seat_lock:{}", seat_id)
    }

    pub async fn ping(&self) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn try_claim(&self, seat_id: SeatId, token: &LockToken, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let key = Self::lock_key(seat_id);
        let ttl_ms = ttl.as_millis().max(1) as u64;

        // SET NX PX: check-and-set in one round trip
        let result: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(token.to_string())
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(lock_err)?;

        debug!("Claim {} for {}: {}", key, token, result.is_some());
        Ok(result.is_some())
    }

    async fn release(&self, seat_id: SeatId, token: &LockToken) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::Script::new(RELEASE_IF_OWNER)
            .key(Self::lock_key(seat_id))
            .arg(token.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(lock_err)?;
        Ok(removed > 0)
    }

    async fn is_locked(&self, seat_id: SeatId) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        conn.exists(Self::lock_key(seat_id)).await.map_err(lock_err)
    }
}
