use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, RedisResult};
use tracing::{debug, info};
use uuid::Uuid;

use boxoffice_core::services::{LockService, LockToken};
use boxoffice_core::{HoldRecord, StoreError};

pub(crate) fn cache_error(err: redis::RedisError) -> StoreError {
    StoreError::Cache(err.to_string())
}

/// Whole seconds for `EX`, never zero.
pub(crate) fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

fn hold_key(event_id: Uuid, holder_id: &str) -> String {
    format!("hold:event:{}:user:{}", event_id, holder_id)
}

// Expiry is set when the window opens and is never pushed out by later hits
const RATE_WINDOW_SCRIPT: &str = r#"
local count = redis.call("INCR", KEYS[1])
if count == 1 or redis.call("TTL", KEYS[1]) < 0 then
    redis.call("EXPIRE", KEYS[1], ARGV[1])
end
return count
"#;

#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    pub(crate) fn client(&self) -> &redis::Client {
        &self.client
    }

    /// Fixed-window counter. `true` while `key` stays within `limit` hits
    /// per `window_seconds`. The window starts at the first hit; later hits,
    /// rejected ones included, never extend it.
    pub async fn check_rate_limit(&self, key: &str, limit: i64, window_seconds: i64) -> RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let count: i64 = redis::Script::new(RATE_WINDOW_SCRIPT)
            .key(key)
            .arg(window_seconds)
            .invoke_async(&mut conn)
            .await?;

        Ok(count <= limit)
    }
}

#[async_trait]
impl LockService for RedisClient {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>, StoreError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(cache_error)?;
        let value = Uuid::new_v4().to_string();

        // SET NX: Only set if key does not exist
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await
            .map_err(cache_error)?;

        Ok(result.map(|_| LockToken {
            key: key.to_string(),
            value,
        }))
    }

    async fn release(&self, token: &LockToken) -> Result<(), StoreError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(cache_error)?;

        // Delete only if we still own it; the key may have lapsed and been re-taken.
        let script = redis::Script::new(
            r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                return redis.call("DEL", KEYS[1])
            else
                return 0
            end
        "#,
        );

        let deleted: i64 = script
            .key(&token.key)
            .arg(&token.value)
            .invoke_async(&mut conn)
            .await
            .map_err(cache_error)?;

        if deleted == 0 {
            debug!(key = %token.key, "Lock already lapsed or taken over");
        }
        Ok(())
    }

    async fn put_hold(&self, record: &HoldRecord, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(cache_error)?;
        let key = hold_key(record.event_id, &record.holder_id);
        let payload = serde_json::to_string(record)?;

        conn.set_ex::<_, _, ()>(&key, payload, ttl_secs(ttl))
            .await
            .map_err(cache_error)?;
        info!("Hold mirrored: {} -> {} seat(s)", key, record.seat_ids.len());
        Ok(())
    }

    async fn get_hold(&self, event_id: Uuid, holder_id: &str) -> Result<Option<HoldRecord>, StoreError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(cache_error)?;

        let payload: Option<String> = conn
            .get(hold_key(event_id, holder_id))
            .await
            .map_err(cache_error)?;

        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn clear_hold(&self, event_id: Uuid, holder_id: &str) -> Result<(), StoreError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(cache_error)?;

        conn.del::<_, ()>(hold_key(event_id, holder_id))
            .await
            .map_err(cache_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_never_rounds_to_zero() {
        assert_eq!(ttl_secs(Duration::from_millis(200)), 1);
        assert_eq!(ttl_secs(Duration::from_secs(600)), 600);
    }

    /// Needs a local Redis: `cargo test -p boxoffice-store -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn test_rejected_hits_do_not_extend_the_window() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let redis = RedisClient::new(&url).await.unwrap();
        let key = format!("ratelimit:test:{}", Uuid::new_v4());

        assert!(redis.check_rate_limit(&key, 2, 2).await.unwrap());
        assert!(redis.check_rate_limit(&key, 2, 2).await.unwrap());
        assert!(!redis.check_rate_limit(&key, 2, 2).await.unwrap());

        // Keep knocking while over the limit; the window still closes on time
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert!(!redis.check_rate_limit(&key, 2, 2).await.unwrap());
        tokio::time::sleep(Duration::from_millis(1200)).await;

        assert!(redis.check_rate_limit(&key, 2, 2).await.unwrap());
    }

    #[test]
    fn test_hold_key_is_scoped_to_event_and_holder() {
        let event_id = Uuid::nil();
        assert_eq!(
            hold_key(event_id, "user-1"),
            "hold:event:00000000-0000-0000-0000-000000000000:user:user-1"
        );
    }
}
