use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use boxoffice_core::services::{FailureOutcome, JobQueue};
use boxoffice_core::{Clock, Job, JobEnvelope, RetryPolicy, StoreError};

use crate::redis_repo::RedisClient;

const SCHEDULED: &str = "jobs:scheduled";
const INFLIGHT: &str = "jobs:inflight";
const PAYLOADS: &str = "jobs:payload";
const DEAD: &str = "jobs:dead";

/// Moves lapsed leases back to the schedule so another worker picks them up.
const REAP_SCRIPT: &str = r#"
    local lapsed = redis.call("ZRANGEBYSCORE", KEYS[1], "-inf", ARGV[1])
    for _, id in ipairs(lapsed) do
        redis.call("ZREM", KEYS[1], id)
        redis.call("ZADD", KEYS[2], ARGV[1], id)
    end
    return #lapsed
"#;

/// Leases up to ARGV[2] due ids until ARGV[3].
const CLAIM_SCRIPT: &str = r#"
    local due = redis.call("ZRANGEBYSCORE", KEYS[1], "-inf", ARGV[1], "LIMIT", 0, ARGV[2])
    for _, id in ipairs(due) do
        redis.call("ZREM", KEYS[1], id)
        redis.call("ZADD", KEYS[2], ARGV[3], id)
    end
    return due
"#;

#[derive(Serialize)]
struct DeadLetter<'a> {
    envelope: &'a JobEnvelope,
    reason: &'a str,
    failed_at: DateTime<Utc>,
}

fn queue_error(err: redis::RedisError) -> StoreError {
    StoreError::Queue(err.to_string())
}

/// Delayed job queue on Redis: a sorted set of due times, a sorted set of
/// lease deadlines for claimed jobs, a payload hash and a dead-letter list.
///
/// Delivery is at-least-once. A worker that dies mid-job leaves its lease
/// to lapse and the job becomes due again.
#[derive(Clone)]
pub struct RedisJobQueue {
    redis: RedisClient,
    clock: Arc<dyn Clock>,
    lease: Duration,
}

impl RedisJobQueue {
    pub fn new(redis: RedisClient, clock: Arc<dyn Clock>, lease: Duration) -> Self {
        Self { redis, clock, lease }
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        self.redis
            .client()
            .get_multiplexed_async_connection()
            .await
            .map_err(queue_error)
    }
}

fn lease_span(lease: Duration) -> chrono::Duration {
    chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::seconds(30))
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn schedule(&self, job: Job, delay: Duration, policy: RetryPolicy) -> Result<Uuid, StoreError> {
        let run_at = self.clock.now()
            + chrono::Duration::from_std(delay).map_err(|e| StoreError::Queue(e.to_string()))?;
        let envelope = JobEnvelope::new(job, policy, run_at);
        let payload = serde_json::to_string(&envelope)?;

        let mut conn = self.connection().await?;
        let _: () = redis::pipe()
            .atomic()
            .hset(PAYLOADS, envelope.id.to_string(), payload)
            .ignore()
            .zadd(SCHEDULED, envelope.id.to_string(), run_at.timestamp_millis())
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(queue_error)?;

        debug!(job_id = %envelope.id, job = envelope.job.name(), %run_at, "Job scheduled");
        Ok(envelope.id)
    }

    async fn claim_due(&self, limit: usize) -> Result<Vec<JobEnvelope>, StoreError> {
        let now = self.clock.now();
        let now_ms = now.timestamp_millis();
        let deadline_ms = (now + lease_span(self.lease)).timestamp_millis();
        let mut conn = self.connection().await?;

        let reaped: i64 = redis::Script::new(REAP_SCRIPT)
            .key(INFLIGHT)
            .key(SCHEDULED)
            .arg(now_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(queue_error)?;
        if reaped > 0 {
            warn!(reaped, "Requeued jobs whose lease lapsed");
        }

        let ids: Vec<String> = redis::Script::new(CLAIM_SCRIPT)
            .key(SCHEDULED)
            .key(INFLIGHT)
            .arg(now_ms)
            .arg(limit)
            .arg(deadline_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(queue_error)?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let payloads: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(PAYLOADS)
            .arg(&ids)
            .query_async(&mut conn)
            .await
            .map_err(queue_error)?;

        let mut claimed = Vec::with_capacity(ids.len());
        for (id, payload) in ids.iter().zip(payloads) {
            let envelope = payload.map(|p| serde_json::from_str::<JobEnvelope>(&p));
            match envelope {
                Some(Ok(envelope)) => claimed.push(envelope),
                Some(Err(e)) => {
                    warn!(job_id = %id, error = %e, "Unreadable job payload, dropping");
                    self.drop_job(&mut conn, id).await?;
                }
                None => {
                    warn!(job_id = %id, "Job payload missing, dropping");
                    self.drop_job(&mut conn, id).await?;
                }
            }
        }
        Ok(claimed)
    }

    async fn complete(&self, job_id: Uuid) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        self.drop_job(&mut conn, &job_id.to_string()).await
    }

    async fn fail(&self, mut envelope: JobEnvelope, reason: &str) -> Result<FailureOutcome, StoreError> {
        let now = self.clock.now();
        let id = envelope.id.to_string();
        let mut conn = self.connection().await?;

        match envelope.record_failure(now) {
            Some(run_at) => {
                let payload = serde_json::to_string(&envelope)?;
                let _: () = redis::pipe()
                    .atomic()
                    .zrem(INFLIGHT, &id)
                    .ignore()
                    .hset(PAYLOADS, &id, payload)
                    .ignore()
                    .zadd(SCHEDULED, &id, run_at.timestamp_millis())
                    .ignore()
                    .query_async(&mut conn)
                    .await
                    .map_err(queue_error)?;
                Ok(FailureOutcome::Rescheduled { run_at })
            }
            None => {
                let letter = serde_json::to_string(&DeadLetter {
                    envelope: &envelope,
                    reason,
                    failed_at: now,
                })?;
                let _: () = redis::pipe()
                    .atomic()
                    .zrem(INFLIGHT, &id)
                    .ignore()
                    .hdel(PAYLOADS, &id)
                    .ignore()
                    .rpush(DEAD, letter)
                    .ignore()
                    .query_async(&mut conn)
                    .await
                    .map_err(queue_error)?;
                Ok(FailureOutcome::DeadLettered)
            }
        }
    }
}

impl RedisJobQueue {
    async fn drop_job(&self, conn: &mut redis::aio::MultiplexedConnection, id: &str) -> Result<(), StoreError> {
        let _: () = redis::pipe()
            .atomic()
            .zrem(INFLIGHT, id)
            .ignore()
            .hdel(PAYLOADS, id)
            .ignore()
            .query_async(conn)
            .await
            .map_err(queue_error)?;
        Ok(())
    }
}
