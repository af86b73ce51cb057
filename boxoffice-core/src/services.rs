use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::events::SeatDelta;
use crate::hold::HoldRecord;
use crate::jobs::{Job, JobEnvelope, Notification, RetryPolicy};

/// Proof of a held mutual-exclusion key; releasing checks the value so a
/// late release never deletes someone else's lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub key: String,
    pub value: String,
}

/// Shared TTL key-value store used for short-lived mutual exclusion and
/// for mirroring holds.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Set-if-absent with `ttl`. `None` when somebody else owns `key`.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>, StoreError>;

    async fn release(&self, token: &LockToken) -> Result<(), StoreError>;

    async fn put_hold(&self, record: &HoldRecord, ttl: Duration) -> Result<(), StoreError>;

    async fn get_hold(&self, event_id: Uuid, holder_id: &str) -> Result<Option<HoldRecord>, StoreError>;

    async fn clear_hold(&self, event_id: Uuid, holder_id: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    Rescheduled { run_at: DateTime<Utc> },
    DeadLettered,
}

/// Durable at-least-once delayed job scheduler.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn schedule(&self, job: Job, delay: Duration, policy: RetryPolicy) -> Result<Uuid, StoreError>;

    /// Leases up to `limit` due jobs. Leases that lapse without `complete`
    /// or `fail` make the job due again.
    async fn claim_due(&self, limit: usize) -> Result<Vec<JobEnvelope>, StoreError>;

    async fn complete(&self, job_id: Uuid) -> Result<(), StoreError>;

    async fn fail(&self, envelope: JobEnvelope, reason: &str) -> Result<FailureOutcome, StoreError>;
}

/// Delivery of notification payloads to the out-of-scope notifier.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriberId(pub Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Room-scoped broadcast of seat deltas. Best-effort, at-most-once.
#[async_trait]
pub trait FanOut: Send + Sync {
    async fn join(&self, subscriber: SubscriberId, event_id: Uuid);

    async fn leave(&self, subscriber: SubscriberId, event_id: Uuid);

    async fn publish(&self, delta: SeatDelta) -> Result<(), StoreError>;
}
