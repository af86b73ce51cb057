use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Work carried by the delayed job queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    /// Return seats to `available` if the hold that expires at `expires_at`
    /// (or an earlier one) still owns them.
    ReleaseSeats {
        event_id: Uuid,
        seat_ids: Vec<Uuid>,
        expires_at: DateTime<Utc>,
    },
    Notify(Notification),
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::ReleaseSeats { .. } => "release_seats",
            Job::Notify(_) => "notify",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BookingConfirmed,
    BookingCancelled,
}

/// Payload handed to the notification collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub recipient: String,
    pub data: serde_json::Value,
}

/// Attempts and exponential backoff for a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    pub const fn exponential(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
        }
    }

    /// Delay before the retry that follows failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(1u64 << exponent))
    }
}

/// A job as stored in the queue, with its delivery bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobEnvelope {
    pub id: Uuid,
    pub job: Job,
    /// Attempts that have already failed.
    pub attempts: u32,
    pub policy: RetryPolicy,
    pub run_at: DateTime<Utc>,
}

impl JobEnvelope {
    pub fn new(job: Job, policy: RetryPolicy, run_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job,
            attempts: 0,
            policy,
            run_at,
        }
    }

    /// Records a failed attempt. Returns the next run time, or `None` once
    /// the policy is exhausted.
    pub fn record_failure(&mut self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.attempts += 1;
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        let delay = chrono::Duration::from_std(self.policy.backoff(self.attempts))
            .unwrap_or_else(|_| chrono::Duration::seconds(1));
        self.run_at = now + delay;
        Some(self.run_at)
    }
}
