use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use boxoffice_core::services::{FailureOutcome, JobQueue, Notifier};
use boxoffice_core::{Job, JobEnvelope, ReservationError, StoreError};

use crate::engine::ReservationEngine;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("reservation failed: {0}")]
    Reservation(#[from] ReservationError),

    #[error("delivery failed: {0}")]
    Delivery(#[from] StoreError),
}

/// Drains the delayed job queue: hold expiries and notification hand-offs.
pub struct JobWorker {
    engine: Arc<ReservationEngine>,
    queue: Arc<dyn JobQueue>,
    notifier: Arc<dyn Notifier>,
    batch_size: usize,
    poll_interval: Duration,
    sweep_interval: Duration,
}

impl JobWorker {
    pub fn new(engine: Arc<ReservationEngine>, queue: Arc<dyn JobQueue>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            engine,
            queue,
            notifier,
            batch_size: 50,
            poll_interval: Duration::from_millis(500),
            sweep_interval: Duration::from_secs(30),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// How often lapsed holds are swept regardless of their expiry jobs.
    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Job worker started, polling every {:?}, sweeping every {:?}",
            self.poll_interval, self.sweep_interval
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweeper = tokio::time::interval(self.sweep_interval);
        sweeper.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    while self.tick().await >= self.batch_size {}
                }
                _ = sweeper.tick() => {
                    while self.sweep().await >= self.batch_size {}
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Job worker stopped");
    }

    /// Claims one batch of due jobs and runs it. Returns the batch size.
    pub async fn tick(&self) -> usize {
        let due = match self.queue.claim_due(self.batch_size).await {
            Ok(due) => due,
            Err(e) => {
                error!("Failed to claim due jobs: {}", e);
                return 0;
            }
        };

        let claimed = due.len();
        for envelope in due {
            self.process(envelope).await;
        }
        claimed
    }

    /// One pass of the lapsed-hold backstop. Returns the seats released.
    pub async fn sweep(&self) -> usize {
        match self.engine.sweep_lapsed(self.batch_size).await {
            Ok(released) => released,
            Err(e) => {
                error!("Failed to sweep lapsed holds: {}", e);
                0
            }
        }
    }

    async fn process(&self, envelope: JobEnvelope) {
        let job_id = envelope.id;
        let name = envelope.job.name();
        debug!(job_id = %job_id, job = name, attempt = envelope.attempts + 1, "Running job");

        match self.execute(&envelope.job).await {
            Ok(()) => {
                if let Err(e) = self.queue.complete(job_id).await {
                    // The lease will lapse and the job runs again, which is safe
                    warn!(job_id = %job_id, error = %e, "Failed to acknowledge job");
                }
            }
            Err(e) => match self.queue.fail(envelope, &e.to_string()).await {
                Ok(FailureOutcome::Rescheduled { run_at }) => {
                    warn!(job_id = %job_id, job = name, error = %e, %run_at, "Job failed, retry scheduled");
                }
                Ok(FailureOutcome::DeadLettered) => {
                    error!(job_id = %job_id, job = name, error = %e, "Job failed permanently, moved to dead letters");
                }
                Err(qe) => {
                    error!(job_id = %job_id, job = name, error = %qe, "Failed to record job failure");
                }
            },
        }
    }

    pub async fn execute(&self, job: &Job) -> Result<(), JobError> {
        match job {
            Job::ReleaseSeats {
                event_id,
                seat_ids,
                expires_at,
            } => {
                self.engine.expire(*event_id, seat_ids, *expires_at).await?;
                Ok(())
            }
            Job::Notify(notification) => {
                self.notifier.deliver(notification).await?;
                Ok(())
            }
        }
    }
}
