//! Polling scheduler: ticks at a fixed interval and drives batches.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audit::AuditEmitter;
use crate::error::SchedulerError;
use crate::queue_scheduler::QueueScheduler;
use crate::service::MessageService;
use crate::store::MessageStore;

/// Bound on how long `stop` waits for in-flight work to drain.
pub(crate) const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Snapshot of the scheduler control state.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub(crate) struct SchedulerState {
    pub(crate) running: bool,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) cancel: Option<CancellationToken>,
    pub(crate) task: Option<JoinHandle<()>>,
}

/// Periodically pulls batches of eligible messages and hands each to the
/// dispatcher.
///
/// `start`/`stop` are idempotent: starting twice yields an "already
/// running" error, stopping twice a "not running" error. One batch runs
/// immediately on start, before the first tick fires. Stop cancels the
/// in-flight batch cooperatively and waits for the supervisory task up
/// to a bound.
pub struct Scheduler {
    service: Arc<MessageService>,
    store: Arc<dyn MessageStore>,
    interval: Duration,
    batch_size: i64,
    audit: Option<AuditEmitter>,
    state: Mutex<SchedulerState>,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        service: Arc<MessageService>,
        store: Arc<dyn MessageStore>,
        interval: Duration,
        batch_size: i64,
    ) -> Self {
        Self {
            service,
            store,
            interval,
            batch_size,
            audit: None,
            state: Mutex::new(SchedulerState::default()),
        }
    }

    /// Attach an audit emitter.
    #[must_use]
    pub fn with_audit(mut self, audit: AuditEmitter) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Start the supervisory task.
    ///
    /// # Errors
    ///
    /// `SchedulerError::AlreadyRunning` when already active.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let cancel = CancellationToken::new();
        {
            let mut state = self.state.lock().await;
            if state.running {
                return Err(SchedulerError::AlreadyRunning);
            }
            state.running = true;
            state.started_at = Some(Utc::now());
            state.cancel = Some(cancel.clone());
        }

        // Reclaim rows stranded in `sending` by a previous crash before
        // the first batch runs.
        match self.store.reset_orphaned_sending().await {
            Ok(0) => {}
            Ok(recovered) => {
                tracing::info!(target: "scheduler", recovered, "reset orphaned sending messages");
            }
            Err(error) => {
                tracing::error!(target: "scheduler", %error, "orphan sweep failed");
            }
        }

        let task = tokio::spawn(run_loop(
            self.service.clone(),
            self.audit.clone(),
            self.interval,
            self.batch_size,
            cancel,
        ));
        self.state.lock().await.task = Some(task);

        if let Some(audit) = &self.audit {
            audit.scheduler_started();
        }
        tracing::info!(
            target: "scheduler",
            interval_secs = self.interval.as_secs(),
            batch_size = self.batch_size,
            "scheduler started"
        );
        Ok(())
    }

    /// Stop the supervisory task, waiting for the current batch to drain
    /// or time out.
    ///
    /// # Errors
    ///
    /// `SchedulerError::NotRunning` when not active.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let (cancel, task) = {
            let mut state = self.state.lock().await;
            if !state.running {
                return Err(SchedulerError::NotRunning);
            }
            state.running = false;
            state.started_at = None;
            (state.cancel.take(), state.task.take())
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(task) = task {
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                tracing::warn!(
                    target: "scheduler",
                    "scheduler task did not drain within the shutdown grace period"
                );
            }
        }

        if let Some(audit) = &self.audit {
            audit.scheduler_stopped();
        }
        tracing::info!(target: "scheduler", "scheduler stopped");
        Ok(())
    }

    pub async fn status(&self) -> SchedulerStatus {
        let state = self.state.lock().await;
        SchedulerStatus {
            running: state.running,
            started_at: state.started_at,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }
}

/// The batch context is bounded by `min(30s, interval / 2)`.
pub(crate) fn batch_timeout(interval: Duration) -> Duration {
    Duration::from_secs(30).min(interval / 2)
}

async fn run_loop(
    service: Arc<MessageService>,
    audit: Option<AuditEmitter>,
    interval: Duration,
    batch_size: i64,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(target: "scheduler", "scheduler loop stopping");
                break;
            }
            // The first tick fires immediately, giving the batch-on-start
            // behavior.
            _ = ticker.tick() => {
                run_batch(&service, audit.as_ref(), interval, batch_size, &cancel).await;
            }
        }
    }
}

async fn run_batch(
    service: &MessageService,
    audit: Option<&AuditEmitter>,
    interval: Duration,
    batch_size: i64,
    cancel: &CancellationToken,
) {
    let batch_id = Uuid::new_v4();
    let started = Instant::now();
    let batch_cancel = cancel.child_token();

    if let Some(audit) = audit {
        audit.batch_started(batch_id, batch_size as i32);
    }
    tracing::info!(target: "scheduler", %batch_id, "processing batch");

    let result = tokio::time::timeout(
        batch_timeout(interval),
        service.process_batch(batch_size, &batch_cancel),
    )
    .await;
    let duration = started.elapsed();

    match result {
        Ok(Ok(stats)) => {
            if let Some(audit) = audit {
                audit.batch_completed(batch_id, duration, stats.success, stats.failure);
            }
            tracing::info!(
                target: "scheduler",
                %batch_id,
                duration_ms = duration.as_millis() as u64,
                success = stats.success,
                failure = stats.failure,
                "batch completed"
            );
        }
        Ok(Err(error)) => {
            if let Some(audit) = audit {
                audit.batch_failed(batch_id, duration, &error.to_string());
            }
            tracing::error!(target: "scheduler", %batch_id, %error, "batch failed");
        }
        Err(_) => {
            batch_cancel.cancel();
            if let Some(audit) = audit {
                audit.batch_failed(batch_id, duration, "batch timed out");
            }
            tracing::warn!(target: "scheduler", %batch_id, "batch timed out");
        }
    }
}

/// The scheduler variant chosen at startup: database polling (default)
/// or broker-backed push consumption.
pub enum DispatchScheduler {
    Polling(Scheduler),
    Queue(QueueScheduler),
}

impl DispatchScheduler {
    /// # Errors
    ///
    /// See [`Scheduler::start`] and [`QueueScheduler::start`].
    pub async fn start(&self) -> Result<(), SchedulerError> {
        match self {
            DispatchScheduler::Polling(scheduler) => scheduler.start().await,
            DispatchScheduler::Queue(scheduler) => scheduler.start().await,
        }
    }

    /// # Errors
    ///
    /// See [`Scheduler::stop`] and [`QueueScheduler::stop`].
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        match self {
            DispatchScheduler::Polling(scheduler) => scheduler.stop().await,
            DispatchScheduler::Queue(scheduler) => scheduler.stop().await,
        }
    }

    pub async fn status(&self) -> SchedulerStatus {
        match self {
            DispatchScheduler::Polling(scheduler) => scheduler.status().await,
            DispatchScheduler::Queue(scheduler) => scheduler.status().await,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.status().await.running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_timeout_is_bounded() {
        // Default 2-minute interval: the 30s cap wins.
        assert_eq!(
            batch_timeout(Duration::from_secs(120)),
            Duration::from_secs(30)
        );
        // Short intervals: half the interval wins.
        assert_eq!(
            batch_timeout(Duration::from_secs(20)),
            Duration::from_secs(10)
        );
    }
}
