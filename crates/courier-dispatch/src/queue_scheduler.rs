//! Queue-backed scheduler: push consumption instead of polling.
//!
//! Exposes the same start/stop/status contract as the polling
//! [`Scheduler`](crate::scheduler::Scheduler). Messages are pushed by the
//! transport; each one is dispatched as a single-message batch. The store
//! stays authoritative for message state in this mode too — the broker
//! only provides delivery timing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use async_trait::async_trait;
use courier_db::models::Message;

use crate::audit::AuditEmitter;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::error::SchedulerError;
use crate::scheduler::{SchedulerState, SchedulerStatus, SHUTDOWN_GRACE};
use crate::store::MessageStore;
use crate::transport::{HandlerOutcome, MessageHandler, Transport};

/// How often the reconciliation tick republishes due retries, covering
/// broker republications lost to a crash mid-backoff.
const RECONCILE_INTERVAL: Duration = Duration::from_secs(60);

/// Upper bound on messages republished per recovery pass.
const RECOVERY_LIMIT: i64 = 1000;

/// Drives dispatch from a [`Transport`] with push consumption.
pub struct QueueScheduler {
    transport: Arc<dyn Transport>,
    dispatcher: Arc<Dispatcher>,
    store: Arc<dyn MessageStore>,
    audit: Option<AuditEmitter>,
    state: Mutex<SchedulerState>,
}

impl QueueScheduler {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        dispatcher: Arc<Dispatcher>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            transport,
            dispatcher,
            store,
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

    /// Start consuming from the transport.
    ///
    /// Runs the orphan sweep and republishes messages the store still
    /// holds as eligible, so nothing is stranded by an earlier crash.
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

        match self.store.reset_orphaned_sending().await {
            Ok(0) => {}
            Ok(recovered) => {
                tracing::info!(target: "scheduler", recovered, "reset orphaned sending messages");
            }
            Err(error) => {
                tracing::error!(target: "scheduler", %error, "orphan sweep failed");
            }
        }
        self.republish_eligible().await;

        let transport = self.transport.clone();
        let store = self.store.clone();
        let handler: Arc<dyn MessageHandler> = Arc::new(DispatchHandler {
            dispatcher: self.dispatcher.clone(),
            audit: self.audit.clone(),
        });
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let consume = async {
                if let Err(error) = transport.consume(handler, task_cancel.clone()).await {
                    tracing::error!(target: "scheduler", %error, "transport consumption ended");
                }
            };
            let reconcile = reconcile_loop(transport.clone(), store, task_cancel.clone());
            tokio::join!(consume, reconcile);
        });
        self.state.lock().await.task = Some(task);

        if let Some(audit) = &self.audit {
            audit.scheduler_started();
        }
        tracing::info!(
            target: "scheduler",
            transport = %self.transport.kind(),
            "queue scheduler started"
        );
        Ok(())
    }

    /// Stop consuming and close the transport.
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
                    "queue scheduler task did not drain within the shutdown grace period"
                );
            }
        }

        if let Err(error) = self.transport.close().await {
            tracing::warn!(target: "scheduler", %error, "error closing transport");
        }

        if let Some(audit) = &self.audit {
            audit.scheduler_stopped();
        }
        tracing::info!(target: "scheduler", "queue scheduler stopped");
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

    /// Push messages the store still considers eligible back onto the
    /// transport. Duplicates are harmless: the dispatcher's conditional
    /// reservation lets only one copy through.
    async fn republish_eligible(&self) {
        let mut eligible: Vec<Message> = Vec::new();
        match self.store.pending(RECOVERY_LIMIT).await {
            Ok(messages) => eligible.extend(messages),
            Err(error) => {
                tracing::error!(target: "scheduler", %error, "failed to load pending messages");
            }
        }
        match self.store.retryable(RECOVERY_LIMIT).await {
            Ok(messages) => eligible.extend(messages),
            Err(error) => {
                tracing::error!(target: "scheduler", %error, "failed to load retryable messages");
            }
        }

        if eligible.is_empty() {
            return;
        }

        let mut published = 0usize;
        for message in &eligible {
            match self.transport.publish(message).await {
                Ok(()) => published += 1,
                Err(error) => {
                    tracing::error!(
                        target: "scheduler",
                        message_id = %message.id,
                        %error,
                        "failed to republish message"
                    );
                }
            }
        }
        tracing::info!(target: "scheduler", published, "republished eligible messages");
    }
}

/// Periodically republishes due retries so a crash during a broker-side
/// backoff sleep cannot strand a message in `failed`.
async fn reconcile_loop(
    transport: Arc<dyn Transport>,
    store: Arc<dyn MessageStore>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(RECONCILE_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the immediate first tick; start already republished.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                match store.retryable(RECOVERY_LIMIT).await {
                    Ok(messages) => {
                        for message in &messages {
                            if let Err(error) = transport.publish(message).await {
                                tracing::error!(
                                    target: "scheduler",
                                    message_id = %message.id,
                                    %error,
                                    "failed to republish due retry"
                                );
                            }
                        }
                    }
                    Err(error) => {
                        tracing::error!(target: "scheduler", %error, "retry reconciliation failed");
                    }
                }
            }
        }
    }
}

/// Adapts the dispatcher to the transport's consume callback, auditing
/// each push delivery as a single-message batch.
struct DispatchHandler {
    dispatcher: Arc<Dispatcher>,
    audit: Option<AuditEmitter>,
}

#[async_trait]
impl MessageHandler for DispatchHandler {
    async fn handle(&self, message: Message, cancel: &CancellationToken) -> HandlerOutcome {
        let batch_id = Uuid::new_v4();
        let started = Instant::now();

        if let Some(audit) = &self.audit {
            audit.batch_started(batch_id, 1);
        }

        let result = self.dispatcher.dispatch(&message, cancel).await;
        let duration = started.elapsed();

        match result {
            Ok(DispatchOutcome::Sent) => {
                if let Some(audit) = &self.audit {
                    audit.batch_completed(batch_id, duration, 1, 0);
                }
                HandlerOutcome::Delivered
            }
            Ok(DispatchOutcome::Retried { reason }) => {
                if let Some(audit) = &self.audit {
                    audit.batch_completed(batch_id, duration, 0, 1);
                }
                HandlerOutcome::Retry(reason)
            }
            Ok(DispatchOutcome::DeadLettered { reason }) => {
                if let Some(audit) = &self.audit {
                    audit.batch_completed(batch_id, duration, 0, 1);
                }
                HandlerOutcome::DeadLettered(reason)
            }
            Ok(DispatchOutcome::Skipped) => HandlerOutcome::Skipped,
            Ok(DispatchOutcome::Canceled) => {
                HandlerOutcome::Retry("dispatch canceled".to_string())
            }
            Err(error) => {
                if let Some(audit) = &self.audit {
                    audit.batch_failed(batch_id, duration, &error.to_string());
                }
                HandlerOutcome::Retry(error.to_string())
            }
        }
    }
}
