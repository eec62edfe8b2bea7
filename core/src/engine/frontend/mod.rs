//! Engine frontends: the service side that stores executions and hands out
//! decision and activity tasks.
//!
//! Both frontends share the transition logic below. A frontend only decides
//! how records and task queues are stored and locked; it exposes that
//! through [`Store`], scoped to one atomic operation.

mod memory;
mod postgres;

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::history::{DecisionResult, Event, Execution, Failure, HistoryEntry, ParentRef};
use super::state::{ActivityTask, DecisionTask, DecisionToken, Effect, ExecutionRecord, StartWorkflowRequest, TimerTask};
use crate::codec::Payload;

pub use memory::MemoryFrontend;
pub use postgres::PostgresFrontend;

/* ===================== Errors ===================== */

#[derive(Debug, thiserror::Error)]
pub enum FrontendError {
    #[error("workflow {0:?} not found")]
    NotFound(String),

    #[error("workflow {0:?} is already running")]
    AlreadyStarted(String),

    #[error("task {0} is no longer valid")]
    StaleTask(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/* ===================== Clock ===================== */

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to; lets tests skip over timers.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/* ===================== Frontend ===================== */

#[async_trait]
pub trait Frontend: Send + Sync {
    async fn start_workflow(&self, request: StartWorkflowRequest) -> Result<Execution, FrontendError>;

    async fn signal_workflow(&self, workflow_id: &str, name: &str, input: Payload) -> Result<(), FrontendError>;

    async fn cancel_workflow(&self, workflow_id: &str) -> Result<(), FrontendError>;

    /// The latest run of `workflow_id`.
    async fn describe(&self, workflow_id: &str) -> Result<ExecutionRecord, FrontendError>;

    async fn history(&self, workflow_id: &str) -> Result<Vec<HistoryEntry>, FrontendError> {
        Ok(self.describe(workflow_id).await?.history)
    }

    async fn poll_decision_task(&self, domain: &str, task_list: &str) -> Result<Option<DecisionTask>, FrontendError>;

    async fn respond_decision_task(&self, token: DecisionToken, result: DecisionResult) -> Result<(), FrontendError>;

    async fn poll_activity_task(&self, domain: &str, task_list: &str) -> Result<Option<ActivityTask>, FrontendError>;

    async fn respond_activity_task(&self, token: &str, result: Result<Payload, Failure>) -> Result<(), FrontendError>;
}

/* ===================== Shared transitions ===================== */

/// Storage for one atomic frontend operation.
#[async_trait]
pub(crate) trait Store: Send {
    fn now(&self) -> DateTime<Utc>;

    async fn load(&mut self, workflow_id: &str) -> Result<Option<ExecutionRecord>, FrontendError>;

    async fn save(&mut self, record: &ExecutionRecord) -> Result<(), FrontendError>;

    async fn push_activity(&mut self, task: ActivityTask) -> Result<(), FrontendError>;

    async fn push_timer(&mut self, timer: TimerTask) -> Result<(), FrontendError>;
}

pub(crate) async fn start<S: Store + ?Sized>(
    store: &mut S,
    workflow_id: String,
    request: StartWorkflowRequest,
    parent: Option<ParentRef>,
) -> Result<Execution, FrontendError> {
    if let Some(existing) = store.load(&workflow_id).await? {
        if existing.is_open() {
            return Err(FrontendError::AlreadyStarted(workflow_id));
        }
    }
    let record = ExecutionRecord::start(workflow_id, request, parent, store.now());
    store.save(&record).await?;
    tracing::info!(
        workflow_id = %record.execution.workflow_id,
        run_id = %record.execution.run_id,
        workflow_type = %record.workflow_type,
        "workflow started"
    );
    Ok(record.execution)
}

/// Append `event` to the latest run of `workflow_id`, or to `run_id` only.
/// Returns whether the event was recorded.
pub(crate) async fn deliver<S: Store + ?Sized>(
    store: &mut S,
    workflow_id: &str,
    run_id: Option<&str>,
    event: Event,
) -> Result<bool, FrontendError> {
    let Some(mut record) = store.load(workflow_id).await? else {
        return Err(FrontendError::NotFound(workflow_id.to_string()));
    };
    if run_id.is_some_and(|run_id| run_id != record.execution.run_id) {
        return Ok(false);
    }
    let delivered = record.deliver(event, store.now());
    if delivered {
        store.save(&record).await?;
    }
    Ok(delivered)
}

pub(crate) async fn complete_decision<S: Store + ?Sized>(
    store: &mut S,
    token: &DecisionToken,
    result: DecisionResult,
) -> Result<(), FrontendError> {
    let Some(mut record) = store.load(&token.workflow_id).await? else {
        return Err(FrontendError::NotFound(token.workflow_id.clone()));
    };
    if !record.owns(token) {
        return Err(FrontendError::StaleTask(format!(
            "{}/{}",
            token.workflow_id, token.started_event_id
        )));
    }
    let now = store.now();
    let effects = match result {
        DecisionResult::Completed(commands) => record.complete_decision(commands, now),
        DecisionResult::Failed(failure) => {
            tracing::warn!(workflow_id = %token.workflow_id, %failure, "decision failed");
            record.fail_decision(failure, now)
        }
    };
    store.save(&record).await?;
    apply_effects(store, effects).await
}

async fn apply_effects<S: Store + ?Sized>(store: &mut S, effects: Vec<Effect>) -> Result<(), FrontendError> {
    for effect in effects {
        match effect {
            Effect::Activity(task) => store.push_activity(task).await?,
            Effect::Timer(timer) => store.push_timer(timer).await?,
            Effect::StartChild {
                parent,
                workflow_id,
                request,
            } => {
                let seq = parent.seq;
                let event = match start(store, workflow_id, request, Some(parent.clone())).await {
                    Ok(execution) => Event::ChildWorkflowExecutionStarted { seq, execution },
                    Err(FrontendError::AlreadyStarted(id)) => Event::StartChildWorkflowExecutionFailed {
                        seq,
                        failure: Failure::Custom {
                            reason: "already-started".to_string(),
                            details: Some(id),
                        },
                    },
                    Err(err) => return Err(err),
                };
                deliver(store, &parent.execution.workflow_id, Some(&parent.execution.run_id), event).await?;
            }
            Effect::Signal {
                origin,
                workflow_id,
                name,
                input,
            } => {
                let seq = origin.seq;
                let signaled = deliver(store, &workflow_id, None, Event::WorkflowExecutionSignaled { name, input }).await;
                let event = match signaled {
                    Ok(true) => Event::ExternalWorkflowExecutionSignaled { seq },
                    Ok(false) => Event::SignalExternalWorkflowExecutionFailed {
                        seq,
                        failure: Failure::Generic(format!("workflow {:?} is closed", workflow_id)),
                    },
                    Err(FrontendError::NotFound(id)) => Event::SignalExternalWorkflowExecutionFailed {
                        seq,
                        failure: Failure::Generic(format!("workflow {:?} not found", id)),
                    },
                    Err(err) => return Err(err),
                };
                deliver(store, &origin.execution.workflow_id, Some(&origin.execution.run_id), event).await?;
            }
            Effect::NotifyParent { parent, event } => {
                deliver(store, &parent.execution.workflow_id, Some(&parent.execution.run_id), event).await?;
            }
        }
    }
    Ok(())
}

/// Record an activity outcome, rescheduling failed attempts the retry
/// policy allows.
pub(crate) async fn complete_activity<S: Store + ?Sized>(
    store: &mut S,
    task: ActivityTask,
    result: Result<Payload, Failure>,
) -> Result<(), FrontendError> {
    let workflow_id = task.execution.workflow_id.clone();
    let run_id = task.execution.run_id.clone();
    let event = match result {
        Ok(result) => Event::ActivityTaskCompleted { seq: task.seq, result },
        Err(failure) => {
            if let Some(retry) = next_attempt(store, &task, &failure).await? {
                tracing::info!(
                    activity_type = %task.activity_type,
                    attempt = retry.attempt,
                    %failure,
                    "retrying activity"
                );
                return store.push_activity(retry).await;
            }
            Event::ActivityTaskFailed { seq: task.seq, failure }
        }
    };
    match deliver(store, &workflow_id, Some(&run_id), event).await {
        Ok(_) | Err(FrontendError::NotFound(_)) => Ok(()),
        Err(err) => Err(err),
    }
}

async fn next_attempt<S: Store + ?Sized>(
    store: &mut S,
    task: &ActivityTask,
    failure: &Failure,
) -> Result<Option<ActivityTask>, FrontendError> {
    let Some(policy) = &task.options.retry_policy else {
        return Ok(None);
    };
    if !policy.allows_retry(task.attempt, failure) {
        return Ok(None);
    }
    let now = store.now();
    let expiration = policy.expiration_interval.or(task.options.schedule_to_close_timeout);
    let delay = chrono::Duration::from_std(policy.backoff(task.attempt)).unwrap_or_else(|_| chrono::Duration::zero());
    if let Some(expiration) = expiration.and_then(|e| chrono::Duration::from_std(e).ok()) {
        if now + delay >= task.scheduled_at + expiration {
            return Ok(None);
        }
    }
    let open = store
        .load(&task.execution.workflow_id)
        .await?
        .is_some_and(|r| r.is_open() && r.execution.run_id == task.execution.run_id);
    if !open {
        return Ok(None);
    }
    Ok(Some(ActivityTask {
        token: uuid::Uuid::new_v4().to_string(),
        attempt: task.attempt + 1,
        visible_at: now + delay,
        ..task.clone()
    }))
}

pub(crate) async fn fire_timers<S: Store + ?Sized>(store: &mut S, mut due: Vec<TimerTask>) -> Result<(), FrontendError> {
    due.sort_by(|a, b| a.fire_at.cmp(&b.fire_at).then(a.seq.cmp(&b.seq)));
    for timer in due {
        let event = Event::TimerFired { seq: timer.seq };
        match deliver(store, &timer.execution.workflow_id, Some(&timer.execution.run_id), event).await {
            Ok(_) | Err(FrontendError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
