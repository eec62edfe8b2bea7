//! In-process frontend. Everything lives behind one async mutex.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tokio::sync::Mutex;

use super::{Clock, Frontend, FrontendError, Store, SystemClock};
use crate::codec::Payload;
use crate::engine::history::{DecisionResult, Event, Execution, Failure};
use crate::engine::state::{ActivityTask, DecisionTask, DecisionToken, ExecutionRecord, StartWorkflowRequest, TimerTask};

#[derive(Default)]
struct MemoryState {
    now: DateTime<Utc>,
    executions: IndexMap<String, ExecutionRecord>,
    activities: Vec<ActivityTask>,
    running: HashMap<String, ActivityTask>,
    timers: Vec<TimerTask>,
}

#[async_trait]
impl Store for MemoryState {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    async fn load(&mut self, workflow_id: &str) -> Result<Option<ExecutionRecord>, FrontendError> {
        Ok(self.executions.get(workflow_id).cloned())
    }

    async fn save(&mut self, record: &ExecutionRecord) -> Result<(), FrontendError> {
        self.executions
            .insert(record.execution.workflow_id.clone(), record.clone());
        Ok(())
    }

    async fn push_activity(&mut self, task: ActivityTask) -> Result<(), FrontendError> {
        self.activities.push(task);
        Ok(())
    }

    async fn push_timer(&mut self, timer: TimerTask) -> Result<(), FrontendError> {
        self.timers.push(timer);
        Ok(())
    }
}

impl MemoryState {
    async fn fire_due_timers(&mut self) -> Result<(), FrontendError> {
        let now = self.now;
        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.timers)
            .into_iter()
            .partition(|t| t.fire_at <= now);
        self.timers = pending;
        super::fire_timers(self, due).await
    }
}

pub struct MemoryFrontend {
    state: Mutex<MemoryState>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryFrontend {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryFrontend {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            clock,
        }
    }

    async fn lock(&self) -> Result<tokio::sync::MutexGuard<'_, MemoryState>, FrontendError> {
        let mut state = self.state.lock().await;
        state.now = self.clock.now();
        state.fire_due_timers().await?;
        Ok(state)
    }

    /// Earliest future instant at which a timer fires or a retried
    /// activity becomes visible.
    pub async fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        let state = self.state.lock().await;
        let now = self.clock.now();
        let timers = state.timers.iter().map(|t| t.fire_at);
        let activities = state.activities.iter().map(|a| a.visible_at).filter(|at| *at > now);
        timers.chain(activities).min()
    }

    /// Every `(domain, task_list)` pair with an open execution or a queued
    /// activity task.
    pub async fn task_queues(&self) -> Vec<(String, String)> {
        let state = self.state.lock().await;
        let executions = state
            .executions
            .values()
            .filter(|r| r.is_open())
            .map(|r| (r.domain.clone(), r.task_list.clone()));
        let activities = state.activities.iter().map(|t| (t.domain.clone(), t.task_list.clone()));
        let mut queues: Vec<(String, String)> = executions.chain(activities).collect();
        queues.sort();
        queues.dedup();
        queues
    }

    /// Number of activity tasks handed out and not yet answered.
    pub async fn running_activities(&self) -> usize {
        self.state.lock().await.running.len()
    }
}

#[async_trait]
impl Frontend for MemoryFrontend {
    async fn start_workflow(&self, request: StartWorkflowRequest) -> Result<Execution, FrontendError> {
        let mut state = self.lock().await?;
        let workflow_id = request
            .workflow_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        super::start(&mut *state, workflow_id, request, None).await
    }

    async fn signal_workflow(&self, workflow_id: &str, name: &str, input: Payload) -> Result<(), FrontendError> {
        let mut state = self.lock().await?;
        let event = Event::WorkflowExecutionSignaled {
            name: name.to_string(),
            input,
        };
        super::deliver(&mut *state, workflow_id, None, event).await.map(|_| ())
    }

    async fn cancel_workflow(&self, workflow_id: &str) -> Result<(), FrontendError> {
        let mut state = self.lock().await?;
        super::deliver(&mut *state, workflow_id, None, Event::WorkflowExecutionCancelRequested)
            .await
            .map(|_| ())
    }

    async fn describe(&self, workflow_id: &str) -> Result<ExecutionRecord, FrontendError> {
        let state = self.state.lock().await;
        state
            .executions
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| FrontendError::NotFound(workflow_id.to_string()))
    }

    async fn poll_decision_task(&self, domain: &str, task_list: &str) -> Result<Option<DecisionTask>, FrontendError> {
        let mut state = self.lock().await?;
        let now = state.now;
        let task = state
            .executions
            .values_mut()
            .filter(|r| r.domain == domain && r.task_list == task_list)
            .find_map(|r| r.start_decision(now));
        Ok(task)
    }

    async fn respond_decision_task(&self, token: DecisionToken, result: DecisionResult) -> Result<(), FrontendError> {
        let mut state = self.lock().await?;
        super::complete_decision(&mut *state, &token, result).await
    }

    async fn poll_activity_task(&self, domain: &str, task_list: &str) -> Result<Option<ActivityTask>, FrontendError> {
        let mut state = self.lock().await?;
        let now = state.now;
        let Some(index) = state
            .activities
            .iter()
            .position(|t| t.domain == domain && t.task_list == task_list && t.visible_at <= now)
        else {
            return Ok(None);
        };
        let task = state.activities.remove(index);
        state.running.insert(task.token.clone(), task.clone());
        Ok(Some(task))
    }

    async fn respond_activity_task(&self, token: &str, result: Result<Payload, Failure>) -> Result<(), FrontendError> {
        let mut state = self.lock().await?;
        let task = state
            .running
            .remove(token)
            .ok_or_else(|| FrontendError::StaleTask(token.to_string()))?;
        super::complete_activity(&mut *state, task, result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::frontend::ManualClock;
    use crate::engine::history::{Command, Headers};
    use std::time::Duration;

    fn request(workflow_id: &str) -> StartWorkflowRequest {
        StartWorkflowRequest {
            workflow_id: Some(workflow_id.into()),
            workflow_type: "flow".into(),
            domain: "default".into(),
            task_list: "tl".into(),
            input: vec![],
            headers: Headers::new(),
            cron_schedule: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_start_is_rejected_while_open() {
        let frontend = MemoryFrontend::default();
        frontend.start_workflow(request("wf")).await.unwrap();
        let err = frontend.start_workflow(request("wf")).await.unwrap_err();
        assert!(matches!(err, FrontendError::AlreadyStarted(id) if id == "wf"));
    }

    #[tokio::test]
    async fn test_timer_fires_when_clock_passes() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let frontend = MemoryFrontend::new(clock.clone());
        frontend.start_workflow(request("wf")).await.unwrap();

        let task = frontend.poll_decision_task("default", "tl").await.unwrap().unwrap();
        frontend
            .respond_decision_task(
                task.token,
                DecisionResult::Completed(vec![Command::StartTimer {
                    seq: 0,
                    duration: Duration::from_secs(60),
                }]),
            )
            .await
            .unwrap();
        assert!(frontend.poll_decision_task("default", "tl").await.unwrap().is_none());
        assert!(frontend.next_wakeup().await.is_some());

        clock.advance(Duration::from_secs(61));
        let task = frontend.poll_decision_task("default", "tl").await.unwrap().unwrap();
        assert!(matches!(task.history.iter().rev().nth(1).map(|e| &e.event), Some(Event::TimerFired { seq: 0 })));
    }

    #[tokio::test]
    async fn test_activity_failure_is_retried_per_policy() {
        let frontend = MemoryFrontend::new(Arc::new(ManualClock::new(Utc::now())));
        frontend.start_workflow(request("wf")).await.unwrap();
        let task = frontend.poll_decision_task("default", "tl").await.unwrap().unwrap();
        let options = crate::engine::ActivityOptions {
            retry_policy: Some(crate::engine::RetryPolicy {
                initial_interval: Duration::ZERO,
                backoff_coefficient: 1.0,
                maximum_interval: None,
                expiration_interval: None,
                maximum_attempts: 2,
                non_retriable_reasons: vec![],
            }),
            ..Default::default()
        };
        frontend
            .respond_decision_task(
                task.token,
                DecisionResult::Completed(vec![Command::ScheduleActivity {
                    seq: 0,
                    activity_type: "flaky".into(),
                    activity_id: "0".into(),
                    task_list: "tl".into(),
                    input: vec![],
                    options,
                    headers: Headers::new(),
                }]),
            )
            .await
            .unwrap();

        let first = frontend.poll_activity_task("default", "tl").await.unwrap().unwrap();
        frontend
            .respond_activity_task(&first.token, Err(Failure::Generic("boom".into())))
            .await
            .unwrap();
        let second = frontend.poll_activity_task("default", "tl").await.unwrap().unwrap();
        assert_eq!(second.attempt, 2);
        frontend
            .respond_activity_task(&second.token, Err(Failure::Generic("boom".into())))
            .await
            .unwrap();

        let history = frontend.history("wf").await.unwrap();
        assert!(matches!(
            history.last().map(|e| &e.event),
            Some(Event::ActivityTaskFailed { seq: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_signal_to_unknown_workflow_is_not_found() {
        let frontend = MemoryFrontend::default();
        let err = frontend
            .signal_workflow("missing", "go", Payload::unit())
            .await
            .unwrap_err();
        assert!(matches!(err, FrontendError::NotFound(_)));
    }
}
