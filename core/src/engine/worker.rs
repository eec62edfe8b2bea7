//! Native engine worker: polls a frontend for decision and activity tasks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::frontend::Frontend;
use super::history::{DecisionResult, Execution, Failure, Headers, TimeoutKind};
use super::propagator::ContextPropagator;
use super::replay::Replayer;
use super::state::{ActivityTask, DecisionTask};
use super::{ActivityFn, WorkflowFn};
use crate::codec::Payload;

#[derive(Clone)]
pub struct WorkerOptions {
    pub identity: String,
    pub max_concurrent_activities: usize,
    pub poll_interval: Duration,
    pub propagators: Vec<Arc<dyn ContextPropagator>>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            identity: format!("starflow-{}", std::process::id()),
            max_concurrent_activities: 16,
            poll_interval: Duration::from_millis(200),
            propagators: Vec::new(),
        }
    }
}

/// Everything an activity function learns about its invocation.
#[derive(Debug, Clone)]
pub struct ActivityInvocation {
    pub activity_type: String,
    pub activity_id: String,
    pub execution: Execution,
    pub domain: String,
    pub task_list: String,
    pub attempt: u32,
    pub headers: Headers,
    pub cancel: CancellationToken,
}

/// Runs activity tasks against registered activity functions.
#[derive(Clone, Default)]
pub struct ActivityExecutor {
    activities: HashMap<String, ActivityFn>,
}

impl ActivityExecutor {
    pub fn new(activities: HashMap<String, ActivityFn>) -> Self {
        Self { activities }
    }

    pub fn has_activity(&self, activity_type: &str) -> bool {
        self.activities.contains_key(activity_type)
    }

    pub async fn execute(&self, task: ActivityTask, cancel: CancellationToken) -> Result<Payload, Failure> {
        let Some(handler) = self.activities.get(&task.activity_type).cloned() else {
            return Err(Failure::Generic(format!(
                "activity type {:?} is not registered",
                task.activity_type
            )));
        };
        tracing::debug!(
            activity_type = %task.activity_type,
            workflow_id = %task.execution.workflow_id,
            attempt = task.attempt,
            "executing activity"
        );
        let invocation = ActivityInvocation {
            activity_type: task.activity_type.clone(),
            activity_id: task.activity_id.clone(),
            execution: task.execution.clone(),
            domain: task.domain.clone(),
            task_list: task.task_list.clone(),
            attempt: task.attempt,
            headers: task.headers.clone(),
            cancel: cancel.clone(),
        };
        let call = handler(invocation, task.input);
        match task.options.start_to_close_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, call).await {
                Ok(result) => result,
                Err(_) => {
                    cancel.cancel();
                    Err(Failure::Timeout(TimeoutKind::StartToClose))
                }
            },
            None => call.await,
        }
    }
}

pub struct NativeWorker {
    frontend: Arc<dyn Frontend>,
    domain: String,
    task_list: String,
    options: WorkerOptions,
    workflows: HashMap<String, WorkflowFn>,
    activities: HashMap<String, ActivityFn>,
    shutdown: CancellationToken,
    pollers: Vec<JoinHandle<()>>,
}

impl NativeWorker {
    pub fn new(frontend: Arc<dyn Frontend>, domain: &str, task_list: &str, options: WorkerOptions) -> Self {
        Self {
            frontend,
            domain: domain.to_string(),
            task_list: task_list.to_string(),
            options,
            workflows: HashMap::new(),
            activities: HashMap::new(),
            shutdown: CancellationToken::new(),
            pollers: Vec::new(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn task_list(&self) -> &str {
        &self.task_list
    }

    pub fn frontend(&self) -> &Arc<dyn Frontend> {
        &self.frontend
    }

    pub fn register_workflow(&mut self, name: &str, workflow: WorkflowFn) {
        self.workflows.insert(name.to_string(), workflow);
    }

    pub fn register_activity(&mut self, name: &str, activity: ActivityFn) {
        self.activities.insert(name.to_string(), activity);
    }

    pub fn replayer(&self) -> Replayer {
        Replayer::new(self.workflows.clone(), self.options.propagators.clone())
    }

    pub fn activity_executor(&self) -> ActivityExecutor {
        ActivityExecutor::new(self.activities.clone())
    }

    pub fn is_running(&self) -> bool {
        !self.pollers.is_empty()
    }

    /// Spawn the decision and activity pollers.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        tracing::info!(
            identity = %self.options.identity,
            domain = %self.domain,
            task_list = %self.task_list,
            workflows = self.workflows.len(),
            activities = self.activities.len(),
            "worker started"
        );
        let decisions = DecisionPoller {
            frontend: self.frontend.clone(),
            domain: self.domain.clone(),
            task_list: self.task_list.clone(),
            replayer: Arc::new(self.replayer()),
            poll_interval: self.options.poll_interval,
            shutdown: self.shutdown.clone(),
        };
        let activities = ActivityPoller {
            frontend: self.frontend.clone(),
            domain: self.domain.clone(),
            task_list: self.task_list.clone(),
            executor: Arc::new(self.activity_executor()),
            permits: Arc::new(Semaphore::new(self.options.max_concurrent_activities.max(1))),
            poll_interval: self.options.poll_interval,
            shutdown: self.shutdown.clone(),
        };
        self.pollers.push(tokio::spawn(decisions.run()));
        self.pollers.push(tokio::spawn(activities.run()));
    }

    /// Stop polling and wait for the pollers to exit.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        for poller in self.pollers.drain(..) {
            if let Err(e) = poller.await {
                tracing::warn!(error = %e, "poller exited abnormally");
            }
        }
        tracing::info!(identity = %self.options.identity, "worker stopped");
    }
}

/// Wait `interval` unless shutdown comes first. Returns false on shutdown.
async fn idle(shutdown: &CancellationToken, interval: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(interval) => true,
    }
}

struct DecisionPoller {
    frontend: Arc<dyn Frontend>,
    domain: String,
    task_list: String,
    replayer: Arc<Replayer>,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl DecisionPoller {
    async fn run(self) {
        while !self.shutdown.is_cancelled() {
            match self.frontend.poll_decision_task(&self.domain, &self.task_list).await {
                Ok(Some(task)) => self.handle(task).await,
                Ok(None) => {
                    if !idle(&self.shutdown, self.poll_interval).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "decision poll failed");
                    if !idle(&self.shutdown, self.poll_interval).await {
                        break;
                    }
                }
            }
        }
    }

    async fn handle(&self, task: DecisionTask) {
        let DecisionTask {
            token,
            execution,
            history,
            ..
        } = task;
        let replayer = self.replayer.clone();
        // Workflow code is single-threaded; replay it off the async runtime.
        let result = tokio::task::spawn_blocking(move || replayer.decide(&execution, &history))
            .await
            .unwrap_or_else(|e| DecisionResult::Failed(Failure::Generic(format!("decision task panicked: {e}"))));
        if let Err(e) = self.frontend.respond_decision_task(token, result).await {
            tracing::warn!(error = %e, "failed to respond to decision task");
        }
    }
}

struct ActivityPoller {
    frontend: Arc<dyn Frontend>,
    domain: String,
    task_list: String,
    executor: Arc<ActivityExecutor>,
    permits: Arc<Semaphore>,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl ActivityPoller {
    async fn run(self) {
        loop {
            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = self.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            match self.frontend.poll_activity_task(&self.domain, &self.task_list).await {
                Ok(Some(task)) => {
                    let frontend = self.frontend.clone();
                    let executor = self.executor.clone();
                    let cancel = self.shutdown.child_token();
                    tokio::spawn(async move {
                        let token = task.token.clone();
                        let result = executor.execute(task, cancel).await;
                        if let Err(e) = frontend.respond_activity_task(&token, result).await {
                            tracing::warn!(error = %e, "failed to respond to activity task");
                        }
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    if !idle(&self.shutdown, self.poll_interval).await {
                        break;
                    }
                }
                Err(e) => {
                    drop(permit);
                    tracing::error!(error = %e, "activity poll failed");
                    if !idle(&self.shutdown, self.poll_interval).await {
                        break;
                    }
                }
            }
        }
    }
}
