//! Deterministic test harness for scripts and plugins.
//!
//! A [`TestEnvironment`] runs the script workflow on an in-memory frontend
//! whose clock only moves when nothing else can: timers fire as soon as the
//! workflow is otherwise blocked, so sleeping scripts finish instantly.
//!
//! ```ignore
//! let mut env = TestEnvironment::new(TestEnvironmentParams {
//!     root_directory: "testdata".into(),
//!     plugins: vec![Arc::new(WorkflowPlugin)],
//! })?;
//! env.on_activity("charge").returns(Value::from("ok")).once();
//! env.execute_function("/app.star", "checkout", vec![Value::Int(100)], vec![]);
//! assert_eq!(env.get_result::<String>()?, "ok");
//! env.assert_expectations();
//! ```

mod mock;

#[cfg(test)]
mod tests;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::backend::{from_failure, EngineBackend, EngineWorkflow};
use crate::codec::{DataConverter, Payload};
use crate::engine::{
    ActivityExecutor, ActivityTask, Execution, ExecutionStatus, Failure, Frontend, FrontendError, ManualClock,
    MemoryFrontend, Replayer, StartWorkflowRequest,
};
use crate::service::{PluginError, PluginSet, RunRequest, Service, RUN_WORKFLOW};
use crate::star::{FromValue, Value};
use crate::worker::RegistrationError;
use crate::workflow::WorkflowError;

pub use mock::ActivityMock;

const FRONTEND: &str = "test";
const DOMAIN: &str = "default";
const TASK_LIST: &str = "starflow-test";

/// Upper bound on scheduling rounds of one execution.
const MAX_ROUNDS: usize = 100_000;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TestError {
    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error("reading scripts: {0}")]
    Io(String),

    #[error("engine: {0}")]
    Engine(String),

    #[error("workflow {0} is blocked with nothing left to run")]
    Blocked(String),

    #[error("no function has been executed")]
    NotExecuted,

    #[error("workflow failed: {0}")]
    Workflow(WorkflowError),

    #[error("decoding result: {0}")]
    Decode(String),
}

impl From<FrontendError> for TestError {
    fn from(err: FrontendError) -> Self {
        TestError::Engine(err.to_string())
    }
}

pub struct TestEnvironmentParams {
    /// Every `*.star` file below this directory is loadable as
    /// `/<relative path>`.
    pub root_directory: PathBuf,
    pub plugins: Vec<Arc<dyn crate::service::Plugin>>,
}

struct Outcome {
    execution: Execution,
    result: Result<Value, TestError>,
}

pub struct TestEnvironment {
    files: BTreeMap<String, String>,
    environ: BTreeMap<String, String>,
    converter: DataConverter,
    frontend: Arc<MemoryFrontend>,
    clock: Arc<ManualClock>,
    replayer: Replayer,
    executor: ActivityExecutor,
    mocks: Rc<RefCell<mock::MockState>>,
    last: Option<Outcome>,
}

impl TestEnvironment {
    pub fn new(params: TestEnvironmentParams) -> Result<Self, TestError> {
        let plugins = PluginSet::new(params.plugins)?;
        let files = load_scripts(&params.root_directory)?;

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let frontend = Arc::new(MemoryFrontend::new(clock.clone()));
        let backend = EngineBackend::default().with_memory_frontend(FRONTEND, frontend.clone());
        let mut worker = backend
            .engine_worker(&format!("memory://{}", FRONTEND), DOMAIN, TASK_LIST)
            .map_err(|e| TestError::Engine(e.to_string()))?;
        let converter = DataConverter::new();
        Service::new(plugins, Arc::new(EngineWorkflow::new(converter.clone()))).register(&mut worker)?;

        Ok(Self {
            files,
            environ: BTreeMap::new(),
            converter,
            replayer: worker.native().replayer(),
            executor: worker.native().activity_executor(),
            frontend,
            clock,
            mocks: Rc::new(RefCell::new(mock::MockState::default())),
            last: None,
        })
    }

    /// Environment passed to subsequent runs.
    pub fn set_environ(&mut self, environ: BTreeMap<String, String>) {
        self.environ = environ;
    }

    /// Expect calls of `activity`. Once an activity has an expectation every
    /// call must match one; activities without expectations run for real.
    pub fn on_activity(&self, activity: &str) -> ActivityMock {
        ActivityMock::new(self.mocks.clone(), activity)
    }

    /// Run `function` of the script at `path` to completion.
    pub fn execute_function(&mut self, path: &str, function: &str, args: Vec<Value>, kwargs: Vec<(String, Value)>) {
        let request = RunRequest {
            files: self.files.clone(),
            path: path.to_string(),
            function: function.to_string(),
            args,
            kwargs,
            environ: self.environ.clone(),
        };
        let workflow_id = format!("test-{}", uuid::Uuid::new_v4());
        let execution = Execution {
            workflow_id: workflow_id.clone(),
            run_id: String::new(),
        };
        let outcome = match block_on(self.run(workflow_id, request)).and_then(|run| run) {
            Ok((execution, result)) => Outcome { execution, result },
            Err(err) => Outcome {
                execution,
                result: Err(err),
            },
        };
        if let Err(err) = &outcome.result {
            tracing::debug!(error = %err, "test run failed");
        }
        self.last = Some(outcome);
    }

    /// The return value of the last executed function.
    pub fn get_result<T: FromValue>(&self) -> Result<T, TestError> {
        let outcome = self.last.as_ref().ok_or(TestError::NotExecuted)?;
        let value = outcome.result.clone()?;
        T::from_value(value).map_err(|e| TestError::Decode(e.to_string()))
    }

    /// Number of calls of `activity`, mocked or not, across all runs.
    pub fn activity_calls(&self, activity: &str) -> usize {
        self.mocks.borrow().calls(activity)
    }

    /// Panic listing every unexpected call and unmet expectation.
    pub fn assert_expectations(&self) {
        let problems = self.mocks.borrow().problems();
        if !problems.is_empty() {
            panic!("activity expectations not met:\n  - {}", problems.join("\n  - "));
        }
    }

    /// Answer a query against the history of the last run.
    pub fn query(&self, name: &str, args: Vec<Value>) -> Result<Value, TestError> {
        let outcome = self.last.as_ref().ok_or(TestError::NotExecuted)?;
        let history = block_on(self.frontend.history(&outcome.execution.workflow_id))??;
        let args = args
            .iter()
            .map(|arg| self.converter.encode(name, arg))
            .collect::<Result<Vec<Payload>, _>>()
            .map_err(|e| TestError::Decode(e.to_string()))?;
        let payload = self
            .replayer
            .query(&outcome.execution, &history, name, &args)
            .map_err(|f| TestError::Workflow(from_failure(f)))?;
        self.converter
            .decode::<Value>(name, &payload)
            .map_err(|e| TestError::Decode(e.to_string()))
    }

    async fn run(&self, workflow_id: String, request: RunRequest) -> Result<(Execution, Result<Value, TestError>), TestError> {
        let input = self
            .converter
            .encode(RUN_WORKFLOW, &request)
            .map_err(|e| TestError::Engine(e.to_string()))?;
        let execution = self
            .frontend
            .start_workflow(StartWorkflowRequest {
                workflow_id: Some(workflow_id),
                workflow_type: RUN_WORKFLOW.to_string(),
                domain: DOMAIN.to_string(),
                task_list: TASK_LIST.to_string(),
                input: vec![input],
                headers: Default::default(),
                cron_schedule: None,
            })
            .await?;

        let status = self.drive(&execution).await?;
        let result = match status {
            ExecutionStatus::Completed(payload) => self
                .converter
                .decode::<Value>(RUN_WORKFLOW, &payload)
                .map_err(|e| TestError::Decode(e.to_string())),
            ExecutionStatus::Failed(failure) => Err(TestError::Workflow(from_failure(failure))),
            ExecutionStatus::Canceled => Err(TestError::Workflow(WorkflowError::Canceled)),
            ExecutionStatus::Running => Err(TestError::Blocked(execution.workflow_id.clone())),
        };
        Ok((execution, result))
    }

    /// Hand out decision and activity tasks until the execution closes,
    /// moving the clock forward whenever nothing is runnable.
    async fn drive(&self, execution: &Execution) -> Result<ExecutionStatus, TestError> {
        for _ in 0..MAX_ROUNDS {
            let record = self.frontend.describe(&execution.workflow_id).await?;
            if !record.is_open() {
                return Ok(record.status);
            }

            let mut progressed = false;
            for (domain, task_list) in self.frontend.task_queues().await {
                while let Some(task) = self.frontend.poll_decision_task(&domain, &task_list).await? {
                    let result = self.replayer.decide(&task.execution, &task.history);
                    self.frontend.respond_decision_task(task.token, result).await?;
                    progressed = true;
                }
                while let Some(task) = self.frontend.poll_activity_task(&domain, &task_list).await? {
                    let token = task.token.clone();
                    let result = self.run_activity(task).await;
                    self.frontend.respond_activity_task(&token, result).await?;
                    progressed = true;
                }
            }

            if !progressed {
                match self.frontend.next_wakeup().await {
                    Some(at) => self.clock.set(at),
                    None => return Err(TestError::Blocked(execution.workflow_id.clone())),
                }
            }
        }
        Err(TestError::Blocked(execution.workflow_id.clone()))
    }

    async fn run_activity(&self, task: ActivityTask) -> Result<Payload, Failure> {
        let canned = self
            .mocks
            .borrow_mut()
            .call(&task.activity_type, &task.input, &self.converter);
        match canned {
            Some(result) => result,
            None => self.executor.execute(task, CancellationToken::new()).await,
        }
    }
}

fn block_on<F: std::future::Future>(future: F) -> Result<F::Output, TestError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| TestError::Engine(e.to_string()))?;
    Ok(runtime.block_on(future))
}

/// Read every `*.star` file under `root`, keyed by its bundle path.
fn load_scripts(root: &Path) -> Result<BTreeMap<String, String>, TestError> {
    let io = |path: &Path, e: std::io::Error| TestError::Io(format!("{}: {}", path.display(), e));
    let mut files = BTreeMap::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir).map_err(|e| io(&dir, e))? {
            let path = entry.map_err(|e| io(&dir, e))?.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some("star") {
                continue;
            }
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            let source = fs::read_to_string(&path).map_err(|e| io(&path, e))?;
            files.insert(format!("/{}", key), source);
        }
    }
    tracing::debug!(root = %root.display(), files = files.len(), "loaded scripts");
    Ok(files)
}
