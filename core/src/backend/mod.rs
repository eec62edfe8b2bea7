//! The engine adapter: workers, workflows and futures of the capability
//! abstraction implemented on the built-in engine.

mod error;
mod future;
mod options;
mod propagator;
mod transport;
mod workflow;

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::codec::{DataConverter, Payload};
use crate::engine::{self, ActivityInvocation, MemoryFrontend, NativeWorker, WorkerOptions};
use crate::worker::{
    ActivityContext, ActivityHandler, ActivityInfo, Backend, ConfigError, HandlerTable, Input,
    RegisterActivityOptions, RegisterWorkflowOptions, RegistrationError, Registry, Worker, WorkflowHandler,
};
use crate::workflow::{Ctx, Workflow, WorkflowExecution};

pub(crate) use error::{from_failure, to_failure};
pub use propagator::HeadersContextPropagator;
pub use workflow::EngineWorkflow;

#[derive(Debug, Clone)]
pub struct BackendOptions {
    pub identity: String,
    pub max_concurrent_activities: usize,
    pub poll_interval: Duration,
    /// Pool size for database transports.
    pub max_connections: u32,
}

impl Default for BackendOptions {
    fn default() -> Self {
        let defaults = WorkerOptions::default();
        Self {
            identity: defaults.identity,
            max_concurrent_activities: defaults.max_concurrent_activities,
            poll_interval: defaults.poll_interval,
            max_connections: 10,
        }
    }
}

/// [`Backend`] for the built-in engine.
pub struct EngineBackend {
    options: BackendOptions,
    converter: DataConverter,
    memory: HashMap<String, Arc<MemoryFrontend>>,
    workflow: Arc<EngineWorkflow>,
}

impl Default for EngineBackend {
    fn default() -> Self {
        Self::new(BackendOptions::default())
    }
}

impl EngineBackend {
    pub fn new(options: BackendOptions) -> Self {
        let converter = DataConverter::new();
        Self {
            options,
            workflow: Arc::new(EngineWorkflow::new(converter.clone())),
            converter,
            memory: HashMap::new(),
        }
    }

    /// Make `frontend` reachable as `memory://<name>`.
    pub fn with_memory_frontend(mut self, name: &str, frontend: Arc<MemoryFrontend>) -> Self {
        self.memory.insert(name.to_string(), frontend);
        self
    }

    /// Like [`Backend::register_worker`], without erasing the worker type.
    pub fn engine_worker(&self, location: &str, domain: &str, task_list: &str) -> Result<EngineWorker, ConfigError> {
        let frontend = transport::connect(location, &self.memory, self.options.max_connections)?;
        let options = WorkerOptions {
            identity: self.options.identity.clone(),
            max_concurrent_activities: self.options.max_concurrent_activities,
            poll_interval: self.options.poll_interval,
            propagators: vec![Arc::new(HeadersContextPropagator)],
        };
        tracing::debug!(location, domain, task_list, "worker registered");
        Ok(EngineWorker {
            native: NativeWorker::new(frontend, domain, task_list, options),
            converter: self.converter.clone(),
            workflows: HandlerTable::new("workflow"),
            activities: HandlerTable::new("activity"),
        })
    }
}

impl Backend for EngineBackend {
    fn register_worker(&self, location: &str, domain: &str, task_list: &str) -> Result<Box<dyn Worker>, ConfigError> {
        Ok(Box::new(self.engine_worker(location, domain, task_list)?))
    }

    fn workflow(&self) -> Arc<dyn Workflow> {
        self.workflow.clone()
    }
}

/* ===================== Worker ===================== */

pub struct EngineWorker {
    native: NativeWorker,
    converter: DataConverter,
    workflows: HandlerTable<WorkflowHandler>,
    activities: HandlerTable<ActivityHandler>,
}

impl EngineWorker {
    pub fn native(&self) -> &NativeWorker {
        &self.native
    }

    pub fn workflow_names(&self) -> Vec<String> {
        self.workflows.names()
    }

    pub fn activity_names(&self) -> Vec<String> {
        self.activities.names()
    }
}

/// Adapt a workflow handler to the engine calling convention: the engine
/// context comes first and is wrapped into an abstraction context.
fn engine_workflow(name: String, handler: WorkflowHandler, converter: DataConverter) -> engine::WorkflowFn {
    Arc::new(move |ctx: engine::Context, payloads: Vec<Payload>| {
        let ctx: Ctx = Rc::new(ctx);
        let input = Input {
            name: name.clone(),
            payloads,
            converter: converter.clone(),
        };
        let call = handler(ctx, input);
        Box::pin(async move { call.await.map_err(to_failure) })
    })
}

fn engine_activity(name: String, handler: ActivityHandler, converter: DataConverter) -> engine::ActivityFn {
    Arc::new(move |invocation: ActivityInvocation, payloads: Vec<Payload>| {
        let ctx = ActivityContext::new(
            ActivityInfo {
                activity_type: invocation.activity_type,
                activity_id: invocation.activity_id,
                workflow_execution: WorkflowExecution {
                    id: invocation.execution.workflow_id,
                    run_id: invocation.execution.run_id,
                },
                domain: invocation.domain,
                task_list: invocation.task_list,
                attempt: invocation.attempt,
            },
            propagator::metadata_from_headers(&invocation.headers),
            invocation.cancel,
        );
        let input = Input {
            name: name.clone(),
            payloads,
            converter: converter.clone(),
        };
        let call = handler(ctx, input);
        Box::pin(async move { call.await.map_err(to_failure) })
    })
}

impl Registry for EngineWorker {
    fn register_workflow_handler(
        &mut self,
        name: String,
        handler: WorkflowHandler,
        options: &RegisterWorkflowOptions,
    ) -> Result<(), RegistrationError> {
        self.workflows
            .insert(name.clone(), handler.clone(), options.disable_already_registered_check)?;
        let wrapped = engine_workflow(name.clone(), handler, self.converter.clone());
        self.native.register_workflow(&name, wrapped);
        Ok(())
    }

    fn register_activity_handler(
        &mut self,
        name: String,
        handler: ActivityHandler,
        options: &RegisterActivityOptions,
    ) -> Result<(), RegistrationError> {
        self.activities
            .insert(name.clone(), handler.clone(), options.disable_already_registered_check)?;
        let wrapped = engine_activity(name.clone(), handler, self.converter.clone());
        self.native.register_activity(&name, wrapped);
        Ok(())
    }
}

#[async_trait]
impl Worker for EngineWorker {
    async fn start(&mut self) -> anyhow::Result<()> {
        self.native.start();
        Ok(())
    }

    async fn run(&mut self, stop: CancellationToken) -> anyhow::Result<()> {
        self.start().await?;
        stop.cancelled().await;
        self.stop().await;
        Ok(())
    }

    async fn stop(&mut self) {
        self.native.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DecisionResult, Frontend, StartWorkflowRequest};
    use crate::worker::RegistryExt;
    use crate::workflow::{get_as, WorkflowError};

    async fn double(_ctx: ActivityContext, n: i64) -> Result<i64, WorkflowError> {
        Ok(n * 2)
    }

    async fn twice(ctx: Ctx, n: i64) -> Result<i64, WorkflowError> {
        let workflow = EngineWorkflow::default();
        let converter = DataConverter::new();
        let ctx = workflow.with_headers(&ctx, maplit::btreemap! { "tenant".into() => "acme".into() });
        let args = vec![converter.encode("double", &n)?];
        let future = workflow.execute_activity(&ctx, "double", args);
        get_as(future.as_ref(), &ctx, &converter, "double").await
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let backend = EngineBackend::default().with_memory_frontend("t", Arc::new(MemoryFrontend::default()));
        let mut worker = backend.engine_worker("memory://t", "default", "tl").unwrap();
        worker
            .register_activity_with_options(double, RegisterActivityOptions::named("double"))
            .unwrap();
        let err = worker
            .register_activity_with_options(double, RegisterActivityOptions::named("double"))
            .unwrap_err();
        assert!(matches!(err, RegistrationError::AlreadyRegistered { kind: "activity", .. }));

        worker
            .register_activity_with_options(
                double,
                RegisterActivityOptions {
                    name: Some("double".into()),
                    disable_already_registered_check: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(worker.activity_names(), vec!["double".to_string()]);
    }

    #[tokio::test]
    async fn test_workflow_schedules_activity_with_headers() {
        let frontend = Arc::new(MemoryFrontend::default());
        let backend = EngineBackend::default().with_memory_frontend("t", frontend.clone());
        let mut worker = backend.engine_worker("memory://t", "default", "tl").unwrap();
        worker
            .register_workflow_with_options(twice, RegisterWorkflowOptions::named("twice"))
            .unwrap();

        let converter = DataConverter::new();
        frontend
            .start_workflow(StartWorkflowRequest {
                workflow_id: Some("wf".into()),
                workflow_type: "twice".into(),
                domain: "default".into(),
                task_list: "tl".into(),
                input: vec![converter.encode("twice", &21).unwrap()],
                headers: Default::default(),
                cron_schedule: None,
            })
            .await
            .unwrap();

        let task = frontend.poll_decision_task("default", "tl").await.unwrap().unwrap();
        let result = worker.native().replayer().decide(&task.execution, &task.history);
        let DecisionResult::Completed(commands) = result else {
            panic!("decision failed: {:?}", result);
        };
        match &commands[..] {
            [engine::Command::ScheduleActivity { activity_type, headers, .. }] => {
                assert_eq!(activity_type, "double");
                assert_eq!(headers.get("tenant").map(|v| v.as_slice()), Some(&b"acme"[..]));
            }
            other => panic!("unexpected commands {:?}", other),
        }
    }
}
