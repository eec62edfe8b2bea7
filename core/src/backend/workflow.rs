//! [`Workflow`] on top of the engine context.

use std::any::Any;
use std::rc::Rc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::error::{from_failure, to_failure};
use super::future::{engine_ctx, EngineChildFuture, EngineFuture, EngineSettable};
use super::options;
use super::propagator::{metadata, METADATA_KEY};
use crate::codec::{DataConverter, Payload};
use crate::engine;
use crate::workflow::{
    self, ActivityOptions, CancelFunc, ChildWorkflowFuture, ChildWorkflowOptions, Coroutine, Ctx, Future, Metadata,
    QueryHandler, SideEffectFn, WorkflowError, WorkflowExecution, WorkflowInfo,
};

impl workflow::Context for engine::Context {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn is_cancelled(&self) -> bool {
        engine::Context::is_cancelled(self)
    }
}

fn wrap(ctx: engine::Context) -> Ctx {
    Rc::new(ctx)
}

#[derive(Debug, Default, Clone)]
pub struct EngineWorkflow {
    converter: DataConverter,
}

impl EngineWorkflow {
    pub fn new(converter: DataConverter) -> Self {
        Self { converter }
    }
}

impl workflow::Workflow for EngineWorkflow {
    fn data_converter(&self) -> &DataConverter {
        &self.converter
    }

    fn info(&self, ctx: &Ctx) -> WorkflowInfo {
        let info = engine_ctx(ctx).info();
        WorkflowInfo {
            execution: WorkflowExecution {
                id: info.execution.workflow_id.clone(),
                run_id: info.execution.run_id.clone(),
            },
            workflow_type: info.workflow_type.clone(),
            domain: info.domain.clone(),
            task_list: info.task_list.clone(),
        }
    }

    fn is_replaying(&self, ctx: &Ctx) -> bool {
        engine_ctx(ctx).is_replaying()
    }

    fn span(&self, ctx: &Ctx) -> tracing::Span {
        let info = engine_ctx(ctx).info();
        tracing::info_span!(
            "workflow",
            workflow_id = %info.execution.workflow_id,
            run_id = %info.execution.run_id,
            workflow_type = %info.workflow_type,
        )
    }

    fn execute_activity(&self, ctx: &Ctx, activity: &str, args: Vec<Payload>) -> Box<dyn Future> {
        Box::new(EngineFuture(engine_ctx(ctx).execute_activity(activity, args)))
    }

    fn execute_child_workflow(&self, ctx: &Ctx, workflow: &str, args: Vec<Payload>) -> Box<dyn ChildWorkflowFuture> {
        Box::new(EngineChildFuture::new(engine_ctx(ctx).execute_child_workflow(workflow, args)))
    }

    fn signal_external_workflow(&self, ctx: &Ctx, execution_id: &str, name: &str, payload: Payload) -> Box<dyn Future> {
        Box::new(EngineFuture(engine_ctx(ctx).signal_external_workflow(execution_id, name, payload)))
    }

    fn with_value(&self, ctx: &Ctx, key: &str, value: Rc<dyn Any>) -> Ctx {
        wrap(engine_ctx(ctx).with_value(key, value))
    }

    fn value(&self, ctx: &Ctx, key: &str) -> Option<Rc<dyn Any>> {
        engine_ctx(ctx).value(key)
    }

    fn with_headers(&self, ctx: &Ctx, headers: Metadata) -> Ctx {
        wrap(engine_ctx(ctx).with_value(METADATA_KEY, Rc::new(headers)))
    }

    fn headers(&self, ctx: &Ctx) -> Metadata {
        metadata(engine_ctx(ctx)).unwrap_or_default()
    }

    fn with_cancel(&self, ctx: &Ctx) -> (Ctx, CancelFunc) {
        let (derived, cancel) = engine_ctx(ctx).with_cancel();
        (wrap(derived), cancel)
    }

    fn new_disconnected_context(&self, ctx: &Ctx) -> (Ctx, CancelFunc) {
        let (derived, cancel) = engine_ctx(ctx).disconnected();
        (wrap(derived), cancel)
    }

    fn with_task_list(&self, ctx: &Ctx, task_list: &str) -> Ctx {
        let ctx = engine_ctx(ctx);
        let mut options = ctx.activity_options().clone();
        options.task_list = Some(task_list.to_string());
        wrap(ctx.with_activity_options(options))
    }

    fn with_activity_options(&self, ctx: &Ctx, options: ActivityOptions) -> Ctx {
        wrap(engine_ctx(ctx).with_activity_options(options::activity_options(&options)))
    }

    fn activity_options(&self, ctx: &Ctx) -> ActivityOptions {
        options::activity_options_from(engine_ctx(ctx).activity_options())
    }

    fn with_child_options(&self, ctx: &Ctx, options: ChildWorkflowOptions) -> Ctx {
        wrap(engine_ctx(ctx).with_child_options(options::child_options(&options)))
    }

    fn child_options(&self, ctx: &Ctx) -> ChildWorkflowOptions {
        options::child_options_from(engine_ctx(ctx).child_options())
    }

    fn with_workflow_domain(&self, ctx: &Ctx, domain: &str) -> Ctx {
        let ctx = engine_ctx(ctx);
        let mut options = ctx.child_options().clone();
        options.domain = Some(domain.to_string());
        wrap(ctx.with_child_options(options))
    }

    fn with_workflow_task_list(&self, ctx: &Ctx, task_list: &str) -> Ctx {
        let ctx = engine_ctx(ctx);
        let mut options = ctx.child_options().clone();
        options.task_list = Some(task_list.to_string());
        wrap(ctx.with_child_options(options))
    }

    fn set_query_handler(&self, ctx: &Ctx, name: &str, handler: QueryHandler) -> Result<(), WorkflowError> {
        let query: engine::QueryFn = Rc::new(move |args: &[Payload]| handler(args).map_err(to_failure));
        engine_ctx(ctx).set_query_handler(name, query);
        Ok(())
    }

    fn receive_signal(&self, ctx: &Ctx, name: &str) -> Box<dyn Future> {
        Box::new(EngineFuture(engine_ctx(ctx).receive_signal(name)))
    }

    fn new_future(&self, ctx: &Ctx) -> (Box<dyn Future>, Box<dyn workflow::Settable>) {
        let ctx = engine_ctx(ctx);
        let (future, settable) = ctx.new_future();
        (
            Box::new(EngineFuture(future)),
            Box::new(EngineSettable {
                settable,
                ctx: ctx.clone(),
            }),
        )
    }

    fn go(&self, ctx: &Ctx, coroutine: Coroutine) {
        engine_ctx(ctx).go(move |ctx| coroutine(wrap(ctx)));
    }

    fn side_effect(&self, ctx: &Ctx, f: SideEffectFn) -> Result<Payload, WorkflowError> {
        engine_ctx(ctx)
            .side_effect(move || f().map_err(to_failure))
            .map_err(from_failure)
    }

    fn now(&self, ctx: &Ctx) -> DateTime<Utc> {
        engine_ctx(ctx).now()
    }

    fn new_timer(&self, ctx: &Ctx, duration: Duration) -> Box<dyn Future> {
        Box::new(EngineFuture(engine_ctx(ctx).new_timer(duration)))
    }
}
