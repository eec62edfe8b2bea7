//! Abstraction futures backed by engine futures.
//!
//! The downcasts in this module are the only place where abstraction types
//! are unwrapped back into engine types.

use std::any::Any;

use futures::future::LocalBoxFuture;

use super::error::{from_failure, to_failure};
use crate::codec::Payload;
use crate::engine;
use crate::workflow::{ChildWorkflowFuture, Ctx, Future, Settable, WorkflowError};

/// The engine context behind an abstraction context.
pub(crate) fn engine_ctx(ctx: &Ctx) -> &engine::Context {
    ctx.as_any()
        .downcast_ref::<engine::Context>()
        .expect("workflow context must be created by the engine backend")
}

pub(crate) struct EngineFuture(pub(crate) engine::WorkflowFuture);

impl Future for EngineFuture {
    fn get<'a>(&'a self, ctx: &'a Ctx) -> LocalBoxFuture<'a, Result<Payload, WorkflowError>> {
        Box::pin(async move { self.0.get(engine_ctx(ctx)).await.map_err(from_failure) })
    }

    fn is_ready(&self) -> bool {
        self.0.is_ready()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) struct EngineChildFuture {
    child: engine::ChildFuture,
    result: EngineFuture,
}

impl EngineChildFuture {
    pub(crate) fn new(child: engine::ChildFuture) -> Self {
        let result = EngineFuture(child.result().clone());
        Self { child, result }
    }
}

impl Future for EngineChildFuture {
    fn get<'a>(&'a self, ctx: &'a Ctx) -> LocalBoxFuture<'a, Result<Payload, WorkflowError>> {
        self.result.get(ctx)
    }

    fn is_ready(&self) -> bool {
        self.result.is_ready()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl ChildWorkflowFuture for EngineChildFuture {
    fn execution(&self) -> Box<dyn Future> {
        Box::new(EngineFuture(self.child.started().clone()))
    }

    fn signal(&self, ctx: &Ctx, name: &str, payload: Payload) -> Box<dyn Future> {
        Box::new(EngineFuture(self.child.signal(engine_ctx(ctx), name, payload)))
    }

    fn as_future(&self) -> &dyn Future {
        &self.result
    }
}

pub(crate) struct EngineSettable {
    pub(crate) settable: engine::Settable,
    pub(crate) ctx: engine::Context,
}

impl Settable for EngineSettable {
    fn set_value(&self, value: Payload) -> Result<(), WorkflowError> {
        self.set(Ok(value))
    }

    fn set_error(&self, err: WorkflowError) -> Result<(), WorkflowError> {
        self.set(Err(err))
    }

    fn set(&self, result: Result<Payload, WorkflowError>) -> Result<(), WorkflowError> {
        self.settable.set(result.map_err(to_failure)).map_err(from_failure)
    }

    fn chain(&self, future: &dyn Future) -> Result<(), WorkflowError> {
        let any = future.as_any();
        let inner = if let Some(f) = any.downcast_ref::<EngineFuture>() {
            f.0.clone()
        } else if let Some(f) = any.downcast_ref::<EngineChildFuture>() {
            f.result.0.clone()
        } else {
            return Err(WorkflowError::Generic(
                "cannot chain a future created outside the engine backend".to_string(),
            ));
        };
        self.settable.chain(&self.ctx, inner).map_err(from_failure)
    }
}
