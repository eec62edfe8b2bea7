//! Engine-agnostic workflow capabilities.
//!
//! Orchestration code is written against these traits only. A [`Ctx`] is an
//! opaque handle threaded through every call; deriving options or metadata
//! never mutates a context, it returns a new one. Everything here is
//! single-threaded: workflow code of one instance runs on one thread and
//! suspends only inside the futures handed out by [`Workflow`].

mod error;
mod options;

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::LocalBoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codec::{DataConverter, Payload};

pub use error::{TimeoutType, WorkflowError, INVALID_ARGUMENT, UNIMPLEMENTED};
pub use options::{ActivityOptions, ChildWorkflowOptions, RetryPolicy};

/// Metadata propagated across workflow, activity and child boundaries.
pub type Metadata = BTreeMap<String, String>;

pub type Ctx = Rc<dyn Context>;

/// Cancels the scope created by [`Workflow::with_cancel`].
pub type CancelFunc = Rc<dyn Fn()>;

pub type QueryHandler = Rc<dyn Fn(&[Payload]) -> Result<Payload, WorkflowError>>;

/// A coroutine started with [`Workflow::go`].
pub type Coroutine = Box<dyn FnOnce(Ctx) -> LocalBoxFuture<'static, ()>>;

pub type SideEffectFn = Box<dyn FnOnce() -> Result<Payload, WorkflowError>>;

/* ===================== Context & futures ===================== */

/// An execution context. Implementations are owned by the engine adapter.
pub trait Context: fmt::Debug {
    fn as_any(&self) -> &dyn Any;

    fn is_cancelled(&self) -> bool;
}

/// A value that resolves exactly once.
pub trait Future {
    /// Wait for resolution. Only the calling coroutine is suspended; waiting
    /// in a cancelled context resolves to [`WorkflowError::Canceled`].
    fn get<'a>(&'a self, ctx: &'a Ctx) -> LocalBoxFuture<'a, Result<Payload, WorkflowError>>;

    fn is_ready(&self) -> bool;

    fn as_any(&self) -> &dyn Any;
}

/// The write half of a future created by [`Workflow::new_future`].
pub trait Settable {
    fn set_value(&self, value: Payload) -> Result<(), WorkflowError>;

    fn set_error(&self, err: WorkflowError) -> Result<(), WorkflowError>;

    /// Resolve with either outcome. Fails if already set.
    fn set(&self, result: Result<Payload, WorkflowError>) -> Result<(), WorkflowError>;

    /// Forward the resolution of `future`. Fails if already set.
    fn chain(&self, future: &dyn Future) -> Result<(), WorkflowError>;
}

/// Result future of a child workflow plus handles on the running child.
pub trait ChildWorkflowFuture: Future {
    /// Resolves to the encoded [`WorkflowExecution`] once the child started.
    fn execution(&self) -> Box<dyn Future>;

    fn signal(&self, ctx: &Ctx, name: &str, payload: Payload) -> Box<dyn Future>;

    fn as_future(&self) -> &dyn Future;
}

/// Wait for `future` and decode its value.
pub async fn get_as<T: DeserializeOwned>(
    future: &dyn Future,
    ctx: &Ctx,
    converter: &DataConverter,
    call: &str,
) -> Result<T, WorkflowError> {
    let payload = future.get(ctx).await?;
    Ok(converter.decode(call, &payload)?)
}

/* ===================== Identity ===================== */

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: String,
    pub run_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInfo {
    pub execution: WorkflowExecution,
    pub workflow_type: String,
    pub domain: String,
    pub task_list: String,
}

/* ===================== Workflow ===================== */

/// Deterministic workflow operations.
///
/// One instance serves every workflow of a worker; all per-execution state
/// lives behind the [`Ctx`].
pub trait Workflow: Send + Sync {
    fn data_converter(&self) -> &DataConverter;

    fn info(&self, ctx: &Ctx) -> WorkflowInfo;

    /// True while history is being replayed. Side-effecting logging should
    /// be skipped when this is set.
    fn is_replaying(&self, ctx: &Ctx) -> bool;

    /// A span carrying the execution's identity.
    fn span(&self, ctx: &Ctx) -> tracing::Span;

    fn execute_activity(&self, ctx: &Ctx, activity: &str, args: Vec<Payload>) -> Box<dyn Future>;

    fn execute_child_workflow(&self, ctx: &Ctx, workflow: &str, args: Vec<Payload>) -> Box<dyn ChildWorkflowFuture>;

    fn signal_external_workflow(&self, ctx: &Ctx, execution_id: &str, name: &str, payload: Payload) -> Box<dyn Future>;

    fn with_value(&self, ctx: &Ctx, key: &str, value: Rc<dyn Any>) -> Ctx;

    fn value(&self, ctx: &Ctx, key: &str) -> Option<Rc<dyn Any>>;

    fn with_headers(&self, ctx: &Ctx, headers: Metadata) -> Ctx;

    fn headers(&self, ctx: &Ctx) -> Metadata;

    fn with_cancel(&self, ctx: &Ctx) -> (Ctx, CancelFunc);

    /// A context that ignores cancellation of `ctx`; used for cleanup.
    fn new_disconnected_context(&self, ctx: &Ctx) -> (Ctx, CancelFunc);

    /// Route activities started from the returned context to `task_list`.
    fn with_task_list(&self, ctx: &Ctx, task_list: &str) -> Ctx;

    fn with_activity_options(&self, ctx: &Ctx, options: ActivityOptions) -> Ctx;

    fn activity_options(&self, ctx: &Ctx) -> ActivityOptions;

    fn with_child_options(&self, ctx: &Ctx, options: ChildWorkflowOptions) -> Ctx;

    fn child_options(&self, ctx: &Ctx) -> ChildWorkflowOptions;

    fn with_workflow_domain(&self, ctx: &Ctx, domain: &str) -> Ctx;

    fn with_workflow_task_list(&self, ctx: &Ctx, task_list: &str) -> Ctx;

    fn set_query_handler(&self, ctx: &Ctx, name: &str, handler: QueryHandler) -> Result<(), WorkflowError>;

    /// Resolves with the next signal named `name`.
    fn receive_signal(&self, ctx: &Ctx, name: &str) -> Box<dyn Future>;

    fn new_custom_error(&self, reason: &str, details: Option<String>) -> WorkflowError {
        WorkflowError::custom(reason, details)
    }

    fn new_future(&self, ctx: &Ctx) -> (Box<dyn Future>, Box<dyn Settable>);

    fn go(&self, ctx: &Ctx, coroutine: Coroutine);

    /// Run `f` once and record its result; replays return the recording.
    fn side_effect(&self, ctx: &Ctx, f: SideEffectFn) -> Result<Payload, WorkflowError>;

    /// Deterministic workflow time.
    fn now(&self, ctx: &Ctx) -> DateTime<Utc>;

    fn new_timer(&self, ctx: &Ctx, duration: Duration) -> Box<dyn Future>;

    fn sleep<'a>(&'a self, ctx: &'a Ctx, duration: Duration) -> LocalBoxFuture<'a, Result<(), WorkflowError>> {
        Box::pin(async move {
            let timer = self.new_timer(ctx, duration);
            timer.get(ctx).await.map(|_| ())
        })
    }
}
