//! A small deterministic workflow engine.
//!
//! Workflow code runs as coroutines that are replayed from the execution's
//! event history on every decision task; commands issued during replay are
//! matched against the recorded ones by sequence number. Frontends store
//! histories and hand out tasks, workers poll them.

mod context;
mod frontend;
mod history;
mod instance;
mod propagator;
mod replay;
mod state;
mod worker;

use std::sync::Arc;

use futures::future::{BoxFuture, LocalBoxFuture};

use crate::codec::Payload;

pub use context::{CancelHandle, ChildFuture, Context, Settable, WorkflowFuture};
pub use frontend::{Clock, Frontend, FrontendError, ManualClock, MemoryFrontend, PostgresFrontend, SystemClock};
pub use history::{
    ActivityOptions, ChildOptions, Command, DecisionResult, Event, Execution, Failure, Headers, HistoryEntry,
    ParentRef, RetryPolicy, TimeoutKind, WorkflowInfo,
};
pub use instance::QueryFn;
pub use propagator::ContextPropagator;
pub use replay::Replayer;
pub use state::{
    ActivityTask, DecisionState, DecisionTask, DecisionToken, ExecutionRecord, ExecutionStatus, StartWorkflowRequest,
    TimerTask,
};
pub use worker::{ActivityExecutor, ActivityInvocation, NativeWorker, WorkerOptions};

/// A workflow function as the engine calls it.
pub type WorkflowFn = Arc<dyn Fn(Context, Vec<Payload>) -> LocalBoxFuture<'static, Result<Payload, Failure>> + Send + Sync>;

/// An activity function as the engine calls it.
pub type ActivityFn = Arc<dyn Fn(ActivityInvocation, Vec<Payload>) -> BoxFuture<'static, Result<Payload, Failure>> + Send + Sync>;
