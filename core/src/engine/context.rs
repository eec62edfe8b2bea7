//! The engine's workflow context and the futures it hands out.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::task::Poll;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::LocalBoxFuture;

use super::history::{ActivityOptions, ChildOptions, Command, Event, Headers, WorkflowInfo};
use super::instance::{CancelScope, Instance, QueryFn, Slot};
use super::Failure;
use crate::codec::Payload;

pub type CancelHandle = Rc<dyn Fn()>;

/// Handle on a running workflow instance. Cheap to clone; derivations
/// return a new context.
#[derive(Clone)]
pub struct Context {
    instance: Rc<Instance>,
    scope: Rc<CancelScope>,
    activity_options: Rc<ActivityOptions>,
    child_options: Rc<ChildOptions>,
    values: Rc<BTreeMap<String, Rc<dyn Any>>>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("workflow_id", &self.instance.info.execution.workflow_id)
            .field("cancelled", &self.scope.is_cancelled())
            .field("values", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Context {
    pub(crate) fn root(instance: Rc<Instance>) -> Self {
        Self {
            scope: instance.root_scope.clone(),
            instance,
            activity_options: Rc::new(ActivityOptions::default()),
            child_options: Rc::new(ChildOptions::default()),
            values: Rc::new(BTreeMap::new()),
        }
    }

    pub fn info(&self) -> &WorkflowInfo {
        &self.instance.info
    }

    pub fn is_replaying(&self) -> bool {
        self.instance.is_replaying()
    }

    /// Time of the current decision task.
    pub fn now(&self) -> DateTime<Utc> {
        self.instance.now()
    }

    pub fn is_cancelled(&self) -> bool {
        self.scope.is_cancelled()
    }

    /* ===================== Derivation ===================== */

    pub fn with_value(&self, key: &str, value: Rc<dyn Any>) -> Context {
        let mut values = (*self.values).clone();
        values.insert(key.to_string(), value);
        Context {
            values: Rc::new(values),
            ..self.clone()
        }
    }

    pub fn value(&self, key: &str) -> Option<Rc<dyn Any>> {
        self.values.get(key).cloned()
    }

    pub fn with_cancel(&self) -> (Context, CancelHandle) {
        self.scoped(CancelScope::child(&self.scope))
    }

    /// A context whose scope is not a child of this one.
    pub fn disconnected(&self) -> (Context, CancelHandle) {
        self.scoped(Rc::new(CancelScope::default()))
    }

    fn scoped(&self, scope: Rc<CancelScope>) -> (Context, CancelHandle) {
        let ctx = Context {
            scope: scope.clone(),
            ..self.clone()
        };
        let instance = Rc::downgrade(&self.instance);
        let cancel: CancelHandle = Rc::new(move || {
            scope.cancel();
            if let Some(instance) = instance.upgrade() {
                instance.mark_dirty();
            }
        });
        (ctx, cancel)
    }

    pub fn with_activity_options(&self, options: ActivityOptions) -> Context {
        Context {
            activity_options: Rc::new(options),
            ..self.clone()
        }
    }

    pub fn activity_options(&self) -> &ActivityOptions {
        &self.activity_options
    }

    pub fn with_child_options(&self, options: ChildOptions) -> Context {
        Context {
            child_options: Rc::new(options),
            ..self.clone()
        }
    }

    pub fn child_options(&self) -> &ChildOptions {
        &self.child_options
    }

    /* ===================== Commands ===================== */

    fn headers(&self) -> Headers {
        let mut headers = Headers::new();
        for propagator in &self.instance.propagators {
            propagator.inject(self, &mut headers);
        }
        headers
    }

    fn pending(&self, seq: u64) -> WorkflowFuture {
        WorkflowFuture {
            slot: self.instance.pending_slot(seq),
        }
    }

    pub fn execute_activity(&self, activity_type: &str, input: Vec<Payload>) -> WorkflowFuture {
        let seq = self.instance.next_seq();
        let options = (*self.activity_options).clone();
        let task_list = options
            .task_list
            .clone()
            .unwrap_or_else(|| self.instance.info.task_list.clone());
        let activity_id = options.activity_id.clone().unwrap_or_else(|| seq.to_string());
        self.instance.issue(
            seq,
            Command::ScheduleActivity {
                seq,
                activity_type: activity_type.to_string(),
                activity_id,
                task_list,
                input,
                options,
                headers: self.headers(),
            },
        );
        self.pending(seq)
    }

    pub fn execute_child_workflow(&self, workflow_type: &str, input: Vec<Payload>) -> ChildFuture {
        let seq = self.instance.next_seq();
        let options = (*self.child_options).clone();
        let workflow_id = options
            .workflow_id
            .clone()
            .unwrap_or_else(|| format!("{}-child-{}", self.instance.info.execution.workflow_id, seq));
        self.instance.issue(
            seq,
            Command::StartChildWorkflow {
                seq,
                workflow_type: workflow_type.to_string(),
                workflow_id: workflow_id.clone(),
                input,
                options,
                headers: self.headers(),
            },
        );
        ChildFuture {
            result: self.pending(seq),
            started: WorkflowFuture {
                slot: self.instance.child_started_slot(seq),
            },
            workflow_id,
        }
    }

    pub fn signal_external_workflow(&self, workflow_id: &str, name: &str, input: Payload) -> WorkflowFuture {
        let seq = self.instance.next_seq();
        self.instance.issue(
            seq,
            Command::SignalExternalWorkflow {
                seq,
                workflow_id: workflow_id.to_string(),
                name: name.to_string(),
                input,
            },
        );
        self.pending(seq)
    }

    pub fn new_timer(&self, duration: Duration) -> WorkflowFuture {
        let seq = self.instance.next_seq();
        self.instance.issue(seq, Command::StartTimer { seq, duration });
        self.pending(seq)
    }

    /// Run `f` on first execution and record its result; replays return the
    /// recorded result without calling `f`.
    pub fn side_effect(&self, f: impl FnOnce() -> Result<Payload, Failure>) -> Result<Payload, Failure> {
        let seq = self.instance.next_seq();
        if let Some(event) = self.instance.recorded(seq) {
            if let Event::MarkerRecorded { result, .. } = event {
                return result.clone();
            }
            let message = format!("side effect {} does not match history {:?}", seq, event);
            self.instance.nondeterministic(message.clone());
            return Err(Failure::Nondeterministic(message));
        }
        if self.instance.is_replaying() {
            let message = format!("side effect {} is not in history", seq);
            self.instance.nondeterministic(message.clone());
            return Err(Failure::Nondeterministic(message));
        }
        let result = f();
        self.instance.issue(
            seq,
            Command::RecordMarker {
                seq,
                name: "side_effect".to_string(),
                result: result.clone(),
            },
        );
        result
    }

    pub fn receive_signal(&self, name: &str) -> WorkflowFuture {
        WorkflowFuture {
            slot: self.instance.receive_signal(name),
        }
    }

    pub fn set_query_handler(&self, name: &str, handler: QueryFn) {
        self.instance.set_query_handler(name, handler);
    }

    pub fn new_future(&self) -> (WorkflowFuture, Settable) {
        let slot = Rc::new(Slot::default());
        (
            WorkflowFuture { slot: slot.clone() },
            Settable {
                slot,
                instance: Rc::downgrade(&self.instance),
            },
        )
    }

    /// Start a coroutine on this instance.
    pub fn go(&self, coroutine: impl FnOnce(Context) -> LocalBoxFuture<'static, ()>) {
        self.instance.spawn(coroutine(self.clone()));
    }
}

/* ===================== Futures ===================== */

#[derive(Clone)]
pub struct WorkflowFuture {
    slot: Rc<Slot>,
}

impl WorkflowFuture {
    pub(crate) fn ready(value: Result<Payload, Failure>) -> Self {
        Self {
            slot: Slot::resolved(value),
        }
    }

    /// Wait for resolution; cancellation of `ctx` resolves the wait with
    /// [`Failure::Canceled`].
    pub async fn get(&self, ctx: &Context) -> Result<Payload, Failure> {
        futures::future::poll_fn(|_| {
            if let Some(value) = self.slot.peek() {
                return Poll::Ready(value);
            }
            if ctx.is_cancelled() {
                return Poll::Ready(Err(Failure::Canceled));
            }
            Poll::Pending
        })
        .await
    }

    pub fn is_ready(&self) -> bool {
        self.slot.is_set()
    }
}

/// Write half of [`Context::new_future`].
#[derive(Clone)]
pub struct Settable {
    slot: Rc<Slot>,
    instance: std::rc::Weak<Instance>,
}

impl Settable {
    pub fn set(&self, value: Result<Payload, Failure>) -> Result<(), Failure> {
        if !self.slot.set(value) {
            return Err(Failure::Generic("future is already set".to_string()));
        }
        if let Some(instance) = self.instance.upgrade() {
            instance.mark_dirty();
        }
        Ok(())
    }

    pub fn is_set(&self) -> bool {
        self.slot.is_set()
    }

    /// Resolve with whatever `future` resolves to.
    pub fn chain(&self, ctx: &Context, future: WorkflowFuture) -> Result<(), Failure> {
        if self.slot.is_set() {
            return Err(Failure::Generic("future is already set".to_string()));
        }
        let this = self.clone();
        // Chained resolution ignores cancellation of the caller's scope.
        let (detached, _) = ctx.disconnected();
        ctx.go(move |_| {
            Box::pin(async move {
                let value = future.get(&detached).await;
                let _ = this.set(value);
            })
        });
        Ok(())
    }
}

pub struct ChildFuture {
    result: WorkflowFuture,
    started: WorkflowFuture,
    workflow_id: String,
}

impl ChildFuture {
    pub fn result(&self) -> &WorkflowFuture {
        &self.result
    }

    /// Resolves to the JSON-encoded [`Execution`](super::Execution) of the
    /// child once it started.
    pub fn started(&self) -> &WorkflowFuture {
        &self.started
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn signal(&self, ctx: &Context, name: &str, input: Payload) -> WorkflowFuture {
        ctx.signal_external_workflow(&self.workflow_id, name, input)
    }
}
