//! Per-execution state rebuilt on every decision task.
//!
//! An [`Instance`] owns the coroutines of one workflow execution and the
//! slots their futures wait on. Coroutines are polled with a no-op waker:
//! after every round the instance checks whether anything changed (a slot
//! resolved, a scope was cancelled, a coroutine was spawned) and polls again
//! until nothing does.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::Arc;
use std::task::Poll;

use chrono::{DateTime, Utc};
use futures::future::LocalBoxFuture;

use super::history::{Command, Event, HistoryEntry, WorkflowInfo};
use super::propagator::ContextPropagator;
use super::Failure;
use crate::codec::Payload;

/// Upper bound on polling rounds within one decision.
const MAX_ROUNDS: usize = 10_000;

pub type QueryFn = Rc<dyn Fn(&[Payload]) -> Result<Payload, Failure>>;

/* ===================== Slots & scopes ===================== */

/// A write-once result cell shared between a future and its resolver.
#[derive(Default)]
pub(crate) struct Slot {
    value: RefCell<Option<Result<Payload, Failure>>>,
}

impl Slot {
    pub(crate) fn resolved(value: Result<Payload, Failure>) -> Rc<Self> {
        Rc::new(Self {
            value: RefCell::new(Some(value)),
        })
    }

    pub(crate) fn peek(&self) -> Option<Result<Payload, Failure>> {
        self.value.borrow().clone()
    }

    pub(crate) fn is_set(&self) -> bool {
        self.value.borrow().is_some()
    }

    /// Returns false if the slot was already set.
    pub(crate) fn set(&self, value: Result<Payload, Failure>) -> bool {
        let mut slot = self.value.borrow_mut();
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        true
    }
}

#[derive(Default)]
pub(crate) struct CancelScope {
    cancelled: Cell<bool>,
    parent: Option<Rc<CancelScope>>,
}

impl CancelScope {
    pub(crate) fn child(parent: &Rc<CancelScope>) -> Rc<Self> {
        Rc::new(Self {
            cancelled: Cell::new(false),
            parent: Some(parent.clone()),
        })
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.set(true);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.get() || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }
}

/* ===================== Instance ===================== */

pub(crate) struct Instance {
    pub(crate) info: WorkflowInfo,
    pub(crate) propagators: Vec<Arc<dyn ContextPropagator>>,
    pub(crate) root_scope: Rc<CancelScope>,
    replaying: Cell<bool>,
    now: Cell<DateTime<Utc>>,
    seq: Cell<u64>,
    dirty: Cell<bool>,
    /// Recorded command events keyed by sequence number.
    recorded: HashMap<u64, Event>,
    commands: RefCell<Vec<Command>>,
    nondeterminism: RefCell<Option<String>>,
    slots: RefCell<HashMap<u64, Rc<Slot>>>,
    child_started: RefCell<HashMap<u64, Rc<Slot>>>,
    signals: RefCell<HashMap<String, VecDeque<Payload>>>,
    signal_waiters: RefCell<HashMap<String, VecDeque<Rc<Slot>>>>,
    queries: RefCell<HashMap<String, QueryFn>>,
    coroutines: RefCell<Vec<LocalBoxFuture<'static, ()>>>,
    spawned: RefCell<Vec<LocalBoxFuture<'static, ()>>>,
    result: RefCell<Option<Result<Payload, Failure>>>,
}

impl Instance {
    pub(crate) fn new(
        info: WorkflowInfo,
        history: &[HistoryEntry],
        started_at: DateTime<Utc>,
        propagators: Vec<Arc<dyn ContextPropagator>>,
    ) -> Rc<Self> {
        let recorded = history
            .iter()
            .filter_map(|e| e.event.command_seq().map(|seq| (seq, e.event.clone())))
            .collect();
        Rc::new(Self {
            info,
            propagators,
            root_scope: Rc::new(CancelScope::default()),
            replaying: Cell::new(true),
            now: Cell::new(started_at),
            seq: Cell::new(0),
            dirty: Cell::new(false),
            recorded,
            commands: RefCell::new(Vec::new()),
            nondeterminism: RefCell::new(None),
            slots: RefCell::new(HashMap::new()),
            child_started: RefCell::new(HashMap::new()),
            signals: RefCell::new(HashMap::new()),
            signal_waiters: RefCell::new(HashMap::new()),
            queries: RefCell::new(HashMap::new()),
            coroutines: RefCell::new(Vec::new()),
            spawned: RefCell::new(Vec::new()),
            result: RefCell::new(None),
        })
    }

    pub(crate) fn is_replaying(&self) -> bool {
        self.replaying.get()
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }

    pub(crate) fn begin_decision(&self, replaying: bool, now: DateTime<Utc>) {
        self.replaying.set(replaying);
        self.now.set(now);
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.set(true);
    }

    pub(crate) fn next_seq(&self) -> u64 {
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        seq
    }

    pub(crate) fn nondeterministic(&self, message: String) {
        let mut slot = self.nondeterminism.borrow_mut();
        if slot.is_none() {
            tracing::warn!(workflow_id = %self.info.execution.workflow_id, %message, "non-determinism detected");
            *slot = Some(message);
        }
    }

    pub(crate) fn nondeterminism(&self) -> Option<String> {
        self.nondeterminism.borrow().clone()
    }

    pub(crate) fn recorded(&self, seq: u64) -> Option<&Event> {
        self.recorded.get(&seq)
    }

    /// Issue a command. Returns the recorded event when the command is
    /// replayed from history.
    pub(crate) fn issue(&self, seq: u64, command: Command) -> Option<&Event> {
        match self.recorded.get(&seq) {
            Some(event) => {
                if !command.matches(event) {
                    self.nondeterministic(format!(
                        "command {} issued {}, history recorded {:?}",
                        seq,
                        command.describe(),
                        event
                    ));
                }
                Some(event)
            }
            None => {
                if self.replaying.get() {
                    self.nondeterministic(format!("command {} ({}) is not in history", seq, command.describe()));
                } else {
                    self.commands.borrow_mut().push(command);
                }
                None
            }
        }
    }

    /// Report recorded commands the workflow never reissued.
    pub(crate) fn check_unissued(&self) {
        let issued = self.seq.get();
        if let Some(seq) = self.recorded.keys().filter(|seq| **seq >= issued).min() {
            self.nondeterministic(format!("history has command {} that the workflow did not issue", seq));
        }
    }

    pub(crate) fn take_commands(&self) -> Vec<Command> {
        std::mem::take(&mut *self.commands.borrow_mut())
    }

    /* ----- slots ----- */

    pub(crate) fn pending_slot(&self, seq: u64) -> Rc<Slot> {
        let slot = Rc::new(Slot::default());
        self.slots.borrow_mut().insert(seq, slot.clone());
        slot
    }

    pub(crate) fn child_started_slot(&self, seq: u64) -> Rc<Slot> {
        let slot = Rc::new(Slot::default());
        self.child_started.borrow_mut().insert(seq, slot.clone());
        slot
    }

    fn resolve(&self, seq: u64, value: Result<Payload, Failure>) {
        if let Some(slot) = self.slots.borrow_mut().remove(&seq) {
            slot.set(value);
            self.mark_dirty();
        }
    }

    fn resolve_child_started(&self, seq: u64, value: Result<Payload, Failure>) {
        if let Some(slot) = self.child_started.borrow_mut().remove(&seq) {
            slot.set(value);
            self.mark_dirty();
        }
    }

    /* ----- signals & queries ----- */

    pub(crate) fn receive_signal(&self, name: &str) -> Rc<Slot> {
        if let Some(input) = self.signals.borrow_mut().get_mut(name).and_then(|q| q.pop_front()) {
            return Slot::resolved(Ok(input));
        }
        let slot = Rc::new(Slot::default());
        self.signal_waiters
            .borrow_mut()
            .entry(name.to_string())
            .or_default()
            .push_back(slot.clone());
        slot
    }

    fn deliver_signal(&self, name: &str, input: Payload) {
        let waiter = self.signal_waiters.borrow_mut().get_mut(name).and_then(|q| q.pop_front());
        match waiter {
            Some(slot) => {
                slot.set(Ok(input));
                self.mark_dirty();
            }
            None => self
                .signals
                .borrow_mut()
                .entry(name.to_string())
                .or_default()
                .push_back(input),
        }
    }

    pub(crate) fn set_query_handler(&self, name: &str, handler: QueryFn) {
        self.queries.borrow_mut().insert(name.to_string(), handler);
    }

    pub(crate) fn query_handler(&self, name: &str) -> Option<QueryFn> {
        self.queries.borrow().get(name).cloned()
    }

    /* ----- coroutines ----- */

    pub(crate) fn spawn(&self, coroutine: LocalBoxFuture<'static, ()>) {
        self.spawned.borrow_mut().push(coroutine);
        self.mark_dirty();
    }

    pub(crate) fn set_result(&self, result: Result<Payload, Failure>) {
        let mut slot = self.result.borrow_mut();
        if slot.is_none() {
            *slot = Some(result);
        }
    }

    pub(crate) fn result(&self) -> Option<Result<Payload, Failure>> {
        self.result.borrow().clone()
    }

    /// Poll coroutines until none of them can make progress.
    pub(crate) fn run_until_blocked(&self) {
        let waker = futures::task::noop_waker();
        let mut cx = std::task::Context::from_waker(&waker);
        for _ in 0..MAX_ROUNDS {
            self.dirty.set(false);
            let mut current = std::mem::take(&mut *self.coroutines.borrow_mut());
            current.append(&mut *self.spawned.borrow_mut());
            current.retain_mut(|co| matches!(co.as_mut().poll(&mut cx), Poll::Pending));
            *self.coroutines.borrow_mut() = current;
            if self.nondeterminism.borrow().is_some() {
                return;
            }
            if !self.dirty.get() && self.spawned.borrow().is_empty() {
                return;
            }
        }
        self.nondeterministic(format!("coroutines did not settle after {} rounds", MAX_ROUNDS));
    }

    /// Apply a non-command event to waiting futures.
    pub(crate) fn apply(&self, event: &Event) {
        match event {
            Event::ActivityTaskCompleted { seq, result }
            | Event::ChildWorkflowExecutionCompleted { seq, result } => self.resolve(*seq, Ok(result.clone())),
            Event::ActivityTaskFailed { seq, failure }
            | Event::ChildWorkflowExecutionFailed { seq, failure }
            | Event::SignalExternalWorkflowExecutionFailed { seq, failure } => {
                self.resolve(*seq, Err(failure.clone()))
            }
            Event::TimerFired { seq } | Event::ExternalWorkflowExecutionSignaled { seq } => {
                self.resolve(*seq, Ok(Payload::unit()))
            }
            Event::ChildWorkflowExecutionCanceled { seq } => self.resolve(*seq, Err(Failure::Canceled)),
            Event::ChildWorkflowExecutionStarted { seq, execution } => {
                let payload = serde_json::to_vec(execution)
                    .map(Payload::json)
                    .map_err(|e| Failure::Generic(e.to_string()));
                self.resolve_child_started(*seq, payload);
            }
            Event::StartChildWorkflowExecutionFailed { seq, failure } => {
                self.resolve_child_started(*seq, Err(failure.clone()));
                self.resolve(*seq, Err(failure.clone()));
            }
            Event::WorkflowExecutionSignaled { name, input } => self.deliver_signal(name, input.clone()),
            Event::WorkflowExecutionCancelRequested => {
                self.root_scope.cancel();
                self.mark_dirty();
            }
            _ => {}
        }
    }

    /// Drop coroutines and handlers; they hold references back to the
    /// instance.
    pub(crate) fn teardown(&self) {
        self.coroutines.borrow_mut().clear();
        self.spawned.borrow_mut().clear();
        self.slots.borrow_mut().clear();
        self.child_started.borrow_mut().clear();
        self.signal_waiters.borrow_mut().clear();
        self.queries.borrow_mut().clear();
    }
}
