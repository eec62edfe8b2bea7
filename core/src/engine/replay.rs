//! Rebuilding a workflow instance from history.
//!
//! Every decision task replays the whole history: events are applied in
//! order and the coroutines are driven at each decision boundary. Decisions
//! already completed in history run in replay mode, where every command the
//! workflow issues must match the recorded one; only the final, open
//! decision produces new commands.

use std::collections::HashMap;
use std::sync::Arc;

use super::context::Context;
use super::history::{Command, DecisionResult, Event, Execution, HistoryEntry, WorkflowInfo};
use super::instance::Instance;
use super::propagator::ContextPropagator;
use super::{Failure, WorkflowFn};
use crate::codec::Payload;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Decide,
    Query,
}

/// Replays histories against registered workflow functions.
#[derive(Clone, Default)]
pub struct Replayer {
    workflows: HashMap<String, WorkflowFn>,
    propagators: Vec<Arc<dyn ContextPropagator>>,
}

impl Replayer {
    pub fn new(workflows: HashMap<String, WorkflowFn>, propagators: Vec<Arc<dyn ContextPropagator>>) -> Self {
        Self { workflows, propagators }
    }

    pub fn has_workflow(&self, workflow_type: &str) -> bool {
        self.workflows.contains_key(workflow_type)
    }

    /// Produce the decision for the open decision task at the end of
    /// `history`.
    pub fn decide(&self, execution: &Execution, history: &[HistoryEntry]) -> DecisionResult {
        let instance = match self.replay(execution, history, Mode::Decide) {
            Ok(instance) => instance,
            Err(failure) => return DecisionResult::Failed(failure),
        };
        let mut commands = instance.take_commands();
        let result = instance.result();
        instance.teardown();

        if let Some(message) = instance.nondeterminism() {
            return DecisionResult::Failed(Failure::Nondeterministic(message));
        }
        match result {
            Some(Ok(result)) => commands.push(Command::CompleteWorkflow { result }),
            Some(Err(Failure::Canceled)) => commands.push(Command::CancelWorkflow),
            Some(Err(failure)) => commands.push(Command::FailWorkflow { failure }),
            None => {}
        }
        DecisionResult::Completed(commands)
    }

    /// Replay completed decisions and answer a query against the rebuilt
    /// instance.
    pub fn query(
        &self,
        execution: &Execution,
        history: &[HistoryEntry],
        name: &str,
        args: &[Payload],
    ) -> Result<Payload, Failure> {
        let instance = self.replay(execution, history, Mode::Query)?;
        let handler = instance.query_handler(name);
        let result = match handler {
            Some(handler) => handler(args),
            None => Err(Failure::Custom {
                reason: "unknown-query".to_string(),
                details: Some(name.to_string()),
            }),
        };
        instance.teardown();
        result
    }

    fn replay(
        &self,
        execution: &Execution,
        history: &[HistoryEntry],
        mode: Mode,
    ) -> Result<std::rc::Rc<Instance>, Failure> {
        let Some(first) = history.first() else {
            return Err(Failure::Generic("empty history".to_string()));
        };
        let Event::WorkflowExecutionStarted {
            workflow_type,
            input,
            domain,
            task_list,
            headers,
            ..
        } = &first.event
        else {
            return Err(Failure::Generic("history does not start with a workflow start".to_string()));
        };
        let Some(workflow) = self.workflows.get(workflow_type).cloned() else {
            return Err(Failure::Generic(format!("workflow type {:?} is not registered", workflow_type)));
        };

        let info = WorkflowInfo {
            execution: execution.clone(),
            workflow_type: workflow_type.clone(),
            domain: domain.clone(),
            task_list: task_list.clone(),
        };
        let instance = Instance::new(info, history, first.timestamp, self.propagators.clone());

        let mut root = Context::root(instance.clone());
        for propagator in &self.propagators {
            root = propagator.extract(root, headers);
        }
        let input = input.clone();
        let handle = instance.clone();
        root.go(move |ctx| {
            Box::pin(async move {
                let result = workflow(ctx, input).await;
                handle.set_result(result);
            })
        });

        for (index, entry) in history.iter().enumerate().skip(1) {
            match &entry.event {
                Event::DecisionTaskStarted => {
                    let closing = history[index + 1..].iter().find_map(|e| match e.event {
                        Event::DecisionTaskCompleted => Some(true),
                        Event::DecisionTaskFailed { .. } => Some(false),
                        _ => None,
                    });
                    match (closing, mode) {
                        // A failed attempt recorded no commands.
                        (Some(false), _) => continue,
                        (None, Mode::Query) => continue,
                        (closing, _) => instance.begin_decision(closing.is_some(), entry.timestamp),
                    }
                    instance.run_until_blocked();
                    if instance.nondeterminism().is_some() {
                        break;
                    }
                }
                event => instance.apply(event),
            }
        }
        if instance.nondeterminism().is_none() {
            instance.check_unissued();
        }
        Ok(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures::FutureExt;
    use std::time::Duration;

    use crate::engine::Headers;

    fn entry(event_id: u64, event: Event) -> HistoryEntry {
        HistoryEntry {
            event_id,
            timestamp: Utc::now(),
            event,
        }
    }

    fn started(workflow_type: &str) -> Event {
        Event::WorkflowExecutionStarted {
            workflow_type: workflow_type.into(),
            input: vec![],
            domain: "default".into(),
            task_list: "tl".into(),
            headers: Headers::new(),
            parent: None,
            cron_schedule: None,
        }
    }

    fn execution() -> Execution {
        Execution {
            workflow_id: "wf".into(),
            run_id: "run".into(),
        }
    }

    /// Runs one activity, then sleeps, then returns the activity result.
    fn replayer() -> Replayer {
        let workflow: WorkflowFn = Arc::new(|ctx: Context, _input: Vec<Payload>| {
            async move {
                let value = ctx.execute_activity("fetch", vec![]).get(&ctx).await?;
                ctx.new_timer(Duration::from_secs(5)).get(&ctx).await?;
                Ok(value)
            }
            .boxed_local()
        });
        let mut workflows = HashMap::new();
        workflows.insert("flow".to_string(), workflow);
        Replayer::new(workflows, vec![])
    }

    fn scheduled(seq: u64, activity_type: &str) -> Event {
        Event::ActivityTaskScheduled {
            seq,
            activity_type: activity_type.into(),
            activity_id: seq.to_string(),
            task_list: "tl".into(),
            input: vec![],
            options: Default::default(),
            headers: Headers::new(),
        }
    }

    #[test]
    fn test_first_decision_schedules_activity() {
        let history = vec![entry(1, started("flow")), entry(2, Event::DecisionTaskStarted)];
        let DecisionResult::Completed(commands) = replayer().decide(&execution(), &history) else {
            panic!("decision failed");
        };
        assert_eq!(commands.len(), 1);
        assert!(matches!(&commands[0], Command::ScheduleActivity { seq: 0, activity_type, .. } if activity_type == "fetch"));
    }

    #[test]
    fn test_replay_continues_after_completion() {
        let payload = Payload::json(b"42".to_vec());
        let history = vec![
            entry(1, started("flow")),
            entry(2, Event::DecisionTaskStarted),
            entry(3, Event::DecisionTaskCompleted),
            entry(4, scheduled(0, "fetch")),
            entry(
                5,
                Event::ActivityTaskCompleted {
                    seq: 0,
                    result: payload.clone(),
                },
            ),
            entry(6, Event::DecisionTaskStarted),
            entry(7, Event::DecisionTaskCompleted),
            entry(
                8,
                Event::TimerStarted {
                    seq: 1,
                    duration: Duration::from_secs(5),
                },
            ),
            entry(9, Event::TimerFired { seq: 1 }),
            entry(10, Event::DecisionTaskStarted),
        ];
        let DecisionResult::Completed(commands) = replayer().decide(&execution(), &history) else {
            panic!("decision failed");
        };
        assert_eq!(commands, vec![Command::CompleteWorkflow { result: payload }]);
    }

    #[test]
    fn test_changed_activity_is_nondeterministic() {
        let history = vec![
            entry(1, started("flow")),
            entry(2, Event::DecisionTaskStarted),
            entry(3, Event::DecisionTaskCompleted),
            entry(4, scheduled(0, "something_else")),
            entry(5, Event::DecisionTaskStarted),
        ];
        let result = replayer().decide(&execution(), &history);
        assert!(matches!(result, DecisionResult::Failed(Failure::Nondeterministic(_))));
    }

    #[test]
    fn test_unknown_workflow_type_fails_decision() {
        let history = vec![entry(1, started("missing")), entry(2, Event::DecisionTaskStarted)];
        let result = replayer().decide(&execution(), &history);
        assert!(matches!(result, DecisionResult::Failed(Failure::Generic(_))));
    }

    #[test]
    fn test_cancel_request_resolves_waits_as_canceled() {
        let history = vec![
            entry(1, started("flow")),
            entry(2, Event::DecisionTaskStarted),
            entry(3, Event::DecisionTaskCompleted),
            entry(4, scheduled(0, "fetch")),
            entry(5, Event::WorkflowExecutionCancelRequested),
            entry(6, Event::DecisionTaskStarted),
        ];
        let DecisionResult::Completed(commands) = replayer().decide(&execution(), &history) else {
            panic!("decision failed");
        };
        assert_eq!(commands, vec![Command::CancelWorkflow]);
    }
}
