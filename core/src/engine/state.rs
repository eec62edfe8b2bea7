//! Execution records: the server-side state of one workflow run.
//!
//! A record is a pure state machine. Frontends load it, apply a transition
//! and persist it together with the [`Effect`]s the transition produced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::history::{ActivityOptions, Command, Event, Execution, Failure, Headers, HistoryEntry, ParentRef};
use crate::codec::Payload;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed(Payload),
    Failed(Failure),
    Canceled,
}

impl ExecutionStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, ExecutionStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed(_) => "completed",
            ExecutionStatus::Failed(_) => "failed",
            ExecutionStatus::Canceled => "canceled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionState {
    Idle,
    Scheduled,
    /// A task is in flight; `again` is set when events arrived meanwhile.
    Started { again: bool },
}

impl DecisionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionState::Idle => "idle",
            DecisionState::Scheduled => "scheduled",
            DecisionState::Started { .. } => "started",
        }
    }
}

/// Identifies the decision task a response belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionToken {
    pub workflow_id: String,
    pub run_id: String,
    pub started_event_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTask {
    pub token: DecisionToken,
    pub execution: Execution,
    pub workflow_type: String,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityTask {
    pub token: String,
    pub execution: Execution,
    pub seq: u64,
    pub activity_type: String,
    pub activity_id: String,
    pub domain: String,
    pub task_list: String,
    pub input: Vec<Payload>,
    pub headers: Headers,
    pub options: ActivityOptions,
    /// Starts at 1.
    pub attempt: u32,
    pub scheduled_at: DateTime<Utc>,
    pub visible_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerTask {
    pub execution: Execution,
    pub seq: u64,
    pub fire_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartWorkflowRequest {
    pub workflow_id: Option<String>,
    pub workflow_type: String,
    pub domain: String,
    pub task_list: String,
    pub input: Vec<Payload>,
    pub headers: Headers,
    pub cron_schedule: Option<String>,
}

/// Work a transition hands to the frontend.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Activity(ActivityTask),
    Timer(TimerTask),
    StartChild {
        parent: ParentRef,
        workflow_id: String,
        request: StartWorkflowRequest,
    },
    Signal {
        origin: ParentRef,
        workflow_id: String,
        name: String,
        input: Payload,
    },
    /// Report a closed child to its parent.
    NotifyParent { parent: ParentRef, event: Event },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution: Execution,
    pub workflow_type: String,
    pub domain: String,
    pub task_list: String,
    pub parent: Option<ParentRef>,
    pub cron_schedule: Option<String>,
    pub status: ExecutionStatus,
    pub decision: DecisionState,
    pub history: Vec<HistoryEntry>,
}

impl ExecutionRecord {
    pub fn start(
        workflow_id: String,
        request: StartWorkflowRequest,
        parent: Option<ParentRef>,
        now: DateTime<Utc>,
    ) -> Self {
        let execution = Execution {
            workflow_id,
            run_id: uuid::Uuid::new_v4().to_string(),
        };
        let mut record = Self {
            execution,
            workflow_type: request.workflow_type.clone(),
            domain: request.domain.clone(),
            task_list: request.task_list.clone(),
            parent: parent.clone(),
            cron_schedule: request.cron_schedule.clone(),
            status: ExecutionStatus::Running,
            decision: DecisionState::Scheduled,
            history: Vec::new(),
        };
        record.push(
            Event::WorkflowExecutionStarted {
                workflow_type: request.workflow_type,
                input: request.input,
                domain: request.domain,
                task_list: request.task_list,
                headers: request.headers,
                parent,
                cron_schedule: request.cron_schedule,
            },
            now,
        );
        record
    }

    fn push(&mut self, event: Event, now: DateTime<Utc>) -> u64 {
        let event_id = self.history.len() as u64 + 1;
        self.history.push(HistoryEntry {
            event_id,
            timestamp: now,
            event,
        });
        event_id
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// Append an event arriving from outside the workflow and schedule a
    /// decision for it. Events for closed executions are dropped.
    pub fn deliver(&mut self, event: Event, now: DateTime<Utc>) -> bool {
        if !self.is_open() {
            tracing::debug!(workflow_id = %self.execution.workflow_id, ?event, "dropping event for closed execution");
            return false;
        }
        let needs_decision = event.needs_decision();
        self.push(event, now);
        if needs_decision {
            self.decision = match self.decision {
                DecisionState::Idle | DecisionState::Scheduled => DecisionState::Scheduled,
                DecisionState::Started { .. } => DecisionState::Started { again: true },
            };
        }
        true
    }

    /// Hand out the scheduled decision task, if any.
    pub fn start_decision(&mut self, now: DateTime<Utc>) -> Option<DecisionTask> {
        if self.decision != DecisionState::Scheduled || !self.is_open() {
            return None;
        }
        let started_event_id = self.push(Event::DecisionTaskStarted, now);
        self.decision = DecisionState::Started { again: false };
        Some(DecisionTask {
            token: DecisionToken {
                workflow_id: self.execution.workflow_id.clone(),
                run_id: self.execution.run_id.clone(),
                started_event_id,
            },
            execution: self.execution.clone(),
            workflow_type: self.workflow_type.clone(),
            history: self.history.clone(),
        })
    }

    pub fn owns(&self, token: &DecisionToken) -> bool {
        self.execution.run_id == token.run_id
            && matches!(self.decision, DecisionState::Started { .. })
            && self
                .history
                .iter()
                .rev()
                .find(|e| matches!(e.event, Event::DecisionTaskStarted))
                .is_some_and(|e| e.event_id == token.started_event_id)
    }

    /// Record the commands of a completed decision.
    pub fn complete_decision(&mut self, commands: Vec<Command>, now: DateTime<Utc>) -> Vec<Effect> {
        let again = matches!(self.decision, DecisionState::Started { again: true });
        self.push(Event::DecisionTaskCompleted, now);
        let mut effects = Vec::new();

        for command in commands {
            if !self.is_open() {
                break;
            }
            self.push(command.to_event(), now);
            match command {
                Command::ScheduleActivity {
                    seq,
                    activity_type,
                    activity_id,
                    task_list,
                    input,
                    options,
                    headers,
                } => effects.push(Effect::Activity(ActivityTask {
                    token: uuid::Uuid::new_v4().to_string(),
                    execution: self.execution.clone(),
                    seq,
                    activity_type,
                    activity_id,
                    domain: self.domain.clone(),
                    task_list,
                    input,
                    headers,
                    options,
                    attempt: 1,
                    scheduled_at: now,
                    visible_at: now,
                })),
                Command::StartTimer { seq, duration } => {
                    let fire_at = now + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500));
                    effects.push(Effect::Timer(TimerTask {
                        execution: self.execution.clone(),
                        seq,
                        fire_at,
                    }));
                }
                Command::RecordMarker { .. } => {}
                Command::StartChildWorkflow {
                    seq,
                    workflow_type,
                    workflow_id,
                    input,
                    options,
                    headers,
                } => effects.push(Effect::StartChild {
                    parent: ParentRef {
                        execution: self.execution.clone(),
                        seq,
                    },
                    workflow_id,
                    request: StartWorkflowRequest {
                        workflow_id: None,
                        workflow_type,
                        domain: options.domain.clone().unwrap_or_else(|| self.domain.clone()),
                        task_list: options.task_list.clone().unwrap_or_else(|| self.task_list.clone()),
                        input,
                        headers,
                        cron_schedule: options.cron_schedule,
                    },
                }),
                Command::SignalExternalWorkflow {
                    seq,
                    workflow_id,
                    name,
                    input,
                } => effects.push(Effect::Signal {
                    origin: ParentRef {
                        execution: self.execution.clone(),
                        seq,
                    },
                    workflow_id,
                    name,
                    input,
                }),
                Command::CompleteWorkflow { result } => {
                    effects.extend(self.close(ExecutionStatus::Completed(result)));
                }
                Command::FailWorkflow { failure } => {
                    effects.extend(self.close(ExecutionStatus::Failed(failure)));
                }
                Command::CancelWorkflow => effects.extend(self.close(ExecutionStatus::Canceled)),
            }
        }

        self.decision = if again && self.is_open() {
            DecisionState::Scheduled
        } else {
            DecisionState::Idle
        };
        effects
    }

    /// The decision could not be made; the execution fails with `failure`.
    pub fn fail_decision(&mut self, failure: Failure, now: DateTime<Utc>) -> Vec<Effect> {
        self.push(
            Event::DecisionTaskFailed {
                message: failure.to_string(),
            },
            now,
        );
        self.push(
            Event::WorkflowExecutionFailed {
                failure: failure.clone(),
            },
            now,
        );
        self.decision = DecisionState::Idle;
        self.close(ExecutionStatus::Failed(failure)).into_iter().collect()
    }

    fn close(&mut self, status: ExecutionStatus) -> Option<Effect> {
        tracing::info!(
            workflow_id = %self.execution.workflow_id,
            run_id = %self.execution.run_id,
            status = status.as_str(),
            "workflow closed"
        );
        self.status = status;
        let parent = self.parent.clone()?;
        let seq = parent.seq;
        let event = match &self.status {
            ExecutionStatus::Completed(result) => Event::ChildWorkflowExecutionCompleted {
                seq,
                result: result.clone(),
            },
            ExecutionStatus::Failed(failure) => Event::ChildWorkflowExecutionFailed {
                seq,
                failure: failure.clone(),
            },
            ExecutionStatus::Canceled | ExecutionStatus::Running => Event::ChildWorkflowExecutionCanceled { seq },
        };
        Some(Effect::NotifyParent { parent, event })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request() -> StartWorkflowRequest {
        StartWorkflowRequest {
            workflow_id: Some("wf".into()),
            workflow_type: "flow".into(),
            domain: "default".into(),
            task_list: "tl".into(),
            input: vec![],
            headers: Headers::new(),
            cron_schedule: None,
        }
    }

    #[test]
    fn test_events_during_decision_schedule_another() {
        let now = Utc::now();
        let mut record = ExecutionRecord::start("wf".into(), request(), None, now);
        let task = record.start_decision(now).unwrap();
        assert!(record.owns(&task.token));
        assert!(record.start_decision(now).is_none());

        record.deliver(
            Event::WorkflowExecutionSignaled {
                name: "go".into(),
                input: Payload::unit(),
            },
            now,
        );
        let effects = record.complete_decision(
            vec![Command::StartTimer {
                seq: 0,
                duration: Duration::from_secs(1),
            }],
            now,
        );
        assert_eq!(effects.len(), 1);
        assert_eq!(record.decision, DecisionState::Scheduled);
    }

    #[test]
    fn test_child_completion_notifies_parent() {
        let now = Utc::now();
        let parent = ParentRef {
            execution: Execution {
                workflow_id: "parent".into(),
                run_id: "r".into(),
            },
            seq: 3,
        };
        let mut record = ExecutionRecord::start("child".into(), request(), Some(parent.clone()), now);
        record.start_decision(now).unwrap();
        let effects = record.complete_decision(
            vec![Command::CompleteWorkflow {
                result: Payload::unit(),
            }],
            now,
        );
        assert!(!record.is_open());
        assert_eq!(
            effects,
            vec![Effect::NotifyParent {
                parent,
                event: Event::ChildWorkflowExecutionCompleted {
                    seq: 3,
                    result: Payload::unit()
                },
            }]
        );
        assert!(!record.deliver(Event::TimerFired { seq: 0 }, now));
    }
}
