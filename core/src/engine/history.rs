//! Event history, decisions and the options they carry.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::Payload;

/// Request headers, one entry per propagated key.
pub type Headers = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Execution {
    pub workflow_id: String,
    pub run_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInfo {
    pub execution: Execution,
    pub workflow_type: String,
    pub domain: String,
    pub task_list: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutKind {
    ScheduleToStart,
    StartToClose,
    ScheduleToClose,
    Heartbeat,
    Execution,
}

/// Failure recorded in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Failure {
    #[error("{reason}")]
    Custom { reason: String, details: Option<String> },

    #[error("canceled")]
    Canceled,

    #[error("timeout ({0:?})")]
    Timeout(TimeoutKind),

    #[error("{0}")]
    Generic(String),

    #[error("nondeterministic: {0}")]
    Nondeterministic(String),
}

impl Failure {
    pub fn reason(&self) -> &str {
        match self {
            Failure::Custom { reason, .. } => reason,
            Failure::Canceled => "canceled",
            Failure::Timeout(_) => "timeout",
            Failure::Generic(_) => "generic",
            Failure::Nondeterministic(_) => "nondeterministic",
        }
    }
}

/* ===================== Options ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub maximum_interval: Option<Duration>,
    pub expiration_interval: Option<Duration>,
    pub maximum_attempts: u32,
    pub non_retriable_reasons: Vec<String>,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_interval.as_secs_f64() * self.backoff_coefficient.max(1.0).powi(exp);
        let delay = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
        match self.maximum_interval {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    pub fn allows_retry(&self, attempt: u32, failure: &Failure) -> bool {
        if matches!(failure, Failure::Canceled | Failure::Nondeterministic(_)) {
            return false;
        }
        if self.maximum_attempts > 0 && attempt >= self.maximum_attempts {
            return false;
        }
        !self.non_retriable_reasons.iter().any(|r| r == failure.reason())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityOptions {
    pub task_list: Option<String>,
    pub schedule_to_close_timeout: Option<Duration>,
    pub schedule_to_start_timeout: Option<Duration>,
    pub start_to_close_timeout: Option<Duration>,
    pub heartbeat_timeout: Option<Duration>,
    pub wait_for_cancellation: bool,
    pub activity_id: Option<String>,
    pub retry_policy: Option<RetryPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChildOptions {
    pub domain: Option<String>,
    pub workflow_id: Option<String>,
    pub task_list: Option<String>,
    pub execution_start_to_close_timeout: Option<Duration>,
    pub task_start_to_close_timeout: Option<Duration>,
    pub wait_for_cancellation: bool,
    pub retry_policy: Option<RetryPolicy>,
    pub cron_schedule: Option<String>,
    pub memo: BTreeMap<String, serde_json::Value>,
    pub search_attributes: BTreeMap<String, serde_json::Value>,
}

/* ===================== Events ===================== */

/// Link from a child execution back to the command that started it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentRef {
    pub execution: Execution,
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    WorkflowExecutionStarted {
        workflow_type: String,
        input: Vec<Payload>,
        domain: String,
        task_list: String,
        headers: Headers,
        parent: Option<ParentRef>,
        cron_schedule: Option<String>,
    },
    WorkflowExecutionCompleted {
        result: Payload,
    },
    WorkflowExecutionFailed {
        failure: Failure,
    },
    WorkflowExecutionCanceled,
    WorkflowExecutionCancelRequested,
    WorkflowExecutionSignaled {
        name: String,
        input: Payload,
    },

    DecisionTaskStarted,
    DecisionTaskCompleted,
    DecisionTaskFailed {
        message: String,
    },

    ActivityTaskScheduled {
        seq: u64,
        activity_type: String,
        activity_id: String,
        task_list: String,
        input: Vec<Payload>,
        options: ActivityOptions,
        headers: Headers,
    },
    ActivityTaskCompleted {
        seq: u64,
        result: Payload,
    },
    ActivityTaskFailed {
        seq: u64,
        failure: Failure,
    },

    TimerStarted {
        seq: u64,
        duration: Duration,
    },
    TimerFired {
        seq: u64,
    },

    MarkerRecorded {
        seq: u64,
        name: String,
        result: Result<Payload, Failure>,
    },

    ChildWorkflowExecutionInitiated {
        seq: u64,
        workflow_type: String,
        workflow_id: String,
        input: Vec<Payload>,
        options: ChildOptions,
        headers: Headers,
    },
    ChildWorkflowExecutionStarted {
        seq: u64,
        execution: Execution,
    },
    StartChildWorkflowExecutionFailed {
        seq: u64,
        failure: Failure,
    },
    ChildWorkflowExecutionCompleted {
        seq: u64,
        result: Payload,
    },
    ChildWorkflowExecutionFailed {
        seq: u64,
        failure: Failure,
    },
    ChildWorkflowExecutionCanceled {
        seq: u64,
    },

    SignalExternalWorkflowExecutionInitiated {
        seq: u64,
        workflow_id: String,
        name: String,
        input: Payload,
    },
    ExternalWorkflowExecutionSignaled {
        seq: u64,
    },
    SignalExternalWorkflowExecutionFailed {
        seq: u64,
        failure: Failure,
    },
}

impl Event {
    /// Sequence number of the command this event records, for events that
    /// are the recorded form of a decision.
    pub fn command_seq(&self) -> Option<u64> {
        match self {
            Event::ActivityTaskScheduled { seq, .. }
            | Event::TimerStarted { seq, .. }
            | Event::MarkerRecorded { seq, .. }
            | Event::ChildWorkflowExecutionInitiated { seq, .. }
            | Event::SignalExternalWorkflowExecutionInitiated { seq, .. } => Some(*seq),
            _ => None,
        }
    }

    /// Whether this event arrived from outside the workflow and needs a new
    /// decision.
    pub fn needs_decision(&self) -> bool {
        matches!(
            self,
            Event::WorkflowExecutionCancelRequested
                | Event::WorkflowExecutionSignaled { .. }
                | Event::ActivityTaskCompleted { .. }
                | Event::ActivityTaskFailed { .. }
                | Event::TimerFired { .. }
                | Event::ChildWorkflowExecutionStarted { .. }
                | Event::StartChildWorkflowExecutionFailed { .. }
                | Event::ChildWorkflowExecutionCompleted { .. }
                | Event::ChildWorkflowExecutionFailed { .. }
                | Event::ChildWorkflowExecutionCanceled { .. }
                | Event::ExternalWorkflowExecutionSignaled { .. }
                | Event::SignalExternalWorkflowExecutionFailed { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub event_id: u64,
    pub timestamp: DateTime<Utc>,
    pub event: Event,
}

/* ===================== Decisions ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    ScheduleActivity {
        seq: u64,
        activity_type: String,
        activity_id: String,
        task_list: String,
        input: Vec<Payload>,
        options: ActivityOptions,
        headers: Headers,
    },
    StartTimer {
        seq: u64,
        duration: Duration,
    },
    RecordMarker {
        seq: u64,
        name: String,
        result: Result<Payload, Failure>,
    },
    StartChildWorkflow {
        seq: u64,
        workflow_type: String,
        workflow_id: String,
        input: Vec<Payload>,
        options: ChildOptions,
        headers: Headers,
    },
    SignalExternalWorkflow {
        seq: u64,
        workflow_id: String,
        name: String,
        input: Payload,
    },
    CompleteWorkflow {
        result: Payload,
    },
    FailWorkflow {
        failure: Failure,
    },
    CancelWorkflow,
}

impl Command {
    /// Short description used in non-determinism reports.
    pub fn describe(&self) -> String {
        match self {
            Command::ScheduleActivity { activity_type, .. } => format!("activity {activity_type}"),
            Command::StartTimer { .. } => "timer".to_string(),
            Command::RecordMarker { name, .. } => format!("marker {name}"),
            Command::StartChildWorkflow { workflow_type, .. } => format!("child workflow {workflow_type}"),
            Command::SignalExternalWorkflow { name, .. } => format!("signal {name}"),
            Command::CompleteWorkflow { .. } => "complete".to_string(),
            Command::FailWorkflow { .. } => "fail".to_string(),
            Command::CancelWorkflow => "cancel".to_string(),
        }
    }

    /// Whether `event` is the recording of this command.
    pub fn matches(&self, event: &Event) -> bool {
        match (self, event) {
            (
                Command::ScheduleActivity { activity_type: a, .. },
                Event::ActivityTaskScheduled { activity_type: b, .. },
            ) => a == b,
            (Command::StartTimer { .. }, Event::TimerStarted { .. }) => true,
            (Command::RecordMarker { name: a, .. }, Event::MarkerRecorded { name: b, .. }) => a == b,
            (
                Command::StartChildWorkflow { workflow_type: a, .. },
                Event::ChildWorkflowExecutionInitiated { workflow_type: b, .. },
            ) => a == b,
            (
                Command::SignalExternalWorkflow { name: a, workflow_id: wa, .. },
                Event::SignalExternalWorkflowExecutionInitiated { name: b, workflow_id: wb, .. },
            ) => a == b && wa == wb,
            _ => false,
        }
    }

    /// The event recording this command.
    pub fn to_event(&self) -> Event {
        match self.clone() {
            Command::ScheduleActivity {
                seq,
                activity_type,
                activity_id,
                task_list,
                input,
                options,
                headers,
            } => Event::ActivityTaskScheduled {
                seq,
                activity_type,
                activity_id,
                task_list,
                input,
                options,
                headers,
            },
            Command::StartTimer { seq, duration } => Event::TimerStarted { seq, duration },
            Command::RecordMarker { seq, name, result } => Event::MarkerRecorded { seq, name, result },
            Command::StartChildWorkflow {
                seq,
                workflow_type,
                workflow_id,
                input,
                options,
                headers,
            } => Event::ChildWorkflowExecutionInitiated {
                seq,
                workflow_type,
                workflow_id,
                input,
                options,
                headers,
            },
            Command::SignalExternalWorkflow {
                seq,
                workflow_id,
                name,
                input,
            } => Event::SignalExternalWorkflowExecutionInitiated {
                seq,
                workflow_id,
                name,
                input,
            },
            Command::CompleteWorkflow { result } => Event::WorkflowExecutionCompleted { result },
            Command::FailWorkflow { failure } => Event::WorkflowExecutionFailed { failure },
            Command::CancelWorkflow => Event::WorkflowExecutionCanceled,
        }
    }
}

/// What a worker reports for a decision task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DecisionResult {
    Completed(Vec<Command>),
    /// The workflow code could not produce a decision; the execution fails.
    Failed(Failure),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_interval: Some(Duration::from_secs(5)),
            expiration_interval: None,
            maximum_attempts: 0,
            non_retriable_reasons: vec![],
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(10), Duration::from_secs(5));
    }

    #[test]
    fn test_retry_stops_on_attempts_and_reasons() {
        let policy = RetryPolicy {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_interval: None,
            expiration_interval: None,
            maximum_attempts: 3,
            non_retriable_reasons: vec!["bad-input".into()],
        };
        let transient = Failure::Generic("flaky".into());
        assert!(policy.allows_retry(2, &transient));
        assert!(!policy.allows_retry(3, &transient));
        assert!(!policy.allows_retry(
            1,
            &Failure::Custom {
                reason: "bad-input".into(),
                details: None
            }
        ));
        assert!(!policy.allows_retry(1, &Failure::Canceled));
    }

    #[test]
    fn test_command_matching_uses_kind_and_name() {
        let command = Command::ScheduleActivity {
            seq: 0,
            activity_type: "a".into(),
            activity_id: "0".into(),
            task_list: "tl".into(),
            input: vec![],
            options: ActivityOptions::default(),
            headers: Headers::new(),
        };
        assert!(command.matches(&command.to_event()));
        assert!(!command.matches(&Event::TimerStarted {
            seq: 0,
            duration: Duration::from_secs(1)
        }));
    }
}
