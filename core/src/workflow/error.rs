//! Errors surfaced to orchestration code.

use serde::{Deserialize, Serialize};

use crate::codec::CodecError;

/// Reason code for malformed or unsupported call arguments.
pub const INVALID_ARGUMENT: &str = "invalid-argument";
/// Reason code for reserved features that are not implemented.
pub const UNIMPLEMENTED: &str = "unimplemented";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutType {
    ScheduleToStart,
    StartToClose,
    ScheduleToClose,
    Heartbeat,
    Execution,
}

impl TimeoutType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutType::ScheduleToStart => "schedule_to_start",
            TimeoutType::StartToClose => "start_to_close",
            TimeoutType::ScheduleToClose => "schedule_to_close",
            TimeoutType::Heartbeat => "heartbeat",
            TimeoutType::Execution => "execution",
        }
    }
}

/// The resolution error of a workflow future, or the failure of a workflow
/// or activity function.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum WorkflowError {
    /// Application failure with a machine-readable reason.
    #[error("{reason}{}", .details.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
    Custom { reason: String, details: Option<String> },

    #[error("canceled")]
    Canceled,

    #[error("timeout ({})", .0.as_str())]
    Timeout(TimeoutType),

    #[error("{0}")]
    Generic(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("nondeterministic workflow: {0}")]
    Nondeterministic(String),
}

impl WorkflowError {
    pub fn custom(reason: impl Into<String>, details: Option<String>) -> Self {
        WorkflowError::Custom {
            reason: reason.into(),
            details,
        }
    }

    pub fn invalid_argument(details: impl Into<String>) -> Self {
        Self::custom(INVALID_ARGUMENT, Some(details.into()))
    }

    pub fn unimplemented(details: impl Into<String>) -> Self {
        Self::custom(UNIMPLEMENTED, Some(details.into()))
    }

    /// Machine-readable reason for every variant.
    pub fn reason(&self) -> &str {
        match self {
            WorkflowError::Custom { reason, .. } => reason,
            WorkflowError::Canceled => "canceled",
            WorkflowError::Timeout(_) => "timeout",
            WorkflowError::Generic(_) => "generic",
            WorkflowError::Codec(_) => "codec",
            WorkflowError::Nondeterministic(_) => "nondeterministic",
        }
    }

    pub fn details(&self) -> Option<String> {
        match self {
            WorkflowError::Custom { details, .. } => details.clone(),
            WorkflowError::Canceled => None,
            WorkflowError::Timeout(t) => Some(t.as_str().to_string()),
            WorkflowError::Generic(msg) | WorkflowError::Codec(msg) | WorkflowError::Nondeterministic(msg) => {
                Some(msg.clone())
            }
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, WorkflowError::Canceled)
    }
}

impl From<CodecError> for WorkflowError {
    fn from(err: CodecError) -> Self {
        WorkflowError::Codec(err.to_string())
    }
}

impl From<anyhow::Error> for WorkflowError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<WorkflowError>() {
            Ok(inner) => inner,
            Err(err) => WorkflowError::Generic(format!("{:#}", err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_details() {
        let err = WorkflowError::invalid_argument("unexpected keyword foo");
        assert_eq!(err.to_string(), "invalid-argument: unexpected keyword foo");
        assert_eq!(err.reason(), INVALID_ARGUMENT);

        let bare = WorkflowError::custom("boom", None);
        assert_eq!(bare.to_string(), "boom");
    }

    #[test]
    fn test_anyhow_preserves_workflow_errors() {
        let err: WorkflowError = anyhow::Error::new(WorkflowError::Canceled).into();
        assert_eq!(err, WorkflowError::Canceled);

        let err: WorkflowError = anyhow::anyhow!("disk full").into();
        assert_eq!(err, WorkflowError::Generic("disk full".into()));
    }
}
