//! Translation between engine failures and workflow errors.

use crate::engine::{Failure, TimeoutKind};
use crate::workflow::{TimeoutType, WorkflowError};

/// Reason under which codec errors travel through history.
const CODEC_REASON: &str = "codec";

pub(crate) fn to_failure(err: WorkflowError) -> Failure {
    match err {
        WorkflowError::Custom { reason, details } => Failure::Custom { reason, details },
        WorkflowError::Canceled => Failure::Canceled,
        WorkflowError::Timeout(kind) => Failure::Timeout(match kind {
            TimeoutType::ScheduleToStart => TimeoutKind::ScheduleToStart,
            TimeoutType::StartToClose => TimeoutKind::StartToClose,
            TimeoutType::ScheduleToClose => TimeoutKind::ScheduleToClose,
            TimeoutType::Heartbeat => TimeoutKind::Heartbeat,
            TimeoutType::Execution => TimeoutKind::Execution,
        }),
        WorkflowError::Generic(message) => Failure::Generic(message),
        WorkflowError::Codec(message) => Failure::Custom {
            reason: CODEC_REASON.to_string(),
            details: Some(message),
        },
        WorkflowError::Nondeterministic(message) => Failure::Nondeterministic(message),
    }
}

pub(crate) fn from_failure(failure: Failure) -> WorkflowError {
    match failure {
        Failure::Custom { reason, details } if reason == CODEC_REASON => {
            WorkflowError::Codec(details.unwrap_or_default())
        }
        Failure::Custom { reason, details } => WorkflowError::Custom { reason, details },
        Failure::Canceled => WorkflowError::Canceled,
        Failure::Timeout(kind) => WorkflowError::Timeout(match kind {
            TimeoutKind::ScheduleToStart => TimeoutType::ScheduleToStart,
            TimeoutKind::StartToClose => TimeoutType::StartToClose,
            TimeoutKind::ScheduleToClose => TimeoutType::ScheduleToClose,
            TimeoutKind::Heartbeat => TimeoutType::Heartbeat,
            TimeoutKind::Execution => TimeoutType::Execution,
        }),
        Failure::Generic(message) => WorkflowError::Generic(message),
        Failure::Nondeterministic(message) => WorkflowError::Nondeterministic(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_survive_history() {
        let errors = vec![
            WorkflowError::invalid_argument("bad"),
            WorkflowError::Canceled,
            WorkflowError::Timeout(TimeoutType::StartToClose),
            WorkflowError::Codec("expected int".into()),
            WorkflowError::Nondeterministic("changed".into()),
        ];
        for err in errors {
            assert_eq!(from_failure(to_failure(err.clone())), err);
        }
    }
}
