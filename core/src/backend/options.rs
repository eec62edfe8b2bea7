//! Structural mapping between workflow options and engine options.

use crate::engine;
use crate::workflow::{ActivityOptions, ChildWorkflowOptions, RetryPolicy};

pub(crate) fn retry_policy(policy: &RetryPolicy) -> engine::RetryPolicy {
    engine::RetryPolicy {
        initial_interval: policy.initial_interval,
        backoff_coefficient: policy.backoff_coefficient,
        maximum_interval: policy.maximum_interval,
        expiration_interval: policy.expiration_interval,
        maximum_attempts: policy.maximum_attempts,
        non_retriable_reasons: policy.non_retriable_reasons.clone(),
    }
}

fn retry_policy_from(policy: &engine::RetryPolicy) -> RetryPolicy {
    RetryPolicy {
        initial_interval: policy.initial_interval,
        backoff_coefficient: policy.backoff_coefficient,
        maximum_interval: policy.maximum_interval,
        expiration_interval: policy.expiration_interval,
        maximum_attempts: policy.maximum_attempts,
        non_retriable_reasons: policy.non_retriable_reasons.clone(),
    }
}

pub(crate) fn activity_options(options: &ActivityOptions) -> engine::ActivityOptions {
    engine::ActivityOptions {
        task_list: options.task_list.clone(),
        schedule_to_close_timeout: options.schedule_to_close_timeout,
        schedule_to_start_timeout: options.schedule_to_start_timeout,
        start_to_close_timeout: options.start_to_close_timeout,
        heartbeat_timeout: options.heartbeat_timeout,
        wait_for_cancellation: options.wait_for_cancellation,
        activity_id: options.activity_id.clone(),
        retry_policy: options.retry_policy.as_ref().map(retry_policy),
    }
}

pub(crate) fn activity_options_from(options: &engine::ActivityOptions) -> ActivityOptions {
    ActivityOptions {
        task_list: options.task_list.clone(),
        schedule_to_close_timeout: options.schedule_to_close_timeout,
        schedule_to_start_timeout: options.schedule_to_start_timeout,
        start_to_close_timeout: options.start_to_close_timeout,
        heartbeat_timeout: options.heartbeat_timeout,
        wait_for_cancellation: options.wait_for_cancellation,
        activity_id: options.activity_id.clone(),
        retry_policy: options.retry_policy.as_ref().map(retry_policy_from),
    }
}

pub(crate) fn child_options(options: &ChildWorkflowOptions) -> engine::ChildOptions {
    engine::ChildOptions {
        domain: options.domain.clone(),
        workflow_id: options.workflow_id.clone(),
        task_list: options.task_list.clone(),
        execution_start_to_close_timeout: options.execution_start_to_close_timeout,
        task_start_to_close_timeout: options.task_start_to_close_timeout,
        wait_for_cancellation: options.wait_for_cancellation,
        retry_policy: options.retry_policy.as_ref().map(retry_policy),
        cron_schedule: options.cron_schedule.clone(),
        memo: options.memo.clone(),
        search_attributes: options.search_attributes.clone(),
    }
}

pub(crate) fn child_options_from(options: &engine::ChildOptions) -> ChildWorkflowOptions {
    ChildWorkflowOptions {
        domain: options.domain.clone(),
        workflow_id: options.workflow_id.clone(),
        task_list: options.task_list.clone(),
        execution_start_to_close_timeout: options.execution_start_to_close_timeout,
        task_start_to_close_timeout: options.task_start_to_close_timeout,
        wait_for_cancellation: options.wait_for_cancellation,
        retry_policy: options.retry_policy.as_ref().map(retry_policy_from),
        cron_schedule: options.cron_schedule.clone(),
        memo: options.memo.clone(),
        search_attributes: options.search_attributes.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;
    use std::time::Duration;

    #[test]
    fn test_missing_retry_policy_stays_missing() {
        let options = ActivityOptions::default().with_task_list("tl");
        let mapped = activity_options(&options);
        assert_eq!(mapped.retry_policy, None);
        assert_eq!(mapped.task_list.as_deref(), Some("tl"));
        assert_eq!(activity_options_from(&mapped), options);
    }

    #[test]
    fn test_child_options_carry_cron_and_memo() {
        let options = ChildWorkflowOptions {
            cron_schedule: Some("*/5 * * * *".into()),
            memo: btreemap! { "owner".to_string() => serde_json::json!("ops") },
            execution_start_to_close_timeout: Some(Duration::from_secs(60)),
            retry_policy: Some(RetryPolicy {
                maximum_attempts: 3,
                ..Default::default()
            }),
            ..Default::default()
        }
        .with_domain("other");

        let mapped = child_options(&options);
        assert_eq!(mapped.cron_schedule.as_deref(), Some("*/5 * * * *"));
        assert_eq!(mapped.domain.as_deref(), Some("other"));
        assert_eq!(mapped.retry_policy.as_ref().map(|p| p.maximum_attempts), Some(3));
        assert_eq!(child_options_from(&mapped), options);
    }
}
