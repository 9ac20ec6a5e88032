//! Wait for a stack to settle after an execute

use std::time::Duration;

use stackctl_common::{Aimd, AimdConfig, StackStatus, StatusOutcome};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::aws::CloudFormationOperations;
use crate::error::EngineError;
use crate::wait::{cancellable, sleep_or_cancel};

/// Poll `stack_id` at a fixed interval until its status is terminal.
///
/// Returns the success status, or [`EngineError::TerminalFailure`] for a
/// failure or rollback status. A throttled describe stretches the interval
/// and is retried; any other describe error ends the wait, as does a
/// describe that does not match exactly one stack.
pub async fn await_terminal(
    cf: &dyn CloudFormationOperations,
    stack_id: &str,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<StackStatus, EngineError> {
    let mut last_status = String::new();
    let mut backoff = Aimd::new(AimdConfig::with_min(poll_interval));

    loop {
        sleep_or_cancel(backoff.current(), cancel).await?;

        let stacks = match cancellable(cancel, cf.describe_stacks(stack_id)).await? {
            Ok(stacks) => {
                backoff.on_success();
                stacks
            }
            Err(e) if e.is_throttled() => {
                backoff.on_error();
                debug!(stack = %stack_id, interval = ?backoff.current(), "Stack describe throttled");
                continue;
            }
            Err(e) => {
                return Err(EngineError::remote(format!("unable to describe stack {stack_id}"), e));
            }
        };
        let [stack] = stacks.as_slice() else {
            return Err(EngineError::Ambiguous {
                stack: stack_id.to_string(),
                matches: stacks.len(),
            });
        };

        if stack.status != last_status {
            info!(
                stack = %stack.stack_name,
                status = %stack.status,
                reason = stack.status_reason.as_deref().unwrap_or_default(),
                "Stack status changed"
            );
            last_status.clone_from(&stack.status);
        } else {
            trace!(stack = %stack.stack_name, status = %stack.status, "Stack poll");
        }

        // Statuses unknown to this build keep the wait going
        let Some(status) = stack.stack_status() else {
            continue;
        };
        match status.outcome() {
            StatusOutcome::Continue => {}
            StatusOutcome::Success => return Ok(status),
            StatusOutcome::Failure => {
                return Err(EngineError::TerminalFailure {
                    stack: stack.stack_name.clone(),
                    status,
                    reason: stack.status_reason.clone(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::AwsError;
    use crate::testing::{FakeCloud, stack_id};

    const TICK: Duration = Duration::from_secs(1);

    #[tokio::test(start_paused = true)]
    async fn resolves_on_success_status() {
        let cloud = FakeCloud::new();
        cloud.put_stack("web", "UPDATE_IN_PROGRESS");
        cloud.script_stack(
            "web",
            &[
                "UPDATE_IN_PROGRESS",
                "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS",
                "UPDATE_COMPLETE",
            ],
        );

        let started = tokio::time::Instant::now();
        let status = await_terminal(&cloud, &stack_id("web"), TICK, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, StackStatus::UpdateComplete);
        // One wait before each of the three describes
        assert!(started.elapsed() >= TICK * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rollback_is_a_terminal_failure() {
        let cloud = FakeCloud::new();
        cloud.put_stack("web", "UPDATE_IN_PROGRESS");
        cloud.script_stack(
            "web",
            &["UPDATE_ROLLBACK_IN_PROGRESS", "UPDATE_ROLLBACK_COMPLETE"],
        );

        let err = await_terminal(&cloud, "web", TICK, &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            EngineError::TerminalFailure { stack, status, .. } => {
                assert_eq!(stack, "web");
                assert_eq!(status, StackStatus::UpdateRollbackComplete);
            }
            other => panic!("expected terminal failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_status_keeps_polling() {
        let cloud = FakeCloud::new();
        cloud.put_stack("web", "UPDATE_IN_PROGRESS");
        cloud.script_stack("web", &["SOMETHING_NEW", "CREATE_COMPLETE"]);
        let status = await_terminal(&cloud, "web", TICK, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, StackStatus::CreateComplete);
    }

    #[tokio::test(start_paused = true)]
    async fn ambiguous_identity_is_fatal() {
        let cloud = FakeCloud::new();
        cloud.put_stack("web", "UPDATE_IN_PROGRESS");
        cloud.duplicate_stack("web", 2);
        let err = await_terminal(&cloud, "web", TICK, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Ambiguous { matches: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_describes_slow_down_and_retry() {
        let cloud = FakeCloud::new();
        cloud.put_stack("web", "UPDATE_COMPLETE");
        cloud.throttle_describes(3);

        let started = tokio::time::Instant::now();
        let status = await_terminal(&cloud, "web", TICK, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, StackStatus::UpdateComplete);
        // 1s, then 2s, 4s and 8s after each throttled describe
        assert!(started.elapsed() >= TICK * 15);
    }

    #[tokio::test(start_paused = true)]
    async fn describe_errors_end_the_wait() {
        let cloud = FakeCloud::new();
        cloud.put_stack("web", "UPDATE_IN_PROGRESS");
        cloud.fail_describes(AwsError::Sdk {
            code: Some("AccessDenied".into()),
            message: "not allowed".into(),
        });
        let err = await_terminal(&cloud, "web", TICK, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Remote { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_wait() {
        let cloud = FakeCloud::new();
        cloud.put_stack("web", "UPDATE_IN_PROGRESS");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            trigger.cancel();
        });

        let err = await_terminal(&cloud, "web", Duration::from_secs(60), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
