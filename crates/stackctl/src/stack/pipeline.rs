//! Execute an approved changeset and follow the stack to a terminal status
//!
//! After the execute call three activities share one cancellation scope:
//! the event streamer, the terminal-status poller and a watcher for the
//! operator's interrupt. An interrupt or a failure cancels the scope so the
//! others wind down. When the poller sees the stack settle, the streamer
//! makes one final fetch before it stops.

use std::future::Future;
use std::time::Duration;

use stackctl_common::defaults::DEFAULT_STACK_POLL_INTERVAL;
use stackctl_common::{AimdConfig, StackStatus};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aws::ClientBundle;
use crate::error::EngineError;
use crate::model::{ChangesetResult, StackEvent};
use crate::stack::poller::await_terminal;
use crate::stack::streamer::EventStreamer;
use crate::wait::{cancellable, retry_throttled};

/// Status of the synthetic event emitted when the operator interrupts
pub const SIGNAL_CAUGHT: &str = "SIGNAL_CAUGHT";

/// Upper bound on each call the interrupt watcher makes
const INTERRUPT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    /// Fixed interval of the terminal-status poller
    pub stack_poll_interval: Duration,
    /// Poll interval policy of the event streamer
    pub events: AimdConfig,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            stack_poll_interval: DEFAULT_STACK_POLL_INTERVAL,
            events: AimdConfig::default(),
        }
    }
}

/// How an execution ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// The stack reached a successful terminal status
    Converged(StackStatus),
    /// The operator or a deadline cut the observation short
    Cancelled,
}

/// Execute `result` and observe the stack until it settles.
///
/// Events are forwarded to `sink` as they appear. When `interrupt` resolves
/// first, a [`SIGNAL_CAUGHT`] event is sent, the stack update is cancelled
/// and the outcome is [`PipelineOutcome::Cancelled`]. A stack that rolls
/// back is an [`EngineError::TerminalFailure`].
pub async fn execute_approved<I>(
    bundle: &ClientBundle,
    result: &ChangesetResult,
    sink: mpsc::Sender<StackEvent>,
    interrupt: I,
    options: PipelineOptions,
    cancel: &CancellationToken,
) -> Result<PipelineOutcome, EngineError>
where
    I: Future<Output = ()>,
{
    let cf = bundle.cloudformation();
    let stack_id = result.stack_id.as_str();

    info!(stack = %result.stack_name, changeset = %result.id, "Executing changeset");
    let executed = retry_throttled("execute_change_set", cancel, || {
        cf.execute_change_set(&result.id, bundle.token())
    })
    .await;
    match executed {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            return Err(EngineError::remote(
                format!("unable to execute changeset {}", result.id),
                e,
            ));
        }
        Err(e) if e.is_cancelled() => return Ok(PipelineOutcome::Cancelled),
        Err(e) => return Err(e),
    }

    let scope = cancel.child_token();
    let settled = scope.child_token();
    let streamer = EventStreamer::new(options.events);

    let stream = async {
        let streamed = streamer.stream(bundle, stack_id, sink.clone(), &scope).await;
        if streamed.is_err() {
            scope.cancel();
        }
        streamed
    };

    let poll = async {
        let polled = await_terminal(cf.as_ref(), stack_id, options.stack_poll_interval, &scope).await;
        if polled.is_ok() {
            streamer.finish();
        } else {
            scope.cancel();
        }
        settled.cancel();
        polled
    };

    let watch = async {
        tokio::select! {
            biased;
            _ = settled.cancelled() => false,
            _ = interrupt => {
                warn!(stack = %result.stack_name, "Interrupt received, cancelling stack update");
                let sent = cancellable(
                    cancel,
                    sink.send_timeout(signal_caught_event(result), INTERRUPT_CALL_TIMEOUT),
                )
                .await;
                if !matches!(sent, Ok(Ok(()))) {
                    debug!("Interrupt event not delivered");
                }
                // Cancels must not reuse the execute request's token
                let requested = tokio::time::timeout(
                    INTERRUPT_CALL_TIMEOUT,
                    retry_throttled("cancel_update_stack", cancel, || {
                        cf.cancel_update_stack(stack_id)
                    }),
                )
                .await;
                match requested {
                    Ok(Ok(Ok(()))) => {
                        info!(stack = %result.stack_name, "Stack update cancel requested");
                    }
                    Ok(Ok(Err(e))) => warn!(
                        stack = %result.stack_name,
                        error = %e,
                        "Unable to cancel stack update"
                    ),
                    Ok(Err(_)) | Err(_) => warn!(
                        stack = %result.stack_name,
                        "Gave up waiting for the stack update cancel request"
                    ),
                }
                scope.cancel();
                true
            }
        }
    };

    let (streamed, polled, interrupted) = tokio::join!(stream, poll, watch);

    if interrupted {
        return Ok(PipelineOutcome::Cancelled);
    }
    match polled {
        Ok(status) => {
            if let Err(e) = streamed {
                warn!(stack = %result.stack_name, error = %e, "Event stream ended with an error");
            }
            info!(stack = %result.stack_name, status = %status, "Stack converged");
            Ok(PipelineOutcome::Converged(status))
        }
        Err(e) if e.is_cancelled() => match streamed {
            Err(stream_err) => Err(stream_err),
            Ok(()) => Ok(PipelineOutcome::Cancelled),
        },
        Err(e) => Err(e),
    }
}

fn signal_caught_event(result: &ChangesetResult) -> StackEvent {
    StackEvent {
        event_id: format!("signal-caught-{}", uuid::Uuid::new_v4()),
        stack_id: result.stack_id.clone(),
        stack_name: result.stack_name.clone(),
        logical_resource_id: result.stack_name.clone(),
        physical_resource_id: Some(result.stack_id.clone()),
        resource_type: "AWS::CloudFormation::Stack".to_string(),
        resource_status: SIGNAL_CAUGHT.to_string(),
        status_reason: Some("interrupt received; cancelling stack update".to_string()),
        client_request_token: None,
        timestamp: Some(chrono::Utc::now()),
    }
}
