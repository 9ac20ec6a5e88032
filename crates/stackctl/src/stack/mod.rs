//! Stack and changeset lifecycle
//!
//! - [`changeset`]: create a changeset and wait for it to settle
//! - [`poller`]: wait for a stack to reach a terminal status
//! - [`streamer`]: tail a stack's event history
//! - [`pipeline`]: execute an approved changeset and observe it to completion

pub mod changeset;
pub mod pipeline;
pub mod poller;
pub mod streamer;

pub use changeset::{ChangesetManager, ChangesetOptions, sanitize_bucket_name};
pub use pipeline::{PipelineOptions, PipelineOutcome, execute_approved};
pub use poller::await_terminal;
pub use streamer::{EventStreamer, StreamerHandle, collect_new_events};

use crate::aws::CloudFormationOperations;
use crate::error::EngineError;
use crate::model::StackSnapshot;

/// Describe one stack, mapping a missing stack to [`StackSnapshot::absent`]
pub async fn describe_snapshot(
    cf: &dyn CloudFormationOperations,
    stack_name: &str,
) -> Result<StackSnapshot, EngineError> {
    match cf.describe_stacks(stack_name).await {
        Ok(mut stacks) if stacks.len() <= 1 => Ok(stacks
            .pop()
            .unwrap_or_else(|| StackSnapshot::absent(stack_name))),
        Ok(stacks) => Err(EngineError::Ambiguous {
            stack: stack_name.to_string(),
            matches: stacks.len(),
        }),
        Err(e) if e.is_not_found() => Ok(StackSnapshot::absent(stack_name)),
        Err(e) => Err(EngineError::remote(
            format!("unable to describe stack {stack_name}"),
            e,
        )),
    }
}
