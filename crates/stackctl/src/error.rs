//! Engine error kinds
//!
//! Remote terminal failures of a *changeset* are returned as normal results
//! (see [`crate::model::ChangesetResult`]); everything here ends the
//! operation for the affected stack.

use stackctl_common::StackStatus;
use thiserror::Error;

use crate::aws::AwsError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad profile or region, missing credentials, unreadable input
    #[error("configuration error: {0}")]
    Config(String),

    /// The changeset name still collided after the conflict retry budget was spent
    #[error("changeset {name} on stack {stack} still exists after {attempts} create attempts")]
    ChangesetConflict {
        stack: String,
        name: String,
        attempts: u32,
    },

    /// The stack settled in a failure or rollback state
    #[error("stack {stack} ended in {status}{}", reason_suffix(.reason))]
    TerminalFailure {
        stack: String,
        status: StackStatus,
        reason: Option<String>,
    },

    /// A describe call did not resolve to exactly one stack
    #[error("expected exactly one stack matching {stack}, found {matches}")]
    Ambiguous { stack: String, matches: usize },

    /// The operator or a deadline cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    #[error("{context}")]
    Remote {
        context: String,
        #[source]
        source: AwsError,
    },

    /// Oversized template could not be moved to object storage
    #[error("unable to stage template in s3://{bucket}/{key}")]
    Staging {
        bucket: String,
        key: String,
        #[source]
        source: AwsError,
    },
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|r| format!(": {r}"))
        .unwrap_or_default()
}

impl EngineError {
    pub fn remote(context: impl Into<String>, source: AwsError) -> Self {
        EngineError::Remote {
            context: context.into(),
            source,
        }
    }

    /// Cancellation is an outcome, not a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }

    /// The classified remote error behind this one, if any
    pub fn aws_error(&self) -> Option<&AwsError> {
        match self {
            EngineError::Remote { source, .. } | EngineError::Staging { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}
