//! Stack and changeset status codes
//!
//! The remote API reports statuses as strings. These closed enumerations give
//! every known value a variant and an explicit classification so poll loops
//! can decide when to stop without string-set lookups.

use serde::Serialize;

/// Where a stack status sits relative to the end of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum StatusOutcome {
    /// Keep polling
    Continue,
    /// Operation converged
    Success,
    /// Operation ended in a failure or rollback
    Failure,
}

/// Every status a stack can report
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StackStatus {
    CreateInProgress,
    CreateFailed,
    CreateComplete,
    RollbackInProgress,
    RollbackFailed,
    RollbackComplete,
    DeleteInProgress,
    DeleteFailed,
    DeleteComplete,
    UpdateInProgress,
    UpdateCompleteCleanupInProgress,
    UpdateComplete,
    UpdateFailed,
    UpdateRollbackInProgress,
    UpdateRollbackFailed,
    UpdateRollbackCompleteCleanupInProgress,
    UpdateRollbackComplete,
    ReviewInProgress,
    ImportInProgress,
    ImportComplete,
    ImportRollbackInProgress,
    ImportRollbackFailed,
    ImportRollbackComplete,
}

impl StackStatus {
    /// Parse from string, returning None for unknown values
    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }

    pub fn outcome(self) -> StatusOutcome {
        use StackStatus::*;
        match self {
            CreateComplete | DeleteComplete | UpdateComplete => StatusOutcome::Success,
            CreateFailed
            | DeleteFailed
            | RollbackFailed
            | RollbackComplete
            | UpdateRollbackFailed
            | UpdateRollbackComplete => StatusOutcome::Failure,
            CreateInProgress
            | RollbackInProgress
            | DeleteInProgress
            | UpdateInProgress
            | UpdateCompleteCleanupInProgress
            | UpdateFailed
            | UpdateRollbackInProgress
            | UpdateRollbackCompleteCleanupInProgress
            | ReviewInProgress
            | ImportInProgress
            | ImportComplete
            | ImportRollbackInProgress
            | ImportRollbackFailed
            | ImportRollbackComplete => StatusOutcome::Continue,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.outcome() != StatusOutcome::Continue
    }

    /// A stack in this state exists only as a placeholder for a pending
    /// create changeset
    pub fn is_review_placeholder(self) -> bool {
        self == Self::ReviewInProgress
    }
}

/// Classify a raw status string. Unknown values keep the poller waiting.
pub fn classify_stack_status(status: &str) -> StatusOutcome {
    StackStatus::parse(status)
        .map(StackStatus::outcome)
        .unwrap_or(StatusOutcome::Continue)
}

/// Every status a changeset can report
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangesetStatus {
    CreatePending,
    CreateInProgress,
    CreateComplete,
    DeletePending,
    DeleteInProgress,
    DeleteComplete,
    DeleteFailed,
    Failed,
}

impl ChangesetStatus {
    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }

    /// No further transitions happen without new operator action
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::CreateComplete | Self::Failed | Self::DeleteComplete
        )
    }
}
