//! Domain types shared by the engine, the AWS adapters and the CLI

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stackctl_common::defaults::STACK_DOES_NOT_EXIST;
use stackctl_common::{ChangesetStatus, StackStatus};

/// Which kind of changeset to create
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangesetType {
    Create,
    Update,
    /// Resolve to `Create` or `Update` by probing the stack
    #[default]
    Guess,
}

/// Where the template comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    Body(String),
    Url(String),
}

impl TemplateSource {
    pub fn body(&self) -> Option<&str> {
        match self {
            TemplateSource::Body(b) => Some(b),
            TemplateSource::Url(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Parameter {
    pub key: String,
    pub value: Option<String>,
    pub use_previous_value: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

/// The declared desired state of one stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangesetRequest {
    pub stack_name: String,
    pub template: TemplateSource,
    pub parameters: Vec<Parameter>,
    pub capabilities: Vec<String>,
    pub changeset_type: ChangesetType,
    pub changeset_name: Option<String>,
    pub description: Option<String>,
    pub role_arn: Option<String>,
    pub tags: Vec<Tag>,
    /// Empty means the default credential chain
    pub profile: String,
    /// Empty defers to the profile's configured region
    pub region: String,
    pub staging_bucket: Option<String>,
}

impl ChangesetRequest {
    pub fn new(stack_name: impl Into<String>, template: TemplateSource) -> Self {
        Self {
            stack_name: stack_name.into(),
            template,
            parameters: Vec::new(),
            capabilities: Vec::new(),
            changeset_type: ChangesetType::Guess,
            changeset_name: None,
            description: None,
            role_arn: None,
            tags: Vec::new(),
            profile: String::new(),
            region: String::new(),
            staging_bucket: None,
        }
    }
}

/// Fully resolved input of one create-changeset call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateChangesetInput {
    pub stack_name: String,
    pub changeset_name: String,
    pub changeset_type: ChangesetType,
    pub template: TemplateSource,
    pub parameters: Vec<Parameter>,
    pub capabilities: Vec<String>,
    pub description: Option<String>,
    pub role_arn: Option<String>,
    pub tags: Vec<Tag>,
    pub client_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedChangeset {
    pub id: String,
    pub stack_id: String,
}

/// One line of a changeset diff
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceChange {
    pub action: String,
    pub logical_resource_id: String,
    pub physical_resource_id: Option<String>,
    pub resource_type: Option<String>,
    pub replacement: Option<String>,
}

impl ResourceChange {
    /// Physical id when the resource already exists, logical id otherwise
    pub fn display_id(&self) -> &str {
        self.physical_resource_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.logical_resource_id)
    }
}

/// A parameter as the remote API resolved it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedParameter {
    pub key: String,
    pub value: String,
}

/// Raw describe-changeset response
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChangesetDescription {
    pub id: String,
    pub name: String,
    pub stack_id: String,
    pub stack_name: String,
    pub status: String,
    pub status_reason: Option<String>,
    pub description: Option<String>,
    pub changes: Vec<ResourceChange>,
    pub parameters: Vec<ResolvedParameter>,
}

/// A changeset that reached a terminal status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangesetResult {
    pub id: String,
    pub name: String,
    pub stack_id: String,
    pub stack_name: String,
    /// The type actually sent, after `GUESS` resolution
    pub changeset_type: ChangesetType,
    pub status: ChangesetStatus,
    pub status_reason: Option<String>,
    pub description: Option<String>,
    pub changes: Vec<ResourceChange>,
    pub parameters: Vec<ResolvedParameter>,
    /// Session key the changeset was created through, as requested
    #[serde(skip)]
    pub profile: String,
    #[serde(skip)]
    pub region: String,
}

const NO_CHANGE_REASONS: &[&str] = &[
    "didn't contain changes",
    "No updates are to be performed",
];

impl ChangesetResult {
    /// Ready to execute
    pub fn is_ready(&self) -> bool {
        self.status == ChangesetStatus::CreateComplete
    }

    /// The changeset failed only because it would change nothing
    pub fn is_no_op(&self) -> bool {
        match (self.status, self.status_reason.as_deref()) {
            (ChangesetStatus::CreateComplete, _) => self.changes.is_empty(),
            (ChangesetStatus::Failed, Some(reason)) => {
                NO_CHANGE_REASONS.iter().any(|r| reason.contains(r))
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackOutput {
    pub key: String,
    pub value: String,
    pub description: Option<String>,
}

/// Point-in-time description of a stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackSnapshot {
    pub stack_name: String,
    pub stack_id: Option<String>,
    /// Raw status, or [`STACK_DOES_NOT_EXIST`] for an absent stack
    pub status: String,
    pub status_reason: Option<String>,
    pub description: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
    pub outputs: Vec<StackOutput>,
}

impl StackSnapshot {
    pub fn absent(stack_name: impl Into<String>) -> Self {
        Self {
            stack_name: stack_name.into(),
            stack_id: None,
            status: STACK_DOES_NOT_EXIST.to_string(),
            status_reason: None,
            description: None,
            last_updated: None,
            outputs: Vec::new(),
        }
    }

    pub fn exists(&self) -> bool {
        self.status != STACK_DOES_NOT_EXIST
    }

    /// Typed status; `None` when absent or unknown to this build
    pub fn stack_status(&self) -> Option<StackStatus> {
        StackStatus::parse(&self.status)
    }

    /// Whether an `UPDATE` changeset can target this stack
    pub fn is_updatable(&self) -> bool {
        self.exists()
            && !self
                .stack_status()
                .is_some_and(StackStatus::is_review_placeholder)
    }
}

/// One stack state-transition record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackEvent {
    pub event_id: String,
    pub stack_id: String,
    pub stack_name: String,
    pub logical_resource_id: String,
    pub physical_resource_id: Option<String>,
    pub resource_type: String,
    pub resource_status: String,
    pub status_reason: Option<String>,
    pub client_request_token: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// One newest-first page of stack events
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StackEventsPage {
    pub events: Vec<StackEvent>,
    pub next_token: Option<String>,
}
