//! CloudFormation stack and changeset operations

use async_trait::async_trait;
use aws_sdk_cloudformation::Client;
use aws_sdk_cloudformation::types::{Capability, ChangeSetType as SdkChangesetType};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::aws::context::AwsContext;
use crate::aws::error::{AwsError, from_sdk_error};
use crate::model::{
    ChangesetDescription, ChangesetType, CreateChangesetInput, CreatedChangeset,
    ResolvedParameter, ResourceChange, StackEvent, StackEventsPage, StackOutput, StackSnapshot,
    TemplateSource,
};

/// Trait for CloudFormation operations that can be mocked in tests.
///
/// Every mutating call that accepts a client request token takes it
/// explicitly so callers decide which token a request carries.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CloudFormationOperations: Send + Sync {
    /// Describe stacks matching a name or id.
    ///
    /// A stack that does not exist surfaces as [`AwsError::NotFound`].
    async fn describe_stacks(&self, stack: &str) -> Result<Vec<StackSnapshot>, AwsError>;

    async fn create_change_set(
        &self,
        input: CreateChangesetInput,
    ) -> Result<CreatedChangeset, AwsError>;

    /// Delete a changeset by ARN, or by name within `stack`
    async fn delete_change_set(
        &self,
        change_set: &str,
        stack: Option<String>,
    ) -> Result<(), AwsError>;

    /// Describe a changeset, including every page of its change list
    async fn describe_change_set(
        &self,
        change_set: &str,
    ) -> Result<ChangesetDescription, AwsError>;

    async fn execute_change_set(
        &self,
        change_set: &str,
        client_token: &str,
    ) -> Result<(), AwsError>;

    async fn cancel_update_stack(&self, stack: &str) -> Result<(), AwsError>;

    async fn delete_stack(&self, stack: &str, client_token: &str) -> Result<(), AwsError>;

    /// Fetch one page of stack events, most recent first
    async fn describe_stack_events(
        &self,
        stack: &str,
        next_token: Option<String>,
    ) -> Result<StackEventsPage, AwsError>;
}

/// CloudFormation client backed by the AWS SDK
#[derive(Clone, Debug)]
pub struct CloudFormationClient {
    client: Client,
}

impl CloudFormationClient {
    /// Create a CloudFormation client from a pre-loaded AWS context
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.cloudformation_client(),
        }
    }
}

fn to_chrono(ts: &aws_sdk_cloudformation::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts.secs(), ts.subsec_nanos())
}

fn missing(what: &str) -> AwsError {
    AwsError::Sdk {
        code: None,
        message: format!("No {what} in response"),
    }
}

fn to_snapshot(stack: &aws_sdk_cloudformation::types::Stack) -> StackSnapshot {
    StackSnapshot {
        stack_name: stack.stack_name().unwrap_or_default().to_string(),
        stack_id: stack.stack_id().map(String::from),
        status: stack
            .stack_status()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default(),
        status_reason: stack.stack_status_reason().map(String::from),
        description: stack.description().map(String::from),
        last_updated: stack
            .last_updated_time()
            .and_then(to_chrono)
            .or_else(|| stack.creation_time().and_then(to_chrono)),
        outputs: stack
            .outputs()
            .iter()
            .map(|o| StackOutput {
                key: o.output_key().unwrap_or_default().to_string(),
                value: o.output_value().unwrap_or_default().to_string(),
                description: o.description().map(String::from),
            })
            .collect(),
    }
}

/// Events without an id cannot be tracked by the stream watermark
fn to_event(event: &aws_sdk_cloudformation::types::StackEvent) -> Result<StackEvent, AwsError> {
    let event_id = event
        .event_id()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| missing("stack event ID"))?;
    Ok(StackEvent {
        event_id: event_id.to_string(),
        stack_id: event.stack_id().unwrap_or_default().to_string(),
        stack_name: event.stack_name().unwrap_or_default().to_string(),
        logical_resource_id: event.logical_resource_id().unwrap_or_default().to_string(),
        physical_resource_id: event.physical_resource_id().map(String::from),
        resource_type: event.resource_type().unwrap_or_default().to_string(),
        resource_status: event
            .resource_status()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default(),
        status_reason: event.resource_status_reason().map(String::from),
        client_request_token: event.client_request_token().map(String::from),
        timestamp: event.timestamp().and_then(to_chrono),
    })
}

fn to_change(change: &aws_sdk_cloudformation::types::Change) -> Option<ResourceChange> {
    let rc = change.resource_change()?;
    Some(ResourceChange {
        action: rc
            .action()
            .map(|a| a.as_str().to_string())
            .unwrap_or_default(),
        logical_resource_id: rc.logical_resource_id().unwrap_or_default().to_string(),
        physical_resource_id: rc.physical_resource_id().map(String::from),
        resource_type: rc.resource_type().map(String::from),
        replacement: rc.replacement().map(|r| r.as_str().to_string()),
    })
}

fn to_sdk_changeset_type(t: ChangesetType) -> Option<SdkChangesetType> {
    match t {
        ChangesetType::Create => Some(SdkChangesetType::Create),
        ChangesetType::Update => Some(SdkChangesetType::Update),
        // Unresolved hint: let the service apply its own default
        ChangesetType::Guess => None,
    }
}

#[async_trait]
impl CloudFormationOperations for CloudFormationClient {
    async fn describe_stacks(&self, stack: &str) -> Result<Vec<StackSnapshot>, AwsError> {
        let out = self
            .client
            .describe_stacks()
            .stack_name(stack)
            .send()
            .await
            .map_err(|e| from_sdk_error(&e))?;
        Ok(out.stacks().iter().map(to_snapshot).collect())
    }

    async fn create_change_set(
        &self,
        input: CreateChangesetInput,
    ) -> Result<CreatedChangeset, AwsError> {
        debug!(
            stack = %input.stack_name,
            changeset = %input.changeset_name,
            changeset_type = %input.changeset_type,
            "Creating changeset"
        );

        let parameters = input
            .parameters
            .iter()
            .map(|p| {
                aws_sdk_cloudformation::types::Parameter::builder()
                    .parameter_key(&p.key)
                    .set_parameter_value(p.value.clone())
                    .use_previous_value(p.use_previous_value)
                    .build()
            })
            .collect::<Vec<_>>();

        let tags = input
            .tags
            .iter()
            .map(|t| {
                aws_sdk_cloudformation::types::Tag::builder()
                    .key(&t.key)
                    .value(&t.value)
                    .build()
            })
            .collect::<Vec<_>>();

        let capabilities = input
            .capabilities
            .iter()
            .map(|c| Capability::from(c.as_str()))
            .collect::<Vec<_>>();

        let mut request = self
            .client
            .create_change_set()
            .stack_name(&input.stack_name)
            .change_set_name(&input.changeset_name)
            .set_change_set_type(to_sdk_changeset_type(input.changeset_type))
            .set_parameters(Some(parameters))
            .set_capabilities(Some(capabilities))
            .set_description(input.description.clone())
            .set_role_arn(input.role_arn.clone())
            .client_token(&input.client_token);
        if !tags.is_empty() {
            request = request.set_tags(Some(tags));
        }
        request = match &input.template {
            TemplateSource::Body(body) => request.template_body(body),
            TemplateSource::Url(url) => request.template_url(url),
        };

        let out = request.send().await.map_err(|e| from_sdk_error(&e))?;
        let id = out
            .id()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| missing("changeset ID"))?;
        Ok(CreatedChangeset {
            id: id.to_string(),
            stack_id: out.stack_id().unwrap_or_default().to_string(),
        })
    }

    async fn delete_change_set(
        &self,
        change_set: &str,
        stack: Option<String>,
    ) -> Result<(), AwsError> {
        debug!(changeset = %change_set, stack = ?stack, "Deleting changeset");
        self.client
            .delete_change_set()
            .change_set_name(change_set)
            .set_stack_name(stack)
            .send()
            .await
            .map_err(|e| from_sdk_error(&e))?;
        Ok(())
    }

    async fn describe_change_set(
        &self,
        change_set: &str,
    ) -> Result<ChangesetDescription, AwsError> {
        let mut description = ChangesetDescription::default();
        let mut next_token: Option<String> = None;

        loop {
            let out = self
                .client
                .describe_change_set()
                .change_set_name(change_set)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| from_sdk_error(&e))?;

            if description.id.is_empty() {
                description.id = out.change_set_id().unwrap_or(change_set).to_string();
                description.name = out.change_set_name().unwrap_or_default().to_string();
                description.stack_id = out.stack_id().unwrap_or_default().to_string();
                description.stack_name = out.stack_name().unwrap_or_default().to_string();
                description.status_reason = out.status_reason().map(String::from);
                description.description = out.description().map(String::from);
                description.parameters = out
                    .parameters()
                    .iter()
                    .map(|p| ResolvedParameter {
                        key: p.parameter_key().unwrap_or_default().to_string(),
                        value: p
                            .resolved_value()
                            .filter(|v| !v.is_empty())
                            .or(p.parameter_value())
                            .unwrap_or_default()
                            .to_string(),
                    })
                    .collect();
            }
            // Status can move between pages; keep the latest
            description.status = out
                .status()
                .map(|s| s.as_str().to_string())
                .unwrap_or_default();
            description
                .changes
                .extend(out.changes().iter().filter_map(to_change));

            match out.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        Ok(description)
    }

    async fn execute_change_set(
        &self,
        change_set: &str,
        client_token: &str,
    ) -> Result<(), AwsError> {
        debug!(changeset = %change_set, "Executing changeset");
        self.client
            .execute_change_set()
            .change_set_name(change_set)
            .client_request_token(client_token)
            .send()
            .await
            .map_err(|e| from_sdk_error(&e))?;
        Ok(())
    }

    async fn cancel_update_stack(&self, stack: &str) -> Result<(), AwsError> {
        debug!(stack = %stack, "Cancelling stack update");
        self.client
            .cancel_update_stack()
            .stack_name(stack)
            .send()
            .await
            .map_err(|e| from_sdk_error(&e))?;
        Ok(())
    }

    async fn delete_stack(&self, stack: &str, client_token: &str) -> Result<(), AwsError> {
        debug!(stack = %stack, "Deleting stack");
        self.client
            .delete_stack()
            .stack_name(stack)
            .client_request_token(client_token)
            .send()
            .await
            .map_err(|e| from_sdk_error(&e))?;
        Ok(())
    }

    async fn describe_stack_events(
        &self,
        stack: &str,
        next_token: Option<String>,
    ) -> Result<StackEventsPage, AwsError> {
        let out = self
            .client
            .describe_stack_events()
            .stack_name(stack)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| from_sdk_error(&e))?;

        Ok(StackEventsPage {
            events: out
                .stack_events()
                .iter()
                .map(to_event)
                .collect::<Result<_, _>>()?,
            next_token: out
                .next_token()
                .filter(|t| !t.is_empty())
                .map(String::from),
        })
    }
}
