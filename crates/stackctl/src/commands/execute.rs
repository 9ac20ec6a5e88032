//! `execute`: create a changeset, confirm it and apply it
//!
//! Stack events are printed as they arrive until the stack settles. An
//! interrupt during execution cancels the stack update.

use std::future::Future;
use std::io::Write;

use anyhow::{Context, Result, bail};
use comfy_table::Cell;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;

use super::{CommandContext, HumanReadable, Message, confirm, display, new_table};
use crate::model::{ChangesetResult, ChangesetType, StackEvent};
use crate::stack::PipelineOutcome;

pub const CONFIRM_PROMPT: &str = "Execute this cloudformation";
const CONFIRM_TRIES: u32 = 3;
const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct ExecuteArgs {
    pub template: String,
    pub params: String,
    /// Skip the confirmation prompt
    pub auto_confirm: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedChange {
    pub action: String,
    pub resource: String,
    pub resource_type: String,
    pub replacement: String,
}

/// What executing the changeset would do
#[derive(Debug, Clone, Serialize)]
pub struct ChangesetPlan {
    pub stack_name: String,
    pub changeset_name: String,
    pub changeset_id: String,
    pub changeset_type: ChangesetType,
    pub changes: Vec<PlannedChange>,
}

impl From<&ChangesetResult> for ChangesetPlan {
    fn from(result: &ChangesetResult) -> Self {
        Self {
            stack_name: result.stack_name.clone(),
            changeset_name: result.name.clone(),
            changeset_id: result.id.clone(),
            changeset_type: result.changeset_type,
            changes: result
                .changes
                .iter()
                .map(|c| PlannedChange {
                    action: c.action.clone(),
                    resource: c.display_id().to_string(),
                    resource_type: c.resource_type.clone().unwrap_or_default(),
                    replacement: c.replacement.clone().unwrap_or_default(),
                })
                .collect(),
        }
    }
}

impl HumanReadable for ChangesetPlan {
    fn write_human(&self, out: &mut dyn Write) -> Result<()> {
        writeln!(
            out,
            "Changeset {} ({}) for stack {}",
            self.changeset_name, self.changeset_type, self.stack_name
        )?;
        if self.changes.is_empty() {
            return Ok(());
        }
        let mut table = new_table(["Action", "Resource", "Type", "Replacement"]);
        for change in &self.changes {
            table.add_row(vec![
                Cell::new(&change.action),
                Cell::new(&change.resource),
                Cell::new(&change.resource_type),
                Cell::new(&change.replacement),
            ]);
        }
        writeln!(out, "{table}")?;
        Ok(())
    }
}

/// A stack event as printed during execution
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventLine {
    #[serde(rename = "LogicalResourceID", skip_serializing_if = "String::is_empty")]
    pub logical_resource_id: String,
    #[serde(rename = "PhysicalResourceID", skip_serializing_if = "String::is_empty")]
    pub physical_resource_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub resource_status: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub resource_status_reason: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub resource_type: String,
}

impl From<&StackEvent> for EventLine {
    fn from(event: &StackEvent) -> Self {
        Self {
            logical_resource_id: event.logical_resource_id.clone(),
            physical_resource_id: event.physical_resource_id.clone().unwrap_or_default(),
            resource_status: event.resource_status.clone(),
            resource_status_reason: event.status_reason.clone().unwrap_or_default(),
            resource_type: event.resource_type.clone(),
        }
    }
}

impl HumanReadable for EventLine {
    fn write_human(&self, out: &mut dyn Write) -> Result<()> {
        let mut table = new_table([
            "LogicalResourceID",
            "PhysicalResourceID",
            "ResourceStatus",
            "ResourceStatusReason",
            "ResourceType",
        ]);
        table.add_row(vec![
            Cell::new(&self.logical_resource_id),
            Cell::new(&self.physical_resource_id),
            Cell::new(&self.resource_status),
            Cell::new(&self.resource_status_reason),
            Cell::new(&self.resource_type),
        ]);
        writeln!(out, "{table}")?;
        Ok(())
    }
}

/// Run `execute` against the terminal: confirmation reads stdin and
/// Ctrl-C cancels the stack update.
pub async fn run(ctx: &CommandContext, args: &ExecuteArgs, out: &mut dyn Write) -> Result<()> {
    let approve = |out: &mut dyn Write| {
        tokio::task::block_in_place(|| {
            confirm(&mut std::io::stdin().lock(), out, CONFIRM_PROMPT, CONFIRM_TRIES)
        })
    };
    let interrupt = async {
        // Without a signal handler the update can only end on its own
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    execute(ctx, args, out, approve, interrupt).await
}

/// `execute` with the operator's approval and interrupt supplied by the caller
pub async fn execute<A, I>(
    ctx: &CommandContext,
    args: &ExecuteArgs,
    out: &mut dyn Write,
    approve: A,
    interrupt: I,
) -> Result<()>
where
    A: FnOnce(&mut dyn Write) -> bool,
    I: Future<Output = ()>,
{
    let json = ctx.config.json();
    ctx.finder.validate_parameters(&args.template, &args.params)?;
    let request = ctx.load_request(&args.template, &args.params)?;

    let result = ctx
        .engine
        .request_changeset(&request, &ctx.cancel)
        .await
        .with_context(|| format!("unable to create changeset for stack {}", request.stack_name))?;

    if !result.is_ready() && !result.is_no_op() {
        bail!(
            "unable to apply changeset {} to stack {}: status {}{}",
            result.name,
            result.stack_name,
            result.status,
            result
                .status_reason
                .as_deref()
                .map(|r| format!(": {r}"))
                .unwrap_or_default()
        );
    }

    display(out, json, &ChangesetPlan::from(&result))?;
    if result.is_no_op() {
        return display(out, json, &Message("no changes".to_string()));
    }

    if !args.auto_confirm && !approve(&mut *out) {
        info!(stack = %result.stack_name, "Execution declined");
        return Ok(());
    }

    let (tx, mut rx) = mpsc::channel::<StackEvent>(EVENT_BUFFER);
    let pipeline = ctx.engine.execute_approved(&result, tx, interrupt, &ctx.cancel);
    let printer = async {
        while let Some(event) = rx.recv().await {
            display(&mut *out, json, &EventLine::from(&event))?;
        }
        Ok::<_, anyhow::Error>(())
    };
    let (outcome, printed) = tokio::join!(pipeline, printer);
    printed.context("Failed to print stack events")?;

    match outcome.with_context(|| format!("unable to execute changeset for stack {}", result.stack_name))? {
        PipelineOutcome::Converged(status) => display(
            out,
            json,
            &Message(format!("stack {} reached {status}", result.stack_name)),
        ),
        PipelineOutcome::Cancelled => bail!("execution of stack {} was cancelled", result.stack_name),
    }
}
