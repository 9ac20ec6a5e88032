//! `status`: every stack under the template directory at a glance

use std::io::Write;

use anyhow::{Context, Result};
use comfy_table::Cell;
use futures::future::{join_all, try_join_all};
use serde::Serialize;
use tracing::{info, warn};

use super::{CommandContext, HumanReadable, display, new_table};
use crate::engine::StackStatusReport;

const COLUMNS: [&str; 10] = [
    "Template",
    "File name",
    "Stack Name",
    "Status",
    "Account ID",
    "Region",
    "Pending Changes",
    "Description",
    "Changeset status",
    "Last Updated",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct StatusArgs {
    /// Abort on the first stack that cannot be inspected
    pub fail_fast: bool,
}

/// One line of the status table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusRow {
    pub template: String,
    pub file_name: String,
    pub stack_name: String,
    pub stack_status: String,
    pub account_id: String,
    pub region: String,
    pub pending_changes: Option<usize>,
    pub description: String,
    pub changeset_status: String,
    pub last_updated: String,
}

impl StatusRow {
    pub(crate) fn from_report(template: &str, file_name: String, report: &StackStatusReport) -> Self {
        let snapshot = &report.snapshot;
        let (changeset_status, pending_changes) = match (&report.changeset, &report.changeset_error) {
            (_, Some(error)) => (format!("Unable to apply: {error}"), None),
            (Some(cs), None) if cs.is_ready() => ("Ready to apply".to_string(), Some(cs.changes.len())),
            (Some(cs), None) if cs.is_no_op() => ("No changes".to_string(), Some(0)),
            (Some(cs), None) => (
                format!(
                    "Unable to apply: {}{}",
                    cs.status,
                    cs.status_reason
                        .as_deref()
                        .map(|r| format!(": {r}"))
                        .unwrap_or_default()
                ),
                None,
            ),
            (None, None) => (String::new(), None),
        };
        let description = report
            .changeset
            .as_ref()
            .and_then(|cs| cs.description.clone())
            .or_else(|| snapshot.description.clone())
            .unwrap_or_default();

        Self {
            template: template.to_string(),
            file_name,
            stack_name: snapshot.stack_name.clone(),
            stack_status: snapshot.status.clone(),
            account_id: report.account_id.clone().unwrap_or_default(),
            region: report.region.clone(),
            pending_changes,
            description,
            changeset_status,
            last_updated: snapshot
                .last_updated
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_default(),
        }
    }

    /// A row for a stack that could not be inspected; the error takes the status column
    pub(crate) fn failed(template: &str, file_name: String, stack_name: String, error: String) -> Self {
        Self {
            template: template.to_string(),
            file_name,
            stack_name,
            stack_status: error,
            ..Self::default()
        }
    }

    pub(crate) fn cells(&self) -> Vec<Cell> {
        vec![
            Cell::new(&self.template),
            Cell::new(&self.file_name),
            Cell::new(&self.stack_name),
            Cell::new(&self.stack_status),
            Cell::new(&self.account_id),
            Cell::new(&self.region),
            Cell::new(
                self.pending_changes
                    .map(|n| n.to_string())
                    .unwrap_or_default(),
            ),
            Cell::new(&self.description),
            Cell::new(&self.changeset_status),
            Cell::new(&self.last_updated),
        ]
    }
}

pub(crate) fn write_rows(out: &mut dyn Write, rows: &[StatusRow]) -> Result<()> {
    let mut table = new_table(COLUMNS);
    for row in rows {
        table.add_row(row.cells());
    }
    writeln!(out, "{table}")?;
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct StatusModel {
    pub statuses: Vec<StatusRow>,
}

impl HumanReadable for StatusModel {
    fn write_human(&self, out: &mut dyn Write) -> Result<()> {
        write_rows(out, &self.statuses)
    }
}

pub async fn run(ctx: &CommandContext, args: StatusArgs, out: &mut dyn Write) -> Result<()> {
    let pairs = ctx.finder.pairs()?;
    info!(stacks = pairs.len(), "Inspecting stacks");
    let statuses = collect_rows(ctx, &pairs, args.fail_fast).await?;
    display(out, ctx.config.json(), &StatusModel { statuses })
}

/// Inspect every pair concurrently, keeping the input order
pub async fn collect_rows(
    ctx: &CommandContext,
    pairs: &[(String, String)],
    fail_fast: bool,
) -> Result<Vec<StatusRow>> {
    let rows = pairs
        .iter()
        .map(|(template, params)| status_row(ctx, template, params, fail_fast));
    if fail_fast {
        return try_join_all(rows).await;
    }
    join_all(rows).await.into_iter().collect()
}

/// Build one row. Unless `fail_fast` is set, only cancellation is an error;
/// any other failure is rendered in the row.
pub(crate) async fn status_row(
    ctx: &CommandContext,
    template: &str,
    params: &str,
    fail_fast: bool,
) -> Result<StatusRow> {
    let file_name = ctx
        .finder
        .parameter_path(template, params)
        .display()
        .to_string();

    let request = match ctx.load_request(template, params) {
        Ok(request) => request,
        Err(e) if fail_fast => return Err(e),
        Err(e) => {
            warn!(template = %template, params = %params, error = %e, "Unable to load parameter file");
            return Ok(StatusRow::failed(template, file_name, String::new(), format!("{e:#}")));
        }
    };

    match ctx.engine.inspect_status(&request, &ctx.cancel).await {
        Ok(report) => Ok(StatusRow::from_report(template, file_name, &report)),
        Err(e) if fail_fast || e.is_cancelled() => {
            Err(e).with_context(|| format!("unable to inspect stack {}", request.stack_name))
        }
        Err(e) => {
            warn!(stack = %request.stack_name, error = %e, "Unable to inspect stack");
            let message = format!("{:#}", anyhow::Error::new(e));
            Ok(StatusRow::failed(template, file_name, request.stack_name, message))
        }
    }
}
