//! Changeset creation and the wait for it to settle
//!
//! [`ChangesetManager::create_and_await`] resolves the changeset type, moves
//! oversized templates to S3, creates the changeset (deleting a same-named
//! leftover once if needed) and polls it with AIMD backoff until it reaches
//! `CREATE_COMPLETE`, `FAILED` or `DELETE_COMPLETE`.
//!
//! Every side effect registers a compensating job with the bundle's
//! [`CleanupRegistry`](crate::cleanup::CleanupRegistry) as soon as it happens.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use stackctl_common::defaults::{DEFAULT_CONFLICT_RETRIES, NAME_PREFIX, TEMPLATE_INLINE_LIMIT};
use stackctl_common::{Aimd, AimdConfig, ChangesetStatus, StackStatus};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::aws::{AwsError, ClientBundle};
use crate::error::EngineError;
use crate::model::{
    ChangesetDescription, ChangesetRequest, ChangesetResult, ChangesetType, CreateChangesetInput,
    CreatedChangeset, StackSnapshot, TemplateSource,
};
use crate::stack::describe_snapshot;
use crate::wait::{cancellable, retry_throttled, sleep_or_cancel};

/// Returned when deleting a changeset that was already executed
const INVALID_CHANGESET_STATUS: &str = "InvalidChangeSetStatus";

#[derive(Debug, Clone, Copy)]
pub struct ChangesetOptions {
    /// Delete-and-retry attempts allowed after a name collision
    pub conflict_retries: u32,
    /// Poll interval policy while the changeset is being computed
    pub aimd: AimdConfig,
    /// Inline template bodies at or above this many bytes are staged in S3
    pub inline_limit: usize,
}

impl Default for ChangesetOptions {
    fn default() -> Self {
        Self {
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
            aimd: AimdConfig::default(),
            inline_limit: TEMPLATE_INLINE_LIMIT,
        }
    }
}

/// Creates changesets through one client bundle
pub struct ChangesetManager {
    bundle: Arc<ClientBundle>,
    options: ChangesetOptions,
}

impl ChangesetManager {
    pub fn new(bundle: &Arc<ClientBundle>) -> Self {
        Self {
            bundle: Arc::clone(bundle),
            options: ChangesetOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ChangesetOptions) -> Self {
        self.options = options;
        self
    }

    /// Create a changeset for `request` and wait until it is terminal.
    ///
    /// `current` is the stack as seen before the request; when it is absent
    /// or only a review placeholder, a cleanup job removes the placeholder
    /// stack this changeset leaves behind unless it gets executed.
    ///
    /// A `FAILED` changeset is returned as a normal result.
    pub async fn create_and_await(
        &self,
        request: &ChangesetRequest,
        current: &StackSnapshot,
        cancel: &CancellationToken,
    ) -> Result<ChangesetResult, EngineError> {
        let stack = request.stack_name.as_str();
        let changeset_name = request
            .changeset_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(generate_changeset_name);
        let changeset_type = self.resolve_type(request, cancel).await?;
        let template = self.prepare_template(request, cancel).await?;

        let input = CreateChangesetInput {
            stack_name: request.stack_name.clone(),
            changeset_name,
            changeset_type,
            template,
            parameters: request.parameters.clone(),
            capabilities: request.capabilities.clone(),
            description: request.description.clone(),
            role_arn: request.role_arn.clone(),
            tags: request.tags.clone(),
            client_token: self.bundle.token().to_string(),
        };

        info!(
            stack = %stack,
            changeset = %input.changeset_name,
            changeset_type = %changeset_type,
            "Creating changeset"
        );
        let created = self.create_with_conflict_retry(&input, cancel).await?;

        self.register_changeset_cleanup(&created);
        if !current.is_updatable() {
            self.register_placeholder_cleanup(stack);
        }

        let description = self.await_settled(&created.id, cancel).await?;
        let status = ChangesetStatus::parse(&description.status).unwrap_or(ChangesetStatus::Failed);

        Ok(ChangesetResult {
            id: created.id,
            name: description.name,
            stack_id: if description.stack_id.is_empty() {
                created.stack_id
            } else {
                description.stack_id
            },
            stack_name: request.stack_name.clone(),
            changeset_type,
            status,
            status_reason: description.status_reason,
            description: description.description,
            changes: description.changes,
            parameters: description.parameters,
            profile: request.profile.clone(),
            region: request.region.clone(),
        })
    }

    /// Turn a `GUESS` hint into `CREATE` or `UPDATE`.
    ///
    /// A failed lookup is treated as a missing stack.
    async fn resolve_type(
        &self,
        request: &ChangesetRequest,
        cancel: &CancellationToken,
    ) -> Result<ChangesetType, EngineError> {
        if request.changeset_type != ChangesetType::Guess {
            return Ok(request.changeset_type);
        }

        let cf = self.bundle.cloudformation();
        let lookup = cancellable(cancel, describe_snapshot(cf.as_ref(), &request.stack_name)).await?;
        let resolved = match lookup {
            Ok(snapshot) if snapshot.is_updatable() => ChangesetType::Update,
            Ok(_) => ChangesetType::Create,
            Err(e) => {
                debug!(
                    stack = %request.stack_name,
                    error = %e,
                    "Unable to describe stack, assuming it does not exist"
                );
                ChangesetType::Create
            }
        };
        debug!(stack = %request.stack_name, changeset_type = %resolved, "Resolved changeset type");
        Ok(resolved)
    }

    /// Stage an oversized inline body in S3 and reference it by URL
    async fn prepare_template(
        &self,
        request: &ChangesetRequest,
        cancel: &CancellationToken,
    ) -> Result<TemplateSource, EngineError> {
        let Some(body) = request.template.body() else {
            return Ok(request.template.clone());
        };
        if body.len() < self.options.inline_limit {
            return Ok(request.template.clone());
        }

        info!(
            stack = %request.stack_name,
            size = body.len(),
            "Template body too large to send inline, staging in S3"
        );
        let key = format!(
            "{NAME_PREFIX}/{}/{}.template",
            request.stack_name,
            Utc::now().format("%Y%m%dT%H%M%S%.3fZ")
        );
        let bucket = match request.staging_bucket.as_deref() {
            Some(bucket) if !bucket.is_empty() => bucket.to_string(),
            _ => self.ensure_staging_bucket(&key, cancel).await?,
        };

        let staging = self.bundle.staging();
        let bytes = body.as_bytes().to_vec();
        let url = retry_throttled("put_object", cancel, || {
            staging.put_object(&bucket, &key, bytes.clone())
        })
        .await?
        .map_err(|source| EngineError::Staging {
            bucket: bucket.clone(),
            key: key.clone(),
            source,
        })?;
        info!(url = %url, "Template staged");

        let staging = Arc::clone(staging);
        let description = format!("delete staged template s3://{bucket}/{key}");
        self.bundle.cleanup().register(description, move |cancel| {
            let staging = Arc::clone(&staging);
            let (bucket, key) = (bucket.clone(), key.clone());
            async move {
                debug!(bucket = %bucket, key = %key, "Deleting staged template");
                cancellable(&cancel, staging.delete_object(&bucket, &key))
                    .await?
                    .with_context(|| format!("unable to delete s3://{bucket}/{key}"))
            }
        });

        Ok(TemplateSource::Url(url))
    }

    /// Derive the per-account staging bucket and create it if needed
    async fn ensure_staging_bucket(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<String, EngineError> {
        let account = cancellable(cancel, self.bundle.account_id())
            .await?
            .map_err(|e| EngineError::remote("unable to look up account id", e))?;
        let bucket = sanitize_bucket_name(&format!(
            "{NAME_PREFIX}-{account}-{}",
            self.bundle.region()
        ));

        let staging = self.bundle.staging();
        let created =
            retry_throttled("create_bucket", cancel, || staging.create_bucket(&bucket)).await?;
        match created {
            Ok(()) => info!(bucket = %bucket, "Created staging bucket"),
            Err(e) if e.is_already_exists() => {
                debug!(bucket = %bucket, "Staging bucket already exists");
            }
            Err(source) => {
                return Err(EngineError::Staging {
                    bucket,
                    key: key.to_string(),
                    source,
                });
            }
        }
        Ok(bucket)
    }

    /// Create the changeset, deleting a same-named one and retrying up to
    /// the configured budget.
    async fn create_with_conflict_retry(
        &self,
        input: &CreateChangesetInput,
        cancel: &CancellationToken,
    ) -> Result<CreatedChangeset, EngineError> {
        let cf = self.bundle.cloudformation();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let outcome = retry_throttled("create_change_set", cancel, || {
                cf.create_change_set(input.clone())
            })
            .await?;

            match outcome {
                Ok(created) => {
                    debug!(changeset = %created.id, attempts, "Changeset created");
                    return Ok(created);
                }
                Err(e) if e.is_already_exists() && attempts <= self.options.conflict_retries => {
                    warn!(
                        stack = %input.stack_name,
                        changeset = %input.changeset_name,
                        "Changeset already exists, deleting it and retrying"
                    );
                    retry_throttled("delete_change_set", cancel, || {
                        cf.delete_change_set(&input.changeset_name, Some(input.stack_name.clone()))
                    })
                    .await?
                    .map_err(|e| {
                        EngineError::remote(
                            format!(
                                "unable to delete conflicting changeset {}",
                                input.changeset_name
                            ),
                            e,
                        )
                    })?;
                }
                Err(e) if e.is_already_exists() => {
                    return Err(EngineError::ChangesetConflict {
                        stack: input.stack_name.clone(),
                        name: input.changeset_name.clone(),
                        attempts,
                    });
                }
                Err(e) => {
                    return Err(EngineError::remote(
                        format!("unable to create changeset for stack {}", input.stack_name),
                        e,
                    ));
                }
            }
        }
    }

    fn register_changeset_cleanup(&self, created: &CreatedChangeset) {
        let cf = Arc::clone(self.bundle.cloudformation());
        let id = created.id.clone();
        self.bundle
            .cleanup()
            .register(format!("delete changeset {id}"), move |cancel| {
                let cf = Arc::clone(&cf);
                let id = id.clone();
                async move {
                    match cancellable(&cancel, cf.delete_change_set(&id, None)).await? {
                        Ok(()) => Ok(()),
                        Err(e) if is_gone_or_executed(&e) => {
                            debug!(changeset = %id, "Changeset already consumed");
                            Ok(())
                        }
                        Err(e) => Err(anyhow::Error::new(e)
                            .context(format!("unable to delete changeset {id}"))),
                    }
                }
            });
    }

    /// Remove the `REVIEW_IN_PROGRESS` stack a create changeset leaves
    /// behind when it is never executed
    fn register_placeholder_cleanup(&self, stack: &str) {
        let cf = Arc::clone(self.bundle.cloudformation());
        let token = self.bundle.token().to_string();
        let stack = stack.to_string();
        self.bundle.cleanup().register(
            format!("delete placeholder stack {stack}"),
            move |cancel| {
                let cf = Arc::clone(&cf);
                let (stack, token) = (stack.clone(), token.clone());
                async move {
                    let snapshot = cancellable(&cancel, describe_snapshot(cf.as_ref(), &stack))
                        .await?
                        .with_context(|| format!("unable to describe stack {stack}"))?;
                    if snapshot
                        .stack_status()
                        .is_some_and(StackStatus::is_review_placeholder)
                    {
                        info!(stack = %stack, "Deleting placeholder stack");
                        cancellable(&cancel, cf.delete_stack(&stack, &token))
                            .await?
                            .with_context(|| format!("unable to delete stack {stack}"))?;
                    }
                    Ok(())
                }
            },
        );
    }

    /// Poll the changeset until it is terminal, waiting before every describe
    async fn await_settled(
        &self,
        changeset_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ChangesetDescription, EngineError> {
        let cf = self.bundle.cloudformation();
        let mut backoff = Aimd::new(self.options.aimd);
        let mut last_status = String::new();

        loop {
            sleep_or_cancel(backoff.current(), cancel).await?;

            let description = match cancellable(cancel, cf.describe_change_set(changeset_id)).await?
            {
                Ok(description) => {
                    backoff.on_success();
                    description
                }
                Err(e) if e.is_throttled() => {
                    backoff.on_error();
                    debug!(
                        changeset = %changeset_id,
                        interval = ?backoff.current(),
                        "Changeset describe throttled"
                    );
                    continue;
                }
                Err(e) => {
                    return Err(EngineError::remote(
                        format!("unable to describe changeset {changeset_id}"),
                        e,
                    ));
                }
            };

            if description.status != last_status {
                info!(
                    changeset = %description.name,
                    status = %description.status,
                    reason = description.status_reason.as_deref().unwrap_or_default(),
                    "Changeset status changed"
                );
                last_status.clone_from(&description.status);
            } else {
                trace!(changeset = %description.name, status = %description.status, "Changeset poll");
            }

            if ChangesetStatus::parse(&description.status).is_some_and(ChangesetStatus::is_terminal) {
                return Ok(description);
            }
        }
    }
}

fn is_gone_or_executed(e: &AwsError) -> bool {
    e.is_not_found() || e.code() == Some(INVALID_CHANGESET_STATUS)
}

/// Time-based name: a letter first, then hex nanoseconds
fn generate_changeset_name() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("{NAME_PREFIX}-{nanos:x}")
}

/// Coerce `name` into a valid S3 bucket name.
///
/// Lowercases, maps anything outside `[a-z0-9.-]` to `-`, pads names
/// shorter than three characters, and removes a leading `-`/`.`, a trailing
/// `-` and the `..`, `.-`, `-.` sequences.
pub fn sanitize_bucket_name(name: &str) -> String {
    let mut s: String = name
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '.' | '-' => c,
            _ => '-',
        })
        .collect();

    if s.len() < 3 {
        s = "aaa".to_string();
    }
    if s.starts_with(['-', '.']) {
        s.insert(0, 'a');
    }
    if let Some(stripped) = s.strip_suffix('-') {
        s = stripped.to_string();
    }
    for (from, to) in [("..", "."), (".-", "-"), ("-.", "-")] {
        while s.contains(from) {
            s = s.replace(from, to);
        }
    }
    s
}
