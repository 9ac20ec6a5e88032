//! Entry points used by the command layer

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::aws::{ClientBundle, SessionCache};
use crate::cleanup::{CleanupRegistry, CleanupReport};
use crate::error::EngineError;
use crate::model::{ChangesetRequest, ChangesetResult, StackEvent, StackSnapshot};
use crate::stack::{
    ChangesetManager, ChangesetOptions, PipelineOptions, PipelineOutcome, describe_snapshot,
};
use crate::wait::cancellable;

/// A stack together with the changeset that would bring it up to date
#[derive(Debug, Clone, Serialize)]
pub struct StackStatusReport {
    pub snapshot: StackSnapshot,
    pub account_id: Option<String>,
    pub region: String,
    pub changeset: Option<ChangesetResult>,
    /// Why no changeset could be computed
    pub changeset_error: Option<String>,
}

pub struct Engine {
    sessions: SessionCache,
    changeset_options: ChangesetOptions,
    pipeline_options: PipelineOptions,
}

impl Engine {
    pub fn new(sessions: SessionCache) -> Self {
        Self {
            sessions,
            changeset_options: ChangesetOptions::default(),
            pipeline_options: PipelineOptions::default(),
        }
    }

    /// Engine talking to AWS with a fresh cleanup registry
    pub fn aws() -> Self {
        Self::new(SessionCache::aws(CleanupRegistry::new()))
    }

    pub fn with_changeset_options(mut self, options: ChangesetOptions) -> Self {
        self.changeset_options = options;
        self
    }

    pub fn with_pipeline_options(mut self, options: PipelineOptions) -> Self {
        self.pipeline_options = options;
        self
    }

    pub fn cleanup(&self) -> &CleanupRegistry {
        self.sessions.cleanup()
    }

    pub async fn session(&self, profile: &str, region: &str) -> Result<Arc<ClientBundle>, EngineError> {
        self.sessions.session(profile, region).await
    }

    async fn session_until(
        &self,
        profile: &str,
        region: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<ClientBundle>, EngineError> {
        cancellable(cancel, self.session(profile, region)).await?
    }

    /// Create a changeset for `request` and wait for it to settle
    pub async fn request_changeset(
        &self,
        request: &ChangesetRequest,
        cancel: &CancellationToken,
    ) -> Result<ChangesetResult, EngineError> {
        let bundle = self.session_until(&request.profile, &request.region, cancel).await?;
        let current = cancellable(
            cancel,
            describe_snapshot(bundle.cloudformation().as_ref(), &request.stack_name),
        )
        .await??;
        ChangesetManager::new(&bundle)
            .with_options(self.changeset_options)
            .create_and_await(request, &current, cancel)
            .await
    }

    /// Describe the stack and compute its pending changeset.
    ///
    /// A changeset that cannot be created is reported in the result rather
    /// than as an error, so the stack itself is still shown.
    pub async fn inspect_status(
        &self,
        request: &ChangesetRequest,
        cancel: &CancellationToken,
    ) -> Result<StackStatusReport, EngineError> {
        let bundle = self.session_until(&request.profile, &request.region, cancel).await?;
        let snapshot = cancellable(
            cancel,
            describe_snapshot(bundle.cloudformation().as_ref(), &request.stack_name),
        )
        .await??;
        let account_id = match cancellable(cancel, bundle.account_id()).await? {
            Ok(id) => Some(id.to_string()),
            Err(e) => {
                debug!(error = %e, "Unable to look up account id");
                None
            }
        };

        let computed = ChangesetManager::new(&bundle)
            .with_options(self.changeset_options)
            .create_and_await(request, &snapshot, cancel)
            .await;
        let (changeset, changeset_error) = match computed {
            Ok(result) => (Some(result), None),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(stack = %request.stack_name, error = %e, "Unable to compute changeset");
                (None, Some(error_chain(&e)))
            }
        };

        Ok(StackStatusReport {
            snapshot,
            account_id,
            region: bundle.region().to_string(),
            changeset,
            changeset_error,
        })
    }

    /// Execute an approved changeset and follow it to completion
    pub async fn execute_approved<I>(
        &self,
        result: &ChangesetResult,
        sink: mpsc::Sender<StackEvent>,
        interrupt: I,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, EngineError>
    where
        I: Future<Output = ()>,
    {
        let bundle = self.session_until(&result.profile, &result.region, cancel).await?;
        crate::stack::execute_approved(
            &bundle,
            result,
            sink,
            interrupt,
            self.pipeline_options,
            cancel,
        )
        .await
    }

    pub fn register_cleanup<F, Fut>(&self, description: impl Into<String>, job: F)
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.cleanup().register(description, job);
    }

    pub async fn run_cleanup(&self, timeout: Duration) -> CleanupReport {
        self.cleanup().run_all(timeout).await
    }
}

fn error_chain(e: &EngineError) -> String {
    let mut message = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
