//! Deferred compensating actions run once at shutdown
//!
//! Side effects of a command (a changeset record, a staged template object,
//! a placeholder stack) are registered here as they happen. [`CleanupRegistry::run_all`]
//! runs every job concurrently under one deadline; a failing job never stops
//! its siblings and stays registered so a later run can retry it.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, join_all};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Time an overrunning job gets to return after its token is cancelled
const CANCEL_GRACE: Duration = Duration::from_secs(1);

type CleanupFn =
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct CleanupJob {
    id: u64,
    description: String,
    run: CleanupFn,
}

/// A job that failed or ran out of time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupFailure {
    pub description: String,
    pub error: String,
}

/// Outcome of one [`CleanupRegistry::run_all`] pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub succeeded: usize,
    pub failed: Vec<CleanupFailure>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Thread-safe registry of cleanup jobs
///
/// Cloning is cheap; all clones share the same job list.
#[derive(Clone, Default)]
pub struct CleanupRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    jobs: Mutex<Vec<CleanupJob>>,
    next_id: AtomicU64,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job. It receives a token that is cancelled when the
    /// cleanup deadline passes; the job then has a short grace period to
    /// return before it is dropped.
    pub fn register<F, Fut>(&self, description: impl Into<String>, job: F)
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let description = description.into();
        debug!(job = %description, "Registered cleanup job");
        let run: CleanupFn = Arc::new(move |token| Box::pin(job(token)));
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.jobs().push(CleanupJob {
            id,
            description,
            run,
        });
    }

    /// Run every registered job concurrently, each bounded by `timeout`
    /// measured from the start of the call.
    pub async fn run_all(&self, timeout: Duration) -> CleanupReport {
        let jobs = std::mem::take(&mut *self.jobs());
        if jobs.is_empty() {
            return CleanupReport::default();
        }

        info!(count = jobs.len(), timeout = ?timeout, "Running cleanup jobs");
        let deadline = Instant::now() + timeout;

        let runs = jobs.into_iter().map(|job| async move {
            let token = CancellationToken::new();
            let mut run = (job.run)(token.clone());
            let outcome = tokio::time::timeout_at(deadline, &mut run).await;
            let result = match outcome {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(format!("{e:#}")),
                Err(_) => {
                    token.cancel();
                    if tokio::time::timeout(CANCEL_GRACE, &mut run).await.is_err() {
                        debug!(job = %job.description, "Cleanup job ignored cancellation");
                    }
                    Err(format!("timed out after {timeout:?}"))
                }
            };
            (job, result)
        });

        let mut report = CleanupReport::default();
        let mut retained = Vec::new();
        for (job, result) in join_all(runs).await {
            match result {
                Ok(()) => {
                    debug!(job = %job.description, "Cleanup job finished");
                    report.succeeded += 1;
                }
                Err(error) => {
                    warn!(job = %job.description, error = %error, "Cleanup job failed");
                    report.failed.push(CleanupFailure {
                        description: job.description.clone(),
                        error,
                    });
                    retained.push(job);
                }
            }
        }

        if !retained.is_empty() {
            let mut jobs = self.jobs();
            jobs.extend(retained);
            jobs.sort_by_key(|j| j.id);
        }

        report
    }

    /// Number of jobs waiting to run
    pub fn len(&self) -> usize {
        self.jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs().is_empty()
    }

    /// Descriptions of pending jobs, in registration order
    pub fn descriptions(&self) -> Vec<String> {
        self.jobs().iter().map(|j| j.description.clone()).collect()
    }

    fn jobs(&self) -> std::sync::MutexGuard<'_, Vec<CleanupJob>> {
        self.inner
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CleanupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupRegistry")
            .field("pending", &self.len())
            .finish()
    }
}
