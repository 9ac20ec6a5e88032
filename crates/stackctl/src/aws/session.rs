//! Per-(profile, region) client bundles
//!
//! [`SessionCache`] hands out one shared [`ClientBundle`] per key. Building a
//! bundle loads SDK configuration, so concurrent first calls for the same key
//! are collapsed into one construction; a failed construction is not cached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::aws::account::{AccountId, IdentityOperations, StsClient};
use crate::aws::cloudformation::{CloudFormationClient, CloudFormationOperations};
use crate::aws::context::AwsContext;
use crate::aws::error::AwsError;
use crate::aws::s3::{S3Client, StagingOperations};
use crate::cleanup::CleanupRegistry;
use crate::error::EngineError;

/// Service clients for one resolved session
#[derive(Clone)]
pub struct RemoteClients {
    /// Region the session actually resolved to
    pub region: String,
    pub cloudformation: Arc<dyn CloudFormationOperations>,
    pub staging: Arc<dyn StagingOperations>,
    pub identity: Arc<dyn IdentityOperations>,
}

/// Builds the service clients for a (profile, region) pair
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn connect(&self, profile: &str, region: &str) -> Result<RemoteClients, EngineError>;
}

/// Factory backed by the AWS SDK default configuration chain
#[derive(Debug, Clone, Copy, Default)]
pub struct AwsSessionFactory;

#[async_trait]
impl SessionFactory for AwsSessionFactory {
    async fn connect(&self, profile: &str, region: &str) -> Result<RemoteClients, EngineError> {
        let ctx = AwsContext::load(profile, region).await?;
        Ok(RemoteClients {
            region: ctx.region().to_string(),
            cloudformation: Arc::new(CloudFormationClient::from_context(&ctx)),
            staging: Arc::new(S3Client::from_context(&ctx)),
            identity: Arc::new(StsClient::from_context(&ctx)),
        })
    }
}

/// Everything an operation against one (profile, region) needs.
///
/// The idempotency token is generated once and attached to every mutating
/// request issued through this bundle.
pub struct ClientBundle {
    profile: String,
    region: String,
    token: String,
    clients: RemoteClients,
    account_id: OnceCell<Result<AccountId, AwsError>>,
    cleanup: CleanupRegistry,
}

impl ClientBundle {
    pub fn new(
        profile: impl Into<String>,
        clients: RemoteClients,
        cleanup: CleanupRegistry,
    ) -> Self {
        Self {
            profile: profile.into(),
            region: clients.region.clone(),
            token: uuid::Uuid::new_v4().to_string(),
            clients,
            account_id: OnceCell::new(),
            cleanup,
        }
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Client request token shared by all mutating calls of this bundle
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn cloudformation(&self) -> &Arc<dyn CloudFormationOperations> {
        &self.clients.cloudformation
    }

    pub fn staging(&self) -> &Arc<dyn StagingOperations> {
        &self.clients.staging
    }

    pub fn cleanup(&self) -> &CleanupRegistry {
        &self.cleanup
    }

    /// The caller's account, looked up once.
    ///
    /// Concurrent first callers wait on the same lookup; its result, success
    /// or error, is returned to every caller for the life of the bundle.
    pub async fn account_id(&self) -> Result<AccountId, AwsError> {
        self.account_id
            .get_or_init(|| async { self.clients.identity.caller_account().await })
            .await
            .clone()
    }
}

impl std::fmt::Debug for ClientBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBundle")
            .field("profile", &self.profile)
            .field("region", &self.region)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    profile: String,
    region: String,
}

type SessionSlot = Arc<OnceCell<Arc<ClientBundle>>>;

/// Process-wide cache of client bundles
pub struct SessionCache {
    factory: Arc<dyn SessionFactory>,
    cleanup: CleanupRegistry,
    sessions: Mutex<HashMap<SessionKey, SessionSlot>>,
}

impl SessionCache {
    pub fn new(factory: Arc<dyn SessionFactory>, cleanup: CleanupRegistry) -> Self {
        Self {
            factory,
            cleanup,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Cache backed by real AWS clients
    pub fn aws(cleanup: CleanupRegistry) -> Self {
        Self::new(Arc::new(AwsSessionFactory), cleanup)
    }

    /// Get the bundle for `(profile, region)`, building it on first use.
    ///
    /// The key is the pair exactly as given: an empty region and the
    /// region it resolves to are distinct keys.
    pub async fn session(
        &self,
        profile: &str,
        region: &str,
    ) -> Result<Arc<ClientBundle>, EngineError> {
        let key = SessionKey {
            profile: profile.to_string(),
            region: region.to_string(),
        };
        let slot = {
            let mut sessions = self
                .sessions
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            sessions.entry(key).or_default().clone()
        };

        slot.get_or_try_init(|| async {
            debug!(profile = %profile, region = %region, "Creating AWS session");
            let clients = self.factory.connect(profile, region).await?;
            Ok::<_, EngineError>(Arc::new(ClientBundle::new(
                profile,
                clients,
                self.cleanup.clone(),
            )))
        })
        .await
        .cloned()
    }

    pub fn cleanup(&self) -> &CleanupRegistry {
        &self.cleanup
    }
}
