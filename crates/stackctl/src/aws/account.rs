//! AWS account identity

use async_trait::async_trait;
use tracing::info;

use crate::aws::context::AwsContext;
use crate::aws::error::{AwsError, from_sdk_error};

/// Strongly-typed AWS account ID (12-digit string)
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display, derive_more::Deref)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(s: impl Into<String>) -> Self {
        AccountId(s.into())
    }
}

/// Identity lookup, called at most once per client bundle
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityOperations: Send + Sync {
    async fn caller_account(&self) -> Result<AccountId, AwsError>;
}

/// STS-backed identity lookup
#[derive(Clone, Debug)]
pub struct StsClient {
    client: aws_sdk_sts::Client,
}

impl StsClient {
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.sts_client(),
        }
    }
}

#[async_trait]
impl IdentityOperations for StsClient {
    /// Fetch the current AWS account ID via STS GetCallerIdentity
    ///
    /// This operation requires no special permissions - it always succeeds if
    /// credentials are valid.
    async fn caller_account(&self) -> Result<AccountId, AwsError> {
        let identity = self
            .client
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| from_sdk_error(&e))?;

        let account = identity.account().ok_or_else(|| AwsError::Sdk {
            code: None,
            message: "No account ID returned from STS GetCallerIdentity".to_string(),
        })?;

        info!(account_id = %account, "AWS account validated");

        Ok(AccountId(account.to_string()))
    }
}
