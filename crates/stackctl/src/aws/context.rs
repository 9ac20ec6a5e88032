//! Shared AWS configuration context
//!
//! Provides `AwsContext` for loading AWS SDK configuration once per
//! (profile, region) and creating multiple service clients from it.

use aws_config::{BehaviorVersion, Region, SdkConfig};
use std::sync::Arc;
use tracing::debug;

use crate::error::EngineError;

/// Shared AWS configuration context for creating service clients.
///
/// # Example
/// ```ignore
/// let aws = AwsContext::load("prod", "").await?;
///
/// // Create multiple clients from the same config
/// let cf = CloudFormationClient::from_context(&aws);
/// let s3 = S3Client::from_context(&aws);
/// ```
#[derive(Clone)]
pub struct AwsContext {
    config: Arc<SdkConfig>,
    region: String,
}

impl AwsContext {
    /// Load AWS configuration for a named profile and region.
    ///
    /// An empty `profile` uses the default credential chain; an empty
    /// `region` defers to whatever region the profile or environment names.
    pub async fn load(profile: &str, region: &str) -> Result<Self, EngineError> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if !profile.is_empty() {
            loader = loader.profile_name(profile);
        }
        if !region.is_empty() {
            loader = loader.region(Region::new(region.to_string()));
        }
        let config = loader.load().await;

        let resolved_region = config
            .region()
            .map(|r| r.to_string())
            .filter(|r| !r.is_empty())
            .ok_or_else(|| {
                EngineError::Config(format!(
                    "no region configured for profile '{}'",
                    display_profile(profile)
                ))
            })?;

        if config.credentials_provider().is_none() {
            return Err(EngineError::Config(format!(
                "no credentials available for profile '{}'",
                display_profile(profile)
            )));
        }

        debug!(profile = %display_profile(profile), region = %resolved_region, "Loaded AWS config");

        Ok(Self {
            config: Arc::new(config),
            region: resolved_region,
        })
    }

    /// Get the underlying SDK config for direct client construction.
    pub fn sdk_config(&self) -> &SdkConfig {
        &self.config
    }

    /// Get the resolved region string.
    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn cloudformation_client(&self) -> aws_sdk_cloudformation::Client {
        aws_sdk_cloudformation::Client::new(self.sdk_config())
    }

    pub fn sts_client(&self) -> aws_sdk_sts::Client {
        aws_sdk_sts::Client::new(self.sdk_config())
    }

    pub fn s3_client(&self) -> aws_sdk_s3::Client {
        aws_sdk_s3::Client::new(self.sdk_config())
    }
}

fn display_profile(profile: &str) -> &str {
    if profile.is_empty() { "default" } else { profile }
}

impl std::fmt::Debug for AwsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsContext")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}
