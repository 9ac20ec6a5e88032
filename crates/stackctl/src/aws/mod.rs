//! AWS client modules
//!
//! This module provides wrappers around AWS SDK clients for:
//! - CloudFormation: stacks, changesets and stack events
//! - S3: staging of oversized templates
//! - STS: Account ID lookup
//! - session: the per-(profile, region) client bundle cache

pub mod account;
pub mod cloudformation;
pub mod context;
pub mod error;
pub mod s3;
pub mod session;

// Core clients
pub use account::{AccountId, IdentityOperations, StsClient};
pub use cloudformation::{CloudFormationClient, CloudFormationOperations};
pub use context::AwsContext;
pub use s3::{S3Client, StagingOperations};
pub use session::{AwsSessionFactory, ClientBundle, RemoteClients, SessionCache, SessionFactory};

// Error handling
pub use error::{AwsError, classify_aws_error, from_sdk_error};
