//! S3 staging for templates too large to send inline

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use tracing::{debug, info};

use crate::aws::context::AwsContext;
use crate::aws::error::{AwsError, from_sdk_error};

/// Object storage used to stage templates.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StagingOperations: Send + Sync {
    /// Create a bucket. An already-owned bucket surfaces as
    /// [`AwsError::AlreadyExists`].
    async fn create_bucket(&self, bucket: &str) -> Result<(), AwsError>;

    /// Upload an object and return its HTTPS URL
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
    ) -> Result<String, AwsError>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), AwsError>;
}

/// S3 client for staging template bodies
#[derive(Clone, Debug)]
pub struct S3Client {
    client: Client,
    region: String,
}

impl S3Client {
    /// Create an S3 client from a pre-loaded AWS context
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.s3_client(),
            region: ctx.region().to_string(),
        }
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("https://{bucket}.s3.{}.amazonaws.com/{key}", self.region)
    }
}

#[async_trait]
impl StagingOperations for S3Client {
    async fn create_bucket(&self, bucket: &str) -> Result<(), AwsError> {
        info!(bucket = %bucket, region = %self.region, "Creating S3 bucket");

        let mut request = self.client.create_bucket().bucket(bucket);
        // us-east-1 rejects an explicit location constraint
        if self.region != "us-east-1" {
            let create_config = CreateBucketConfiguration::builder()
                .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                .build();
            request = request.create_bucket_configuration(create_config);
        }

        request.send().await.map_err(|e| from_sdk_error(&e))?;
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
    ) -> Result<String, AwsError> {
        debug!(bucket = %bucket, key = %key, size = body.len(), "Uploading template");

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| from_sdk_error(&e))?;

        Ok(self.object_url(bucket, key))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), AwsError> {
        debug!(bucket = %bucket, key = %key, "Deleting object");
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| from_sdk_error(&e))?;
        Ok(())
    }
}
