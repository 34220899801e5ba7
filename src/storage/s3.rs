//! S3-compatible providers via the AWS SDK

use std::sync::Arc;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client as S3Client;
use tracing::debug;

use super::{StorageClient, StorageFactory};
use crate::error::{Result, SyncError};
use crate::types::{BucketSet, ProviderConfig};

/// Region in which S3 rejects an explicit location constraint
const DEFAULT_REGION: &str = "us-east-1";

/// Bucket operations against one provider
pub struct S3StorageClient {
    client: S3Client,
    provider: Arc<ProviderConfig>,
}

impl S3StorageClient {
    /// Build a client with the provider's static credentials and endpoint
    pub async fn new(provider: Arc<ProviderConfig>) -> Self {
        let credentials = Credentials::new(
            provider.access_key().expose(),
            provider.secret_key().expose(),
            None,
            None,
            "bucketsync",
        );

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(provider.region().to_string()))
            .endpoint_url(provider.endpoint())
            .credentials_provider(credentials)
            .load()
            .await;

        // Most non-AWS providers only support path-style addressing
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        debug!(
            "S3 client for {} at {} ({})",
            provider.name(),
            provider.endpoint(),
            provider.region()
        );

        Self {
            client: S3Client::from_conf(s3_config),
            provider,
        }
    }
}

#[async_trait]
impl StorageClient for S3StorageClient {
    fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    async fn list_buckets(&self) -> Result<BucketSet> {
        let response = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|e| SyncError::List {
                provider: self.provider.name().to_string(),
                message: describe(&e),
            })?;

        Ok(response
            .buckets()
            .iter()
            .filter_map(|b| b.name())
            .collect())
    }

    async fn bucket_exists(&self, name: &str) -> bool {
        match self.client.head_bucket().bucket(name).send().await {
            Ok(_) => true,
            Err(e) => {
                debug!(
                    "head_bucket {} on {}: {}",
                    name,
                    self.provider.name(),
                    describe(&e)
                );
                false
            }
        }
    }

    async fn create_bucket_live(&self, name: &str) -> Result<()> {
        let mut request = self.client.create_bucket().bucket(name);

        if self.provider.region() != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.provider.region()))
                    .build(),
            );
        }

        request.send().await.map_err(|e| SyncError::Creation {
            provider: self.provider.name().to_string(),
            bucket: name.to_string(),
            message: describe(&e),
        })?;

        Ok(())
    }
}

/// Render an SDK error with its whole cause chain, so transport failures
/// (DNS, refused connections, TLS) keep their reason
fn describe<E: std::error::Error>(err: &E) -> String {
    DisplayErrorContext(err).to_string()
}

/// Connects [`S3StorageClient`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct S3StorageFactory;

#[async_trait]
impl StorageFactory for S3StorageFactory {
    async fn connect(&self, provider: &Arc<ProviderConfig>) -> Result<Arc<dyn StorageClient>> {
        Ok(Arc::new(S3StorageClient::new(provider.clone()).await))
    }
}
