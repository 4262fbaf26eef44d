//! Blob storage - raw tool payload uploads
//!
//! The schema-discovery branch of the compaction engine uploads the full
//! raw tool output and hands the model a URL instead. Upload failure is
//! fatal for that branch: the model must never see a schema without a URI.

use async_trait::async_trait;
use tracing::info;

use crate::config::BlobConfig;
use crate::error::{Error, Result};

/// Abstract interface for blob upload backends
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload a blob under the given key and return its public URL
    async fn upload(&self, blob: &[u8], key: &str) -> Result<String>;
}

/// S3-backed blob store
pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    region: String,
}

impl S3BlobStore {
    /// Create a store from the ambient AWS environment (credentials chain,
    /// `AWS_REGION`).
    pub async fn from_env(config: &BlobConfig) -> Self {
        let aws_config = aws_config::load_from_env().await;
        let region = aws_config
            .region()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "us-east-1".to_string());

        S3BlobStore {
            client: aws_sdk_s3::Client::new(&aws_config),
            bucket: config.bucket.clone(),
            region,
        }
    }
}

/// Test doubles for blob storage.
#[cfg(test)]
pub mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Counts uploads; optionally fails every call.
    #[derive(Default)]
    pub struct CountingBlobStore {
        pub uploads: AtomicUsize,
        fail: bool,
    }

    impl CountingBlobStore {
        pub fn failing() -> Self {
            CountingBlobStore {
                uploads: AtomicUsize::new(0),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl BlobStore for CountingBlobStore {
        async fn upload(&self, _blob: &[u8], key: &str) -> Result<String> {
            if self.fail {
                return Err(Error::Blob("upload rejected".to_string()));
            }
            self.uploads.fetch_add(1, Ordering::SeqCst);
            Ok(format!("https://blobs.test/{}", key))
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn upload(&self, blob: &[u8], key: &str) -> Result<String> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/json")
            .body(aws_sdk_s3::primitives::ByteStream::from(blob.to_vec()))
            .send()
            .await
            .map_err(|e| Error::Blob(format!("S3 upload failed for {}: {}", key, e)))?;

        let url = format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            self.bucket, self.region, key
        );
        info!("Uploaded {} bytes to {}", blob.len(), url);
        Ok(url)
    }
}
