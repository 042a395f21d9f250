//! S3/MinIO implementation of the storage observer

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    Client,
};
use chrono::{DateTime, Utc};
use ifr_common::{IfrError, Result};
use tracing::{debug, info, instrument};

use super::{config::StorageConfig, ObjectInfo, StorageObserver};

/// Observer over one S3/MinIO bucket
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(config: StorageConfig) -> Self {
        debug!("Initializing storage with config: {:?}", config.endpoint);

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "ifr-storage",
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        info!("Storage client initialized for bucket: {}", config.bucket);

        Self {
            client,
            bucket: config.bucket,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl StorageObserver for S3Storage {
    #[instrument(skip(self))]
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        debug!("Listing objects in s3://{}/{}", self.bucket, prefix);

        let mut paths = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);

            if let Some(token) = continuation.take() {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| IfrError::StorageUnavailable(format!("list failed: {e}")))?;

            for object in response.contents() {
                if let Some(key) = object.key() {
                    paths.push(key.to_string());
                }
            }

            match response.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        debug!("Found {} objects under prefix {:?}", paths.len(), prefix);

        Ok(paths)
    }

    #[instrument(skip(self))]
    async fn metadata(&self, path: &str) -> Result<ObjectInfo> {
        let response = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| IfrError::StorageUnavailable(format!("head {path} failed: {e}")))?;

        // S3 wraps etags in double quotes
        let etag = response
            .e_tag()
            .unwrap_or_default()
            .trim_matches('"')
            .to_string();

        let last_modified = response
            .last_modified()
            .and_then(|dt| DateTime::parse_from_rfc3339(&dt.to_string()).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Ok(ObjectInfo {
            path: path.to_string(),
            etag,
            last_modified,
            size: response.content_length().unwrap_or(0),
        })
    }

    #[instrument(skip(self))]
    async fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        debug!("Downloading from s3://{}/{}", self.bucket, path);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| IfrError::StorageUnavailable(format!("get {path} failed: {e}")))?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| IfrError::StorageUnavailable(format!("read body of {path} failed: {e}")))?
            .into_bytes()
            .to_vec();

        debug!(
            "Downloaded {} bytes from s3://{}/{}",
            data.len(),
            self.bucket,
            path
        );

        Ok(data)
    }
}
