//! S3 object store
//!
//! Supports AWS S3 and S3-compatible storage (MinIO, Backblaze B2, Wasabi).

use super::{ObjectMeta, ObjectStore, ObjectStoreError};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use tracing::debug;

/// Connection parameters for [`S3ObjectStore`]
#[derive(Clone, Default)]
pub struct S3ConnectOptions {
    /// AWS region
    pub region: String,
    /// Custom S3-compatible endpoint (optional)
    pub endpoint: Option<String>,
    /// Static access key id; the default provider chain is used when absent
    pub access_key_id: Option<String>,
    /// Static secret access key
    pub secret_access_key: Option<String>,
}

impl std::fmt::Debug for S3ConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ConnectOptions")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

/// [`ObjectStore`] backed by the AWS SDK
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    /// Build a client for the given connection options
    pub async fn connect(options: &S3ConnectOptions) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(options.region.clone()));

        if let (Some(access_key_id), Some(secret_access_key)) =
            (&options.access_key_id, &options.secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key_id.clone(),
                secret_access_key.clone(),
                None,
                None,
                "certstash-static",
            ));
        }

        let sdk_config = loader.load().await;
        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config);

        if let Some(endpoint_url) = &options.endpoint {
            debug!("Using custom S3 endpoint: {}", endpoint_url);
            s3_config_builder = s3_config_builder
                .endpoint_url(normalize_endpoint(endpoint_url))
                .force_path_style(true); // Required for MinIO and many S3-compatible services
        }

        Self {
            client: Client::from_conf(s3_config_builder.build()),
        }
    }

    /// Wrap an existing SDK client
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

/// Endpoints are often given as bare hosts (`s3.example.com`); the SDK wants a URL.
fn normalize_endpoint(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint)
    }
}

fn to_chrono(time: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(time.secs(), time.subsec_nanos())
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, ObjectStoreError> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => {
                debug!("Bucket {} is accessible", bucket);
                Ok(true)
            }
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    debug!("Bucket {} does not exist", bucket);
                    Ok(false)
                } else {
                    Err(anyhow!("Failed to check bucket {}: {}", bucket, service_error).into())
                }
            }
        }
    }

    async fn get_object(&self, bucket: &str, name: &str) -> Result<Vec<u8>, ObjectStoreError> {
        debug!("Downloading s3://{}/{}", bucket, name);

        let resp = match self.client.get_object().bucket(bucket).key(name).send().await {
            Ok(resp) => resp,
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    return Err(ObjectStoreError::not_found(name));
                }
                return Err(anyhow!("Failed to get object {}: {}", name, service_error).into());
            }
        };

        let body = resp
            .body
            .collect()
            .await
            .context("Failed to read response body")?;

        let data = body.into_bytes().to_vec();
        debug!("Downloaded {} bytes from s3://{}/{}", data.len(), bucket, name);
        Ok(data)
    }

    async fn put_object(
        &self,
        bucket: &str,
        name: &str,
        data: Vec<u8>,
    ) -> Result<(), ObjectStoreError> {
        debug!("Uploading {} bytes to s3://{}/{}", data.len(), bucket, name);

        self.client
            .put_object()
            .bucket(bucket)
            .key(name)
            .body(ByteStream::from(data))
            .send()
            .await
            .with_context(|| format!("Failed to put object: {}", name))?;

        Ok(())
    }

    async fn remove_object(&self, bucket: &str, name: &str) -> Result<(), ObjectStoreError> {
        debug!("Deleting s3://{}/{}", bucket, name);

        self.client
            .delete_object()
            .bucket(bucket)
            .key(name)
            .send()
            .await
            .with_context(|| format!("Failed to delete object: {}", name))?;

        Ok(())
    }

    async fn stat_object(&self, bucket: &str, name: &str) -> Result<ObjectMeta, ObjectStoreError> {
        debug!("Stat s3://{}/{}", bucket, name);

        let resp = match self.client.head_object().bucket(bucket).key(name).send().await {
            Ok(resp) => resp,
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    return Err(ObjectStoreError::not_found(name));
                }
                return Err(anyhow!("Failed to stat object {}: {}", name, service_error).into());
            }
        };

        let last_modified = resp
            .last_modified()
            .and_then(to_chrono)
            .ok_or_else(|| anyhow!("Object {} has no last-modified time", name))?;

        Ok(ObjectMeta {
            size: resp.content_length().unwrap_or(0).max(0) as u64,
            last_modified,
        })
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
    ) -> Result<Vec<String>, ObjectStoreError> {
        debug!("Listing s3://{}/{} (recursive: {})", bucket, prefix, recursive);

        let mut names = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(bucket).prefix(prefix);

            if !recursive {
                request = request.delimiter("/");
            }
            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }

            let resp = request
                .send()
                .await
                .with_context(|| format!("Failed to list objects under: {}", prefix))?;

            names.extend(resp.contents().iter().filter_map(|o| o.key().map(String::from)));
            names.extend(
                resp.common_prefixes()
                    .iter()
                    .filter_map(|p| p.prefix().map(String::from)),
            );

            if resp.is_truncated() == Some(true) {
                continuation_token = resp.next_continuation_token().map(String::from);
            } else {
                break;
            }
        }

        debug!("Found {} objects under {}", names.len(), prefix);
        Ok(names)
    }
}

impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(
            normalize_endpoint("very-cool.s3.backblazeb2.com"),
            "https://very-cool.s3.backblazeb2.com"
        );
        assert_eq!(
            normalize_endpoint("http://localhost:9000"),
            "http://localhost:9000"
        );
    }

    #[test]
    fn test_to_chrono() {
        let time = aws_sdk_s3::primitives::DateTime::from_secs(1_700_000_000);
        let converted = to_chrono(&time).unwrap();
        assert_eq!(converted.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_connect_options_debug_hides_secret() {
        let options = S3ConnectOptions {
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: Some("AKIDEXAMPLE".to_string()),
            secret_access_key: Some("wJalrXUtnFEMI".to_string()),
        };
        let debug_output = format!("{:?}", options);
        assert!(debug_output.contains("AKIDEXAMPLE"));
        assert!(!debug_output.contains("wJalrXUtnFEMI"));
    }
}
