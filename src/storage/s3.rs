//! S3 and S3-compatible object store
//!
//! Credentials always come from the resolved cache settings, never from the
//! SDK's own provider chain, so what `depcache config show` reports is what
//! gets used.

use crate::cache::key::CacheKey;
use crate::cache::settings::{CacheSettings, StoreCredentials};
use crate::error::{DepcacheError, DepcacheResult};
use crate::storage::{ObjectInfo, ObjectStore, Presence};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

const BACKEND: &str = "s3";

/// Object store backed by an S3 bucket
pub struct S3Store {
    client: Client,
    region: String,
    endpoint: Option<String>,
}

impl fmt::Debug for S3Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Store")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl S3Store {
    /// Build a client from static credentials.
    ///
    /// A custom endpoint switches to path-style addressing, which most
    /// S3-compatible services require.
    pub async fn new(settings: &CacheSettings, credentials: &StoreCredentials) -> Self {
        let provider = Credentials::from_keys(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
            None,
        );
        let shared_config = aws_config::defaults(BehaviorVersion::latest())
            .credentials_provider(provider)
            .region(Region::new(settings.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        debug!(
            "Created S3 client (region: {}, endpoint: {:?})",
            settings.region, settings.endpoint
        );
        Self {
            client: Client::from_conf(builder.build()),
            region: settings.region.clone(),
            endpoint: settings.endpoint.clone(),
        }
    }
}

fn failed(operation: &'static str, err: impl std::error::Error) -> DepcacheError {
    DepcacheError::storage(BACKEND, operation, DisplayErrorContext(err).to_string())
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn head(&self, key: &CacheKey) -> DepcacheResult<Presence> {
        let result = self
            .client
            .head_object()
            .bucket(&key.bucket)
            .key(&key.path)
            .send()
            .await;

        match result {
            Ok(_) => Ok(Presence::Found),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => {
                Ok(Presence::NotFound)
            }
            Err(err) => Err(failed("head", err)),
        }
    }

    async fn get(&self, key: &CacheKey, dest: &Path) -> DepcacheResult<u64> {
        debug!("Fetching from s3: {}", key);
        let result = self
            .client
            .get_object()
            .bucket(&key.bucket)
            .key(&key.path)
            .send()
            .await;

        let mut output = match result {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                return Err(DepcacheError::CacheMiss {
                    key: key.to_string(),
                })
            }
            Err(err) => return Err(failed("get", err)),
        };

        let mut file = File::create(dest)
            .await
            .map_err(|e| DepcacheError::io(format!("creating {}", dest.display()), e))?;
        let mut bytes = 0u64;
        while let Some(chunk) = output.body.try_next().await.map_err(|e| failed("get", e))? {
            file.write_all(&chunk)
                .await
                .map_err(|e| DepcacheError::io(format!("writing {}", dest.display()), e))?;
            bytes += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| DepcacheError::io(format!("writing {}", dest.display()), e))?;

        Ok(bytes)
    }

    async fn put(&self, key: &CacheKey, source: &Path) -> DepcacheResult<u64> {
        let bytes = tokio::fs::metadata(source)
            .await
            .map_err(|e| DepcacheError::io(format!("reading {}", source.display()), e))?
            .len();
        let body = ByteStream::from_path(source)
            .await
            .map_err(|e| failed("put", e))?;

        self.client
            .put_object()
            .bucket(&key.bucket)
            .key(&key.path)
            .body(body)
            .send()
            .await
            .map_err(|e| failed("put", e))?;

        debug!("Uploaded {} ({} bytes)", key, bytes);
        Ok(bytes)
    }

    async fn list(&self, bucket: &str, prefix: &str) -> DepcacheResult<Vec<ObjectInfo>> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| failed("list", e))?;

            for object in page.contents() {
                let Some(path) = object.key() else {
                    continue;
                };
                objects.push(ObjectInfo {
                    key: CacheKey {
                        bucket: bucket.to_string(),
                        path: path.to_string(),
                    },
                    size: object.size().unwrap_or(0).max(0) as u64,
                    last_modified: object
                        .last_modified()
                        .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos())),
                });
            }

            match page.next_continuation_token() {
                Some(token) if page.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        debug!("Listed {} objects under {}/{}", objects.len(), bucket, prefix);
        Ok(objects)
    }

    async fn delete(&self, key: &CacheKey) -> DepcacheResult<()> {
        self.client
            .delete_object()
            .bucket(&key.bucket)
            .key(&key.path)
            .send()
            .await
            .map_err(|e| failed("delete", e))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}
