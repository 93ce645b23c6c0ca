//! Amazon S3 (and S3-compatible) object store backend.

use std::error::Error as StdError;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::ProvideCredentials;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

use crate::error::StorageError;
use crate::store::ObjectStore;

/// Default region when `AWS_S3_REGION` is unset.
const DEFAULT_REGION: &str = "us-east-1";

/// Service error codes that indicate bad or expired credentials.
const CREDENTIAL_ERROR_CODES: &[&str] = &[
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
    "ExpiredToken",
    "InvalidToken",
    "TokenRefreshRequired",
];

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Bucket addressing for [`S3ObjectStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Overrides the derived `https://{bucket}.s3.{region}.amazonaws.com`
    /// base for public URLs (CDN, MinIO, ...).
    pub public_base_url: Option<String>,
}

impl S3Config {
    /// Load bucket addressing from environment variables.
    ///
    /// | Env Var               | Default      |
    /// |-----------------------|--------------|
    /// | `AWS_S3_BUCKET_NAME`  | (required)   |
    /// | `AWS_S3_REGION`       | `us-east-1`  |
    /// | `S3_PUBLIC_BASE_URL`  | derived      |
    ///
    /// Credentials are resolved by the AWS default provider chain
    /// (`AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`, profiles, IMDS).
    pub fn from_env() -> Result<Self, StorageError> {
        let bucket = std::env::var("AWS_S3_BUCKET_NAME")
            .ok()
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| StorageError::Config("AWS_S3_BUCKET_NAME must be set".into()))?;

        let region =
            std::env::var("AWS_S3_REGION").unwrap_or_else(|_| DEFAULT_REGION.to_string());

        let public_base_url = std::env::var("S3_PUBLIC_BASE_URL")
            .ok()
            .filter(|u| !u.trim().is_empty());

        Ok(Self {
            bucket,
            region,
            public_base_url,
        })
    }

    /// Base URL objects are publicly reachable under (no trailing slash).
    pub fn public_base(&self) -> String {
        match &self.public_base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("https://{}.s3.{}.amazonaws.com", self.bucket, self.region),
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// [`ObjectStore`] backed by an S3 bucket.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
    config: S3Config,
}

impl S3ObjectStore {
    /// Build a client from the default AWS configuration chain and verify
    /// that credentials resolve.
    pub async fn connect(config: S3Config) -> Result<Self, StorageError> {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let provider = sdk_config.credentials_provider().ok_or_else(|| {
            StorageError::Credentials("no credentials provider configured".into())
        })?;
        provider
            .provide_credentials()
            .await
            .map_err(|e| StorageError::Credentials(DisplayErrorContext(&e).to_string()))?;

        tracing::info!(bucket = %config.bucket, region = %config.region, "S3 object store ready");

        Ok(Self::from_client(Client::new(&sdk_config), config))
    }

    /// Wrap an already configured client.
    pub fn from_client(client: Client, config: S3Config) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &S3Config {
        &self.config
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| classify_sdk_error(e, key))?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|s| s.is_no_such_key()) {
                    StorageError::NotFound {
                        key: key.to_string(),
                    }
                } else {
                    classify_sdk_error(e, key)
                }
            })?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Transport {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        Ok(data.into_bytes().to_vec())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{key}", self.config.public_base())
    }
}

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

/// Map an SDK error onto the credential / transport / generic split.
fn classify_sdk_error<E>(err: SdkError<E, HttpResponse>, key: &str) -> StorageError
where
    E: ProvideErrorMetadata + StdError + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();

    if has_credentials_cause(&err) {
        return StorageError::Credentials(message);
    }

    match &err {
        SdkError::ServiceError(service) => {
            if service
                .err()
                .code()
                .is_some_and(|code| CREDENTIAL_ERROR_CODES.contains(&code))
            {
                StorageError::Credentials(message)
            } else {
                StorageError::Transport {
                    key: key.to_string(),
                    message,
                }
            }
        }
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) | SdkError::ResponseError(_) => {
            StorageError::Transport {
                key: key.to_string(),
                message,
            }
        }
        _ => StorageError::Other {
            key: key.to_string(),
            message,
        },
    }
}

/// Whether any error in the source chain is a credentials resolution failure.
fn has_credentials_cause(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.downcast_ref::<CredentialsError>().is_some() {
            return true;
        }
        current = e.source();
    }
    false
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
