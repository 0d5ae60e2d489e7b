use async_trait::async_trait;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};

/// Read access to the object storage holding job sources.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;
}

/// Client for S3-compatible object storage (AWS S3, R2, MinIO).
pub struct S3ObjectStore {
    region: Region,
    credentials: Credentials,
}

impl S3ObjectStore {
    pub fn new(
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self {
            region,
            credentials,
        })
    }

    fn bucket(&self, name: &str) -> Result<Box<Bucket>, StorageError> {
        let bucket = Bucket::new(name, self.region.clone(), self.credentials.clone())
            .map_err(|e| StorageError::Config(e.to_string()))?;
        Ok(bucket.with_path_style())
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = match self.bucket(bucket)?.get_object(key).await {
            Ok(response) => response,
            Err(S3Error::HttpFailWithBody(404, _)) => {
                return Err(StorageError::not_found(bucket, key));
            }
            Err(e) => return Err(StorageError::S3(e)),
        };

        match response.status_code() {
            200..=299 => {}
            404 => return Err(StorageError::not_found(bucket, key)),
            status => return Err(StorageError::Status { status }),
        }

        let bytes = response.to_vec();
        if bytes.is_empty() {
            return Err(StorageError::ObjectEmpty {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        Ok(bytes)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    #[error("Empty object: {bucket}/{key}")]
    ObjectEmpty { bucket: String, key: String },

    #[error("Object storage returned status {status}")]
    Status { status: u16 },

    #[error("S3 operation failed: {0}")]
    S3(#[from] S3Error),

    #[error("Storage configuration error: {0}")]
    Config(String),
}

impl StorageError {
    fn not_found(bucket: &str, key: &str) -> Self {
        StorageError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}
