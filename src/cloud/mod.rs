//! Cloud collaborators: the GCS bucket datasets are staged in, and the
//! BigQuery loader that pulls them into the warehouse.

pub mod warehouse;

use google_cloud_storage::client::{Client, ClientConfig};
use google_cloud_storage::http::objects::download::Range;
use google_cloud_storage::http::objects::get::GetObjectRequest;
use google_cloud_storage::http::objects::upload::{Media, UploadObjectRequest, UploadType};
use tracing::info;

use crate::error::{LoadError, Result};

/// One bucket, one authenticated client.
pub struct ObjectStore {
    client: Client,
    bucket: String,
}

impl ObjectStore {
    /// Authenticate with application-default credentials.
    pub async fn connect(bucket: impl Into<String>) -> Result<Self> {
        let config = ClientConfig::default()
            .with_auth()
            .await
            .map_err(|e| LoadError::Storage(format!("authenticating to GCS: {}", e)))?;
        Ok(Self {
            client: Client::new(config),
            bucket: bucket.into(),
        })
    }

    /// Upload `data` as `object`, returning the `gs://` URI.
    pub async fn upload(&self, object: &str, data: Vec<u8>) -> Result<String> {
        let upload_type = UploadType::Simple(Media::new(object.to_string()));
        let request = UploadObjectRequest {
            bucket: self.bucket.clone(),
            ..Default::default()
        };
        self.client
            .upload_object(&request, data, &upload_type)
            .await
            .map_err(|e| {
                LoadError::Storage(format!(
                    "uploading {} to bucket {}: {}",
                    object, self.bucket, e
                ))
            })?;

        let uri = format!("gs://{}/{}", self.bucket, object);
        info!(%uri, "uploaded object");
        Ok(uri)
    }

    /// Download `object` in full.
    pub async fn download(&self, object: &str) -> Result<Vec<u8>> {
        let request = GetObjectRequest {
            bucket: self.bucket.clone(),
            object: object.to_string(),
            ..Default::default()
        };
        let data = self
            .client
            .download_object(&request, &Range::default())
            .await
            .map_err(|e| {
                LoadError::Storage(format!(
                    "downloading {} from bucket {}: {}",
                    object, self.bucket, e
                ))
            })?;
        info!(object, bytes = data.len(), "downloaded object");
        Ok(data)
    }

    /// `gs://bucket/object` for an object in this bucket.
    pub fn uri(&self, object: &str) -> String {
        format!("gs://{}/{}", self.bucket, object)
    }
}
