//! Object storage for resolved outputs.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

use crate::config::BucketConfig;
use crate::error::{AppError, AppResult};

/// Durable storage for output bytes. Returns the public URL of the object.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> AppResult<String>;
}

/// `PUT {endpoint}/{bucket}/{key}` with basic credentials, for S3-compatible
/// gateways that accept them.
pub struct HttpObjectStore {
    client: Client,
    config: BucketConfig,
}

impl HttpObjectStore {
    pub fn new(config: BucketConfig, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(AppError::HttpClient)?;
        Ok(HttpObjectStore { client, config })
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.endpoint_url.trim_end_matches('/'),
            self.config.bucket_name,
            key.trim_start_matches('/')
        )
    }

    fn public_url(&self, key: &str) -> String {
        match &self.config.public_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), key.trim_start_matches('/')),
            None => self.object_url(key),
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> AppResult<String> {
        let url = self.object_url(key);
        let size = bytes.len();
        let response = self
            .client
            .put(&url)
            .basic_auth(&self.config.access_key_id, Some(&self.config.secret_access_key))
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| AppError::Upload(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Upload(format!(
                "PUT {} returned {}: {}",
                url,
                status,
                body.chars().take(200).collect::<String>()
            )));
        }
        tracing::info!(key, bytes = size, bucket = %self.config.bucket_name, "uploaded output to object storage");
        Ok(self.public_url(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(public_url: Option<&str>) -> BucketConfig {
        BucketConfig {
            endpoint_url: "https://s3.example.com/".into(),
            bucket_name: "outputs".into(),
            access_key_id: "id".into(),
            secret_access_key: "secret".into(),
            public_url: public_url.map(str::to_string),
        }
    }

    #[test]
    fn object_and_public_urls() {
        let store = HttpObjectStore::new(config(None), Duration::from_secs(1)).unwrap();
        assert_eq!(store.object_url("jobs/a.mp4"), "https://s3.example.com/outputs/jobs/a.mp4");
        assert_eq!(store.public_url("jobs/a.mp4"), "https://s3.example.com/outputs/jobs/a.mp4");

        let store = HttpObjectStore::new(config(Some("https://cdn.example.com/")), Duration::from_secs(1)).unwrap();
        assert_eq!(store.public_url("/jobs/a.mp4"), "https://cdn.example.com/jobs/a.mp4");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_upload_error() {
        let mut cfg = config(None);
        cfg.endpoint_url = "http://127.0.0.1:1".into();
        let store = HttpObjectStore::new(cfg, Duration::from_secs(1)).unwrap();
        let err = store.put("a.mp4", b"x".to_vec(), "video/mp4").await.unwrap_err();
        assert_eq!(err.kind(), "upload_error");
    }
}
