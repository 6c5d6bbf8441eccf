use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;

use super::ObjectStore;
use crate::error::IoError;

/// HTTP(S)-backed store.
///
/// Issues GET requests against `base_url + "/" + key`. A 404 reports `None`;
/// any other non-success status is an error. Retry and timeout policy belong
/// to the underlying client.
pub struct HttpStore {
    base_url: String,
    client: reqwest::Client,
}

impl HttpStore {
    /// Create a store for the given base URL (no trailing slash required).
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }
}

#[async_trait]
impl ObjectStore for HttpStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, IoError> {
        let url = self.url_for(key);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| IoError::Connection(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let data = response
                    .bytes()
                    .await
                    .map_err(|e| IoError::Connection(e.to_string()))?;
                Ok(Some(data))
            }
            status => Err(IoError::Http {
                status: status.as_u16(),
                url,
            }),
        }
    }

    fn identifier(&self) -> &str {
        &self.base_url
    }
}
