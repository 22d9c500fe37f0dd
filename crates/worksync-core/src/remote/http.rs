use super::RemoteStore;
use crate::error::RemoteWriteError;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;

/// REST client for the hosted record store.
///
/// Records live at `{base}/{collection}/{id}`; a collection listing at
/// `{base}/{collection}` is a JSON object keyed by record id.
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn record_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{}/{}", self.base_url, collection, id)
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn write_record(
        &self,
        collection: &str,
        id: &str,
        data: &Value,
    ) -> Result<(), RemoteWriteError> {
        let response = self
            .client
            .put(self.record_url(collection, id))
            .json(data)
            .send()
            .await
            .map_err(|e| RemoteWriteError::Network(e.to_string()))?;
        if response.status().is_success() {
            return Ok(());
        }
        Err(rejection(response).await)
    }

    async fn patch_record(
        &self,
        collection: &str,
        id: &str,
        data: &Value,
    ) -> Result<(), RemoteWriteError> {
        let response = self
            .client
            .patch(self.record_url(collection, id))
            .json(data)
            .send()
            .await
            .map_err(|e| RemoteWriteError::Network(e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RemoteWriteError::MissingRecord {
                collection: collection.to_string(),
                record_id: id.to_string(),
            });
        }
        if response.status().is_success() {
            return Ok(());
        }
        Err(rejection(response).await)
    }

    async fn delete_record(&self, collection: &str, id: &str) -> Result<(), RemoteWriteError> {
        let response = self
            .client
            .delete(self.record_url(collection, id))
            .send()
            .await
            .map_err(|e| RemoteWriteError::Network(e.to_string()))?;
        // Deleting a record someone else already deleted still counts.
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(rejection(response).await)
    }

    async fn list_records(
        &self,
        collection: &str,
    ) -> Result<Vec<(String, Value)>, RemoteWriteError> {
        let response = self
            .client
            .get(format!("{}/{}", self.base_url, collection))
            .send()
            .await
            .map_err(|e| RemoteWriteError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(rejection(response).await);
        }
        let body: serde_json::Map<String, Value> = response
            .json()
            .await
            .map_err(|e| RemoteWriteError::Network(e.to_string()))?;
        Ok(body.into_iter().collect())
    }
}

async fn rejection(response: reqwest::Response) -> RemoteWriteError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    RemoteWriteError::Rejected(format!("{status}: {body}"))
}
