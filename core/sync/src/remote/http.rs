//! REST client for the product entries API.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use tracing::debug;
use url::Url;

use stocksync_common::{Error, Record, Result};

use super::{DeleteOutcome, RemoteCatalog};

/// HTTP implementation of [`RemoteCatalog`].
///
/// `GET {base}`, `POST {base}`, `DELETE {base}/{id}`.
pub struct HttpCatalog {
    http: Client,
    base: Url,
}

impl HttpCatalog {
    /// Create a client for the collection at `base_url`.
    ///
    /// # Errors
    /// - `base_url` is not an absolute http(s) URL
    /// - The HTTP client cannot be built
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| Error::InvalidInput(format!("Invalid API URL {}: {}", base_url, e)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(Error::InvalidInput(format!(
                "API URL must be http(s): {}",
                base_url
            )));
        }

        let http = Client::builder()
            .user_agent("StockSync/0.1")
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http, base })
    }

    /// Collection URL.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn entry_url(&self, id: i32) -> String {
        format!("{}/{}", self.base.as_str().trim_end_matches('/'), id)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| Error::Network(format!("Failed to parse response: {}", e)))
        } else {
            Err(Self::status_error(response).await)
        }
    }

    async fn status_error(response: Response) -> Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Error::Http {
            status: status.as_u16(),
            message: body,
        }
    }
}

#[async_trait]
impl RemoteCatalog for HttpCatalog {
    async fn fetch_all(&self) -> Result<Vec<Record>> {
        let response = self
            .http
            .get(self.base.clone())
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to fetch entries: {}", e)))?;

        let records: Vec<Record> = Self::handle_response(response).await?;
        debug!("Fetched {} entries", records.len());
        Ok(records)
    }

    async fn create(&self, record: &Record) -> Result<Option<Record>> {
        let response = self
            .http
            .post(self.base.clone())
            .json(record)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to create entry: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        // The entry is stored at this point; an odd body must not cause a resend.
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<Record>(&body) {
            Ok(stored) => Ok(Some(stored)),
            Err(e) => {
                debug!("Create acknowledged without a readable entry: {}", e);
                Ok(None)
            }
        }
    }

    async fn delete(&self, id: i32) -> Result<DeleteOutcome> {
        let response = self
            .http
            .delete(self.entry_url(id))
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to delete entry: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(DeleteOutcome::Deleted)
        } else if status == StatusCode::NOT_FOUND {
            Ok(DeleteOutcome::AlreadyGone)
        } else {
            Err(Self::status_error(response).await)
        }
    }
}
