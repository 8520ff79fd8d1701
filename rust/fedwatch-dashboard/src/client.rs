use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::TrainingApi;
use fedwatch_core::{Ack, AuditBlock, LedgerEntry, TrainingConfig, TrainingStatus};

/// Error returned by a [`Client`] request.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to deserialize data: {0}")]
    Deserialize(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("request rejected with status {status}: {detail}")]
    Rejected { status: u16, detail: String },
}

impl ClientError {
    #[cfg_attr(not(feature = "reqwest-client"), allow(dead_code))]
    fn http_error<E: std::error::Error>(e: E) -> Self {
        Self::Http(format!("{}", e))
    }

    /// Builds the error of a non-success response. The server explains rejections in a
    /// `{"detail": ...}` body; anything else is kept as text.
    pub fn rejected(status: u16, body: &[u8]) -> Self {
        #[derive(Deserialize)]
        struct Detail {
            detail: String,
        }

        let detail = match serde_json::from_slice::<Detail>(body) {
            Ok(Detail { detail }) => detail,
            Err(_) => String::from_utf8_lossy(body).into_owned(),
        };
        Self::Rejected { status, detail }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::Deserialize(format!("{}", e))
    }
}

/// A basic HTTP interface that [`Client`] HTTP backends must implement.
#[cfg_attr(test, mockall::automock(type Response = Vec<u8>;))]
#[async_trait]
pub trait HttpClient {
    /// Response body type
    type Response: AsRef<[u8]> + Send;

    /// Perform an HTTP `GET` on the given URL.
    ///
    /// A non-success status must be reported as [`ClientError::Rejected`].
    async fn get(&self, url: &str) -> Result<Self::Response, ClientError>;

    /// Perform an HTTP `POST` of a JSON body on the given URL.
    ///
    /// A non-success status must be reported as [`ClientError::Rejected`].
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<Self::Response, ClientError>;
}

#[derive(Debug, Clone)]
/// A client that communicates with the fedwatch server's API via HTTP.
pub struct Client<C> {
    /// HTTP client
    client: C,
    /// Server URL
    base_url: Url,
}

/// Error returned when trying to create a [`Client`] with an invalid address for the server.
#[derive(Debug, Error)]
#[error("Invalid base URL: {}", .0)]
pub struct InvalidBaseUrl(String);

impl<C> Client<C>
where
    C: HttpClient,
{
    /// Create a new client.
    ///
    /// # Args
    ///
    /// - `client` is the HTTP client that will be used to perform the HTTP requests. Any HTTP
    ///   client can be used, as long as it implements the [`HttpClient`] trait.
    /// - `base_url` is the URL to the fedwatch server
    ///
    /// # Errors
    ///
    /// An error is returned if `base_url` is not a valid URL
    pub fn new(http_client: C, base_url: &str) -> Result<Self, InvalidBaseUrl> {
        let base_url = Url::parse(base_url).map_err(|e| InvalidBaseUrl(format!("{}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(InvalidBaseUrl(String::from("cannot be a base URL")));
        }
        Ok(Self {
            client: http_client,
            base_url,
        })
    }

    /// Append the given segments to the client base URL
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // cannot fail: `new` rejects URLs that cannot be a base
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get<T>(&self, segments: &[&str]) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
    {
        let url = self.url(segments);
        let data = self.client.get(url.as_str()).await?;
        Ok(serde_json::from_slice(data.as_ref())?)
    }

    async fn post<B, T>(&self, segments: &[&str], body: &B) -> Result<T, ClientError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let url = self.url(segments);
        let body = serde_json::to_vec(body)?;
        let data = self.client.post(url.as_str(), body).await?;
        Ok(serde_json::from_slice(data.as_ref())?)
    }
}

#[async_trait]
impl<C> TrainingApi for Client<C>
where
    C: HttpClient + Send + Sync + 'static,
{
    async fn ledger(&self) -> Result<Vec<LedgerEntry>, ClientError> {
        self.get(&["api", "ledger"]).await
    }

    async fn blockchain(&self) -> Result<Vec<AuditBlock>, ClientError> {
        self.get(&["api", "blockchain"]).await
    }

    async fn flower_status(&self) -> Result<TrainingStatus, ClientError> {
        self.get(&["api", "flower", "status"]).await
    }

    async fn start_training(&self, config: TrainingConfig) -> Result<Ack, ClientError> {
        self.post(&["api", "train"], &config).await
    }

    async fn stop_training(&self) -> Result<Ack, ClientError> {
        self.post(&["api", "stop"], &serde_json::json!({})).await
    }
}

#[cfg(feature = "reqwest-client")]
#[async_trait]
impl HttpClient for reqwest::Client {
    type Response = bytes::Bytes;

    async fn get(&self, url: &str) -> Result<Self::Response, ClientError> {
        let resp = reqwest::Client::get(self, url)
            .send()
            .await
            .map_err(ClientError::http_error)?;
        read_body(resp).await
    }

    async fn post(&self, url: &str, body: Vec<u8>) -> Result<Self::Response, ClientError> {
        let resp = reqwest::Client::post(self, url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(ClientError::http_error)?;
        read_body(resp).await
    }
}

#[cfg(feature = "reqwest-client")]
async fn read_body(resp: reqwest::Response) -> Result<bytes::Bytes, ClientError> {
    let status = resp.status();
    let body = resp.bytes().await.map_err(ClientError::http_error)?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(ClientError::rejected(status.as_u16(), &body))
    }
}
