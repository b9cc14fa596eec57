//! HTTP transport seam
//!
//! The aggregator only needs a status code and a byte stream; anything that
//! can produce those (a real client, a scripted replay) implements
//! [`ChatTransport`].

use crate::error::StreamError;
use crate::provider::HttpRequest;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use std::time::Duration;

/// Response body as a stream of chunks
pub type ByteStream = BoxStream<'static, Result<Bytes, StreamError>>;

/// Streaming response head plus body
pub struct TransportResponse {
    pub status: u16,
    pub body: ByteStream,
}

impl TransportResponse {
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Read the whole body; used for error responses only
    ///
    /// # Errors
    /// Propagates the first chunk error
    pub async fn collect_body(self) -> Result<Vec<u8>, StreamError> {
        self.body
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Sends a built request and hands back the streaming response
#[async_trait::async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send the request
    ///
    /// Only connection-level failures are errors; any HTTP status is a
    /// successful send.
    async fn send(&self, request: HttpRequest) -> Result<TransportResponse, StreamError>;
}

/// `reqwest`-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create with a connect timeout; the body itself is unbounded in time
    ///
    /// # Errors
    /// Returns `Transport` if the client cannot be built (TLS backend init)
    pub fn new(connect_timeout: Duration) -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ChatTransport for HttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<TransportResponse, StreamError> {
        let mut builder = self.client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        tracing::debug!(url = %request.url, "sending chat request");
        let response = builder.json(&request.body).send().await?;
        let status = response.status().as_u16();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(StreamError::from))
            .boxed();

        Ok(TransportResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn collect_body_concatenates_chunks() {
        let response = TransportResponse {
            status: 429,
            body: stream::iter(vec![
                Ok(Bytes::from_static(b"{\"error\":")),
                Ok(Bytes::from_static(b"{}}")),
            ])
            .boxed(),
        };
        assert!(!response.is_success());
        assert_eq!(response.collect_body().await.unwrap(), b"{\"error\":{}}");
    }

    #[tokio::test]
    async fn collect_body_stops_at_error() {
        let response = TransportResponse {
            status: 500,
            body: stream::iter(vec![
                Ok(Bytes::from_static(b"partial")),
                Err(StreamError::transport("reset")),
            ])
            .boxed(),
        };
        assert_eq!(
            response.collect_body().await.unwrap_err(),
            StreamError::transport("reset")
        );
    }
}
