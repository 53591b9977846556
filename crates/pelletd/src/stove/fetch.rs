use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// Raw HTTP answer from a stove's connection box
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("stove unreachable: {0}")]
    Unreachable(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("response is not valid JSON: {0}")]
    Body(#[from] serde_json::Error),
}

/// Trait for issuing plain GET requests
///
/// This trait allows for mocking the HTTP layer for testing purposes
#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError>;
}

#[async_trait]
impl<T: HttpFetch + ?Sized> HttpFetch for Arc<T> {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        (**self).get(url).await
    }
}

/// Real HTTP implementation using reqwest
pub struct ReqwestFetch {
    client: reqwest::Client,
}

impl ReqwestFetch {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent.to_string())
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetch {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_connect() {
                TransportError::Unreachable(e.to_string())
            } else {
                TransportError::Request(e)
            }
        })?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(HttpResponse { status, body })
    }
}

/// Mock fetcher for testing
///
/// Answers every request through a closure and records the requested URLs.
#[cfg(test)]
pub struct MockHttpFetch {
    handler: Box<dyn Fn(&str) -> Result<HttpResponse, TransportError> + Send + Sync>,
    requests: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl MockHttpFetch {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// A fetcher whose every request fails to connect
    pub fn unreachable() -> Self {
        Self::new(|_| {
            Err(TransportError::Unreachable("connection refused".to_string()))
        })
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl HttpFetch for MockHttpFetch {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(url.to_string());
        (self.handler)(url)
    }
}
