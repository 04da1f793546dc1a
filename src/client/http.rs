//! Outbound HTTP used by config fetches, the long poll and meta-server discovery.

use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::async_task::run_with_timeout;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub timeout: Duration,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn get(
        url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            url: url.into(),
            timeout,
            headers: Vec::new(),
        }
    }

    pub fn with_headers(
        mut self,
        headers: Vec<(String, String)>,
    ) -> Self {
        self.headers = headers;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(
        status: u16,
        body: impl Into<String>,
    ) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Transport seam; any status code is a successful call, only I/O failures
/// and timeouts are errors.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    async fn get(
        &self,
        request: HttpRequest,
    ) -> Result<HttpResponse>;
}

/// [`HttpClient`] over a shared `reqwest` connection pool.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(
        &self,
        request: HttpRequest,
    ) -> Result<HttpResponse> {
        trace!("GET {}", request.url);
        let HttpRequest {
            url,
            timeout,
            headers,
        } = request;

        run_with_timeout(&url, timeout, async {
            let mut builder = self.client.get(&url);
            for (name, value) in &headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            Ok(HttpResponse { status, body })
        })
        .await
    }
}
