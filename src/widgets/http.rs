use crate::errors::{AppError, AppResult};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub form: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            form: Vec::new(),
        }
    }

    pub fn post_form(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            form,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: String,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_str(&self.body).ok()
    }
}

/// Outbound HTTP used by widgets. `None` means the request never produced a
/// response (DNS, TLS, timeout); callers treat it like any other failure.
pub trait HttpClient: Send + Sync {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'_, Option<HttpResponse>>;
}

/// Checks whether a URL serves a loadable image within a bounded time.
pub trait ImageProbe: Send + Sync {
    fn probe(&self, url: String) -> BoxFuture<'_, bool>;
}

#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("stackdash/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|error| AppError::Internal(format!("failed to build HTTP client: {error}")))?;
        Ok(Self { client })
    }

    async fn send(&self, request: HttpRequest) -> Option<HttpResponse> {
        let builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url).form(&request.form),
        };
        let response = match builder.send().await {
            Ok(response) => response,
            Err(error) => {
                tracing::debug!(url = %request.url, error = %error, "request failed");
                return None;
            }
        };
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let body = match response.text().await {
            Ok(body) => body,
            Err(error) => {
                tracing::debug!(url = %request.url, error = %error, "failed to read response body");
                return None;
            }
        };
        Some(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}

impl HttpClient for ReqwestClient {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'_, Option<HttpResponse>> {
        Box::pin(self.send(request))
    }
}

/// Probes images with a plain GET bounded by a short timeout.
#[derive(Debug, Clone)]
pub struct HttpImageProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpImageProbe {
    pub fn new(timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|error| AppError::Internal(format!("failed to build HTTP client: {error}")))?;
        Ok(Self { client, timeout })
    }

    async fn check(&self, url: String) -> bool {
        if url.is_empty() {
            return false;
        }
        if url.starts_with("data:image/") {
            return true;
        }
        let request = self.client.get(&url).send();
        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(response)) => {
                let is_image = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|value| value.to_str().ok())
                    .map_or(true, |value| value.starts_with("image/"));
                response.status().is_success() && is_image
            }
            Ok(Err(error)) => {
                tracing::debug!(url = %url, error = %error, "image probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(url = %url, "image probe timed out");
                false
            }
        }
    }
}

impl ImageProbe for HttpImageProbe {
    fn probe(&self, url: String) -> BoxFuture<'_, bool> {
        Box::pin(self.check(url))
    }
}
