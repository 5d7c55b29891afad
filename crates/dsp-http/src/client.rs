//! HTTP client implementation

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{header, Response, StatusCode};
use tracing::debug;

use crate::{
    config::HttpConfig,
    error::{HttpError, Result},
    middleware::{RetryConfig, RetryMiddleware},
};

/// Mockable HTTP client trait
#[async_trait]
pub trait HttpClientTrait: Send + Sync {
    /// POST `body` as JSON, retrying transient failures.
    ///
    /// Returns the final status code of a successful (2xx) delivery.
    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<StatusCode>;
}

/// Production HTTP client
pub struct HttpClient {
    inner: reqwest::Client,
    config: HttpConfig,
    retry: RetryMiddleware,
}

impl HttpClient {
    /// Create a new HTTP client with configuration
    pub fn new(config: HttpConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(&config.user_agent)
            .redirect(if config.max_redirects > 0 {
                reqwest::redirect::Policy::limited(config.max_redirects)
            } else {
                reqwest::redirect::Policy::none()
            });

        if let Some(proxy_url) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| HttpError::InvalidProxy(e.to_string()))?;
            builder = builder.proxy(proxy);
        }

        let inner = builder
            .build()
            .map_err(|e| HttpError::BuildError(e.to_string()))?;

        let retry = RetryMiddleware::new(RetryConfig {
            max_attempts: config.retry_count,
            initial_delay: config.retry_delay(),
            ..Default::default()
        });

        Ok(Self {
            inner,
            config,
            retry,
        })
    }

    /// Get configuration
    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    fn parse_url(url: &str) -> Result<url::Url> {
        url.parse::<url::Url>()
            .map_err(|e| HttpError::InvalidUrl(format!("{url}: {e}")))
    }

    async fn check_status(response: Response) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }

        Err(HttpError::HttpStatus {
            status: response.status(),
            message: response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string()),
        })
    }
}

#[async_trait]
impl HttpClientTrait for HttpClient {
    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<StatusCode> {
        let target = Self::parse_url(url)?;
        let payload = serde_json::to_vec_pretty(body)?;

        self.retry
            .execute(|attempt| {
                let target = target.clone();
                let request = self
                    .inner
                    .post(target.clone())
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(payload.clone());
                async move {
                    debug!(url = %target, attempt, "HTTP POST (json)");
                    let response = request.send().await.map_err(|e| {
                        if e.is_timeout() {
                            HttpError::Timeout(self.config.timeout())
                        } else {
                            HttpError::RequestFailed(e)
                        }
                    })?;
                    Ok(Self::check_status(response).await?.status())
                }
            })
            .await
    }
}

/// Create a shared HTTP client (Arc-wrapped for cloning)
pub fn shared_client(config: HttpConfig) -> Result<Arc<dyn HttpClientTrait>> {
    Ok(Arc::new(HttpClient::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    #[test]
    fn test_client_creation_with_config() {
        let client = HttpClient::new(HttpConfig::webhook()).unwrap();
        assert_eq!(client.config().retry_count, 1);
    }

    #[test]
    fn test_invalid_proxy() {
        let config = HttpConfig::default().with_proxy("http://[::1");

        let result = HttpClient::new(config);
        assert!(matches!(result, Err(HttpError::InvalidProxy(_))));
    }

    #[tokio::test]
    async fn test_post_json_invalid_url() {
        let client = HttpClient::new(HttpConfig::default()).unwrap();
        let result = client.post_json("not a url", &serde_json::json!({})).await;
        assert!(matches!(result, Err(HttpError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_post_json_sends_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::new(HttpConfig::fast()).unwrap();
        let status = client
            .post_json(&format!("{}/hook", server.uri()), &serde_json::json!({"a": 1}))
            .await
            .unwrap();

        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_post_json_surfaces_client_error_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("nope"))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::new(HttpConfig::fast().with_retry_count(2)).unwrap();
        let result = client
            .post_json(&server.uri(), &serde_json::json!({}))
            .await;

        assert!(matches!(
            result,
            Err(HttpError::HttpStatus { status, .. }) if status == StatusCode::BAD_REQUEST
        ));
    }
}
