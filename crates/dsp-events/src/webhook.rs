//! Webhook delivery
//!
//! Webhook listeners are queued while the dispatcher walks its listener list
//! and sent together as one batch. A batch never fails as a whole: each
//! request succeeds or fails on its own and the failures are reported in a
//! [`WebhookBatchError`].

use std::sync::Arc;

use dsp_http::HttpClientTrait;
use futures::future::join_all;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

/// One failed delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookFailure {
    pub url: String,
    pub reason: String,
}

/// Partial failure of a webhook batch
#[derive(Debug, Clone, Error)]
#[error("{} of {} webhook deliveries failed", .failures.len(), .failures.len() + .succeeded.len())]
pub struct WebhookBatchError {
    /// Requests that failed, with the reason
    pub failures: Vec<WebhookFailure>,
    /// Requests that were delivered
    pub succeeded: Vec<String>,
}

impl WebhookBatchError {
    /// Log every request of the batch individually
    pub fn log(&self, event_name: &str) {
        for failure in &self.failures {
            error!(event_name, url = %failure.url, "Action event exception: {}", failure.reason);
        }
        for url in &self.succeeded {
            debug!(event_name, url = %url, "Dispatch success");
        }
    }
}

/// Queue of webhook URLs awaiting delivery
#[derive(Debug, Clone, Default)]
pub struct WebhookBatch {
    urls: Vec<Url>,
}

impl WebhookBatch {
    /// Empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `url`
    pub fn push(&mut self, url: Url) {
        self.urls.push(url);
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Number of queued URLs
    pub fn len(&self) -> usize {
        self.urls.len()
    }

    /// Take the queued URLs, leaving the batch empty
    pub fn take(&mut self) -> Vec<Url> {
        std::mem::take(&mut self.urls)
    }
}

/// Sends webhook batches over an HTTP client
#[derive(Clone)]
pub struct WebhookSender {
    client: Arc<dyn HttpClientTrait>,
}

impl WebhookSender {
    /// Sender using `client`
    pub fn new(client: Arc<dyn HttpClientTrait>) -> Self {
        Self { client }
    }

    /// POST `body` to every URL concurrently
    ///
    /// Returns the delivered URLs, or a [`WebhookBatchError`] listing which
    /// requests failed and which succeeded.
    pub async fn send(
        &self,
        urls: &[Url],
        body: &Value,
    ) -> std::result::Result<Vec<String>, WebhookBatchError> {
        let requests = urls.iter().map(|url| async move {
            let result = self.client.post_json(url.as_str(), body).await;
            (url.to_string(), result)
        });

        let mut failures = Vec::new();
        let mut succeeded = Vec::new();

        for (url, result) in join_all(requests).await {
            match result {
                Ok(status) => {
                    debug!(url = %url, status = %status, "Webhook delivered");
                    succeeded.push(url);
                }
                Err(e) => failures.push(WebhookFailure {
                    url,
                    reason: e.to_string(),
                }),
            }
        }

        if failures.is_empty() {
            Ok(succeeded)
        } else {
            Err(WebhookBatchError {
                failures,
                succeeded,
            })
        }
    }
}

impl std::fmt::Debug for WebhookSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSender").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsp_http::{HttpClient, HttpConfig};
    use serde_json::json;
    use wiremock::{
        matchers::{body_json, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn sender() -> WebhookSender {
        WebhookSender::new(Arc::new(HttpClient::new(HttpConfig::fast()).unwrap()))
    }

    #[tokio::test]
    async fn test_batch_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(json!({"event": "x"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let urls = vec![
            Url::parse(&format!("{}/a", server.uri())).unwrap(),
            Url::parse(&format!("{}/b", server.uri())).unwrap(),
        ];
        let delivered = sender().send(&urls, &json!({"event": "x"})).await.unwrap();
        assert_eq!(delivered.len(), 2);
    }

    #[tokio::test]
    async fn test_partial_failure_reports_both_sides() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let ok = Url::parse(&format!("{}/ok", server.uri())).unwrap();
        let broken = Url::parse(&format!("{}/broken", server.uri())).unwrap();

        let err = sender()
            .send(&[ok.clone(), broken.clone()], &json!({}))
            .await
            .unwrap_err();

        assert_eq!(err.succeeded, vec![ok.to_string()]);
        assert_eq!(err.failures.len(), 1);
        assert_eq!(err.failures[0].url, broken.to_string());
        assert_eq!(err.to_string(), "1 of 2 webhook deliveries failed");
    }

    #[test]
    fn test_batch_take() {
        let mut batch = WebhookBatch::new();
        batch.push(Url::parse("https://example.test/hook").unwrap());
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.take().len(), 1);
        assert!(batch.is_empty());
    }
}
