//! HTTP transport layer for the Cascade SDK.

use crate::config::ClientConfig;
use crate::error::{CascadeError, CascadeResult};
use reqwest::{header, Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Whether a request may be sent again after the server may have acted on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idempotency {
    Idempotent,
    /// Only retried when the request never reached the server or was throttled
    NonIdempotent,
}

/// HTTP transport for making API requests.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    config: Arc<ClientConfig>,
}

impl HttpTransport {
    /// Create a new HTTP transport with the given configuration.
    pub fn new(config: Arc<ClientConfig>) -> CascadeResult<Self> {
        let mut headers = header::HeaderMap::new();

        if let Some(ref api_key) = config.api_key {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {}", api_key))
                    .map_err(|_| CascadeError::Config("Invalid API key format".to_string()))?,
            );
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self { client, config })
    }

    /// Build a URL for the given path.
    fn build_url(&self, path: &str) -> CascadeResult<url::Url> {
        self.config
            .base_url
            .join(path)
            .map_err(CascadeError::InvalidUrl)
    }

    /// Execute a request with retries.
    async fn execute_with_retry(
        &self,
        request_builder: RequestBuilder,
        idempotency: Idempotency,
    ) -> CascadeResult<Response> {
        let retry_config = &self.config.retry_config;
        let mut attempts = 0;

        loop {
            let request = request_builder
                .try_clone()
                .ok_or_else(|| CascadeError::Config("Request cannot be cloned".to_string()))?;

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();

                    if response.status().is_success() {
                        return Ok(response);
                    }

                    let replayable = idempotency == Idempotency::Idempotent || status == 429;
                    if attempts < retry_config.max_retries
                        && replayable
                        && retry_config.should_retry_status(status)
                    {
                        let backoff = retry_config.backoff_for_attempt(attempts);
                        warn!(
                            status = status,
                            attempt = attempts + 1,
                            backoff_ms = backoff.as_millis(),
                            "Request failed, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                        attempts += 1;
                        continue;
                    }

                    let body = response.text().await.unwrap_or_default();
                    return Err(CascadeError::from_response(status, &body));
                }
                Err(e) => {
                    if attempts < retry_config.max_retries && e.is_connect() {
                        let backoff = retry_config.backoff_for_attempt(attempts);
                        warn!(
                            attempt = attempts + 1,
                            backoff_ms = backoff.as_millis(),
                            "Connection failed, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                        attempts += 1;
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }
    }

    /// Execute a GET request.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> CascadeResult<T> {
        let url = self.build_url(path)?;
        debug!(url = %url, "GET request");

        let response = self.execute_with_retry(self.client.get(url), Idempotency::Idempotent).await?;
        let body = response.json().await?;
        Ok(body)
    }

    /// Execute a POST request.
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> CascadeResult<T> {
        let url = self.build_url(path)?;
        debug!(url = %url, "POST request");

        let response = self
            .execute_with_retry(self.client.post(url).json(body), Idempotency::Idempotent)
            .await?;
        let body = response.json().await?;
        Ok(body)
    }

    /// Execute a POST request that may block on the server.
    ///
    /// The request timeout is extended by `wait` so the server's own timeout
    /// answers first.
    pub async fn post_with_query<T: DeserializeOwned, Q: Serialize, B: Serialize>(
        &self,
        path: &str,
        query: &Q,
        body: &B,
        wait: Duration,
        idempotency: Idempotency,
    ) -> CascadeResult<T> {
        let url = self.build_url(path)?;
        debug!(url = %url, "POST request with query");

        let response = self
            .execute_with_retry(
                self.client
                    .post(url)
                    .query(query)
                    .json(body)
                    .timeout(self.config.timeout + wait),
                idempotency,
            )
            .await?;
        let body = response.json().await?;
        Ok(body)
    }

    /// Execute a DELETE request without a response body.
    pub async fn delete_no_response(&self, path: &str) -> CascadeResult<()> {
        let url = self.build_url(path)?;
        debug!(url = %url, "DELETE request (no response)");

        self.execute_with_retry(self.client.delete(url), Idempotency::Idempotent)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use serde::{Deserialize, Serialize};
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestResponse {
        message: String,
        value: i32,
    }

    fn create_config(base_url: &str, retry_config: RetryConfig) -> Arc<ClientConfig> {
        Arc::new(ClientConfig {
            base_url: url::Url::parse(base_url).unwrap(),
            api_key: None,
            timeout: Duration::from_secs(30),
            retry_config,
        })
    }

    #[tokio::test]
    async fn test_get_request() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(TestResponse {
                message: "success".to_string(),
                value: 42,
            }))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(create_config(&server.uri(), RetryConfig::no_retry())).unwrap();

        let result: TestResponse = transport.get("/api/test").await.unwrap();
        assert_eq!(result.value, 42);
    }

    #[tokio::test]
    async fn test_post_with_query() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/graphs/g/invocations"))
            .and(query_param("block_until_finish", "true"))
            .and(body_json(serde_json::json!({ "payload": 1 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(TestResponse {
                message: "invoked".to_string(),
                value: 1,
            }))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(create_config(&server.uri(), RetryConfig::no_retry())).unwrap();

        let result: TestResponse = transport
            .post_with_query(
                "/api/graphs/g/invocations",
                &[("block_until_finish", "true")],
                &serde_json::json!({ "payload": 1 }),
                Duration::from_secs(1),
                Idempotency::NonIdempotent,
            )
            .await
            .unwrap();
        assert_eq!(result.message, "invoked");
    }

    #[tokio::test]
    async fn test_authorization_header() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/protected"))
            .and(header("Authorization", "Bearer sk-test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(TestResponse {
                message: "authorized".to_string(),
                value: 100,
            }))
            .mount(&server)
            .await;

        let mut config = ClientConfig::new(url::Url::parse(&server.uri()).unwrap());
        config.api_key = Some("sk-test-key".to_string());
        let transport = HttpTransport::new(Arc::new(config)).unwrap();

        let result: TestResponse = transport.get("/api/protected").await.unwrap();
        assert_eq!(result.message, "authorized");
    }

    #[tokio::test]
    async fn test_retries_on_server_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_json(TestResponse {
                message: "recovered".to_string(),
                value: 3,
            }))
            .mount(&server)
            .await;

        let retry_config = RetryConfig {
            initial_backoff: Duration::from_millis(1),
            ..Default::default()
        };
        let transport = HttpTransport::new(create_config(&server.uri(), retry_config)).unwrap();

        let result: TestResponse = transport.get("/api/flaky").await.unwrap();
        assert_eq!(result.message, "recovered");
    }

    #[tokio::test]
    async fn test_non_idempotent_post_not_replayed_after_server_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/graphs/g/invocations"))
            .respond_with(ResponseTemplate::new(502))
            .expect(1)
            .mount(&server)
            .await;

        let retry_config = RetryConfig {
            initial_backoff: Duration::from_millis(1),
            ..Default::default()
        };
        let transport = HttpTransport::new(create_config(&server.uri(), retry_config)).unwrap();

        let result: CascadeResult<TestResponse> = transport
            .post_with_query(
                "/api/graphs/g/invocations",
                &[("block_until_finish", "false")],
                &serde_json::json!({ "payload": 1 }),
                Duration::ZERO,
                Idempotency::NonIdempotent,
            )
            .await;
        assert!(matches!(result, Err(CascadeError::Api { status: 502, .. })));
    }

    #[tokio::test]
    async fn test_non_idempotent_post_retried_when_throttled() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/graphs/g/invocations"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/graphs/g/invocations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(TestResponse {
                message: "invoked".to_string(),
                value: 2,
            }))
            .mount(&server)
            .await;

        let retry_config = RetryConfig {
            initial_backoff: Duration::from_millis(1),
            ..Default::default()
        };
        let transport = HttpTransport::new(create_config(&server.uri(), retry_config)).unwrap();

        let result: TestResponse = transport
            .post_with_query(
                "/api/graphs/g/invocations",
                &[("block_until_finish", "false")],
                &serde_json::json!({ "payload": 1 }),
                Duration::ZERO,
                Idempotency::NonIdempotent,
            )
            .await
            .unwrap();
        assert_eq!(result.value, 2);
    }

    #[tokio::test]
    async fn test_not_found_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/graphs/missing"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({"error": "graph not found: missing"})),
            )
            .mount(&server)
            .await;

        let transport = HttpTransport::new(create_config(&server.uri(), RetryConfig::default())).unwrap();

        let result: CascadeResult<TestResponse> = transport.get("/api/graphs/missing").await;
        match result {
            Err(CascadeError::NotFound(message)) => assert!(message.contains("missing")),
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_no_response() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/api/graphs/g"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(create_config(&server.uri(), RetryConfig::no_retry())).unwrap();
        transport.delete_no_response("/api/graphs/g").await.unwrap();
    }

    #[tokio::test]
    async fn test_build_url_with_trailing_slash() {
        let transport =
            HttpTransport::new(create_config("http://localhost:8900/", RetryConfig::no_retry())).unwrap();

        let url = transport.build_url("api/graphs").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8900/api/graphs");
    }
}
