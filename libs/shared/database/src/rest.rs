use std::time::Duration;

use reqwest::{
    Client,
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, AUTHORIZATION},
    Method, StatusCode,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};

use shared_config::AppConfig;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rate limited by upstream: {0}")]
    RateLimited(String),

    #[error("Upstream server error ({status}): {body}")]
    Server { status: u16, body: String },

    #[error("Upstream rejected request ({status}): {body}")]
    Client { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Client not configured: {0}")]
    NotConfigured(String),
}

impl ApiError {
    /// Timeouts, 429s, 5xx and connection failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::Timeout(_) | ApiError::RateLimited(_) | ApiError::Server { .. } | ApiError::Network(_)
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Server { status, .. } | ApiError::Client { status, .. } => Some(*status),
            ApiError::RateLimited(_) => Some(429),
            _ => None,
        }
    }

    fn from_status(status: StatusCode, body: String) -> Self {
        match status.as_u16() {
            429 => ApiError::RateLimited(body),
            s if s >= 500 => ApiError::Server { status: s, body },
            s => ApiError::Client { status: s, body },
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout(e.to_string())
        } else if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            ApiError::from_status(status, e.to_string())
        } else {
            ApiError::Network(e.to_string())
        }
    }
}

/// How the client authenticates against the upstream service.
#[derive(Debug, Clone)]
pub enum AuthStyle {
    /// `apikey` plus bearer token, as PostgREST/Supabase expect.
    ServiceKey,
    /// A single named header carrying the key. Lowercase, e.g. `x-auth-key`.
    Header(&'static str),
}

pub struct RestClient {
    client: Client,
    base_url: String,
    api_key: String,
    auth: AuthStyle,
}

impl RestClient {
    pub fn new(base_url: &str, api_key: &str, auth: AuthStyle, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build HTTP client with timeout, using defaults: {}", e);
                Client::new()
            });

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            auth,
        }
    }

    pub fn for_record_store(config: &AppConfig) -> Self {
        Self::new(
            &config.record_store_url,
            &config.record_store_key,
            AuthStyle::ServiceKey,
            Duration::from_secs(config.request_timeout_seconds),
        )
    }

    pub fn for_provider(config: &AppConfig) -> Self {
        Self::new(
            &config.provider_api_url,
            &config.provider_api_key,
            AuthStyle::Header("x-auth-key"),
            Duration::from_secs(config.request_timeout_seconds),
        )
    }

    fn get_headers(&self, prefer: Option<&str>) -> Result<HeaderMap, ApiError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&self.api_key)
            .map_err(|_| ApiError::NotConfigured("API key contains invalid characters".to_string()))?;

        match &self.auth {
            AuthStyle::ServiceKey => {
                headers.insert("apikey", key);
                let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                    .map_err(|_| ApiError::NotConfigured("API key contains invalid characters".to_string()))?;
                headers.insert(AUTHORIZATION, bearer);
            }
            AuthStyle::Header(name) => {
                headers.insert(HeaderName::from_static(*name), key);
            }
        }

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(prefer) = prefer {
            if let Ok(value) = HeaderValue::from_str(prefer) {
                headers.insert("prefer", value);
            }
        }

        Ok(headers)
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        prefer: Option<&str>,
    ) -> Result<reqwest::Response, ApiError> {
        if self.base_url.is_empty() {
            return Err(ApiError::NotConfigured("base URL is empty".to_string()));
        }

        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut req = self.client.request(method, &url)
            .headers(self.get_headers(prefer)?);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("API error ({}): {}", status, error_text);
            return Err(ApiError::from_status(status, error_text));
        }

        Ok(response)
    }

    pub async fn request<T>(&self, method: Method, path: &str, body: Option<Value>) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        let response = self.execute(method, path, body, None).await?;
        response.json::<T>().await.map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Like [`request`](Self::request) but maps 404 to `None`.
    pub async fn request_optional<T>(&self, method: Method, path: &str) -> Result<Option<T>, ApiError>
    where
        T: DeserializeOwned,
    {
        match self.request::<T>(method, path, None).await {
            Ok(value) => Ok(Some(value)),
            Err(ApiError::Client { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Fire a request whose response body is ignored.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        prefer: Option<&str>,
    ) -> Result<(), ApiError> {
        self.execute(method, path, body, prefer).await?;
        Ok(())
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, auth: AuthStyle) -> RestClient {
        RestClient::new(&server.uri(), "test-key", auth, Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_request_sends_service_key_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/appointments"))
            .and(header("apikey", "test-key"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "1"}])))
            .mount(&server)
            .await;

        let client = client_for(&server, AuthStyle::ServiceKey);
        let rows: Vec<Value> = client.request(Method::GET, "/rest/v1/appointments", None).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_status_classification() {
        let server = MockServer::start().await;
        Mock::given(path("/limited"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(path("/broken"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(path("/bad"))
            .respond_with(ResponseTemplate::new(422).set_body_string("nope"))
            .mount(&server)
            .await;

        let client = client_for(&server, AuthStyle::Header("x-auth-key"));

        let limited = client.send(Method::POST, "/limited", None, None).await.unwrap_err();
        assert_matches!(limited, ApiError::RateLimited(_));
        assert!(limited.is_transient());

        let broken = client.send(Method::POST, "/broken", None, None).await.unwrap_err();
        assert_matches!(broken, ApiError::Server { status: 503, .. });
        assert!(broken.is_transient());

        let bad = client.send(Method::POST, "/bad", None, None).await.unwrap_err();
        assert_matches!(bad, ApiError::Client { status: 422, .. });
        assert!(!bad.is_transient());
    }

    #[tokio::test]
    async fn test_request_optional_maps_not_found() {
        let server = MockServer::start().await;
        Mock::given(path("/appointments/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server, AuthStyle::Header("x-auth-key"));
        let found: Option<Value> = client
            .request_optional(Method::GET, "/appointments/missing")
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_unconfigured_client_fails_fast() {
        let client = RestClient::new("", "", AuthStyle::ServiceKey, Duration::from_secs(1));
        let err = client.send(Method::GET, "/x", None, None).await.unwrap_err();
        assert_matches!(err, ApiError::NotConfigured(_));
        assert!(!err.is_transient());
    }
}
