use reqwest::header::AUTHORIZATION;
use reqwest::Client as HttpClient;
use serde_json::Value;
use std::time::Duration;

use crate::api::middleware::AppError;
use crate::models::{ConnectionConfig, HttpMethod, Row, SourceConfig};

/// HTTP client for API data sources
pub struct ApiClient {
    http_client: HttpClient,
}

impl ApiClient {
    pub fn new(timeout: Duration) -> Result<Self, AppError> {
        let http_client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http_client })
    }

    /// Resolve the request URL from an absolute endpoint or `baseUrl` + endpoint
    pub fn resolve_url(config: &ConnectionConfig, source: &SourceConfig) -> Result<String, AppError> {
        let endpoint = source.endpoint.as_deref().map(str::trim).filter(|e| !e.is_empty());
        let base = config.base_url.as_deref().map(str::trim).filter(|b| !b.is_empty());

        match (base, endpoint) {
            (_, Some(endpoint)) if endpoint.starts_with("http://") || endpoint.starts_with("https://") => {
                Ok(endpoint.to_string())
            }
            (Some(base), Some(endpoint)) => Ok(format!(
                "{}/{}",
                base.trim_end_matches('/'),
                endpoint.trim_start_matches('/')
            )),
            (Some(base), None) => Ok(base.to_string()),
            (None, _) => Err(AppError::Validation(
                "API source requires baseUrl or an absolute endpoint".to_string(),
            )),
        }
    }

    fn request(
        &self,
        method: HttpMethod,
        url: &str,
        config: &ConnectionConfig,
        source: Option<&SourceConfig>,
    ) -> reqwest::RequestBuilder {
        let mut request = match method {
            HttpMethod::Get => self.http_client.get(url),
            HttpMethod::Post => self.http_client.post(url),
        };

        let mut has_authorization = false;
        let extra_headers = source.map(|s| s.headers.iter()).into_iter().flatten();
        for (name, value) in config.headers.iter().chain(extra_headers) {
            has_authorization |= name.eq_ignore_ascii_case(AUTHORIZATION.as_str());
            request = request.header(name.as_str(), value.as_str());
        }

        // Add API key unless the caller supplied its own Authorization header
        if let Some(api_key) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
            if !has_authorization {
                request = request.header(AUTHORIZATION, format!("Bearer {}", api_key));
            }
        }

        if let (HttpMethod::Post, Some(body)) = (method, source.and_then(|s| s.body.as_ref())) {
            request = request.json(body);
        }
        request
    }

    /// Call the endpoint and return its JSON body as rows
    pub async fn fetch_rows(&self, config: &ConnectionConfig, source: &SourceConfig) -> Result<Vec<Row>, AppError> {
        let url = Self::resolve_url(config, source)?;
        tracing::debug!("Fetching API data from {}", url);

        let response = self
            .request(source.method, &url, config, Some(source))
            .send()
            .await
            .map_err(|e| AppError::Connection(format!("Request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::Connection(format!(
                "API returned error {}: {}",
                status, error_text
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::Parse(format!("API response is not valid JSON: {}", e)))?;

        Ok(Self::body_to_rows(body))
    }

    /// Check that the base URL answers with a success status
    pub async fn ping(&self, config: &ConnectionConfig) -> Result<(), AppError> {
        let url = Self::resolve_url(config, &SourceConfig::default())?;
        let response = self
            .request(HttpMethod::Get, &url, config, None)
            .send()
            .await
            .map_err(|e| AppError::Connection(format!("Request to {} failed: {}", url, e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(AppError::Connection(format!("API returned status {}", response.status())))
        }
    }

    /// An array becomes one row per element and an object a single row.
    /// Non-object values are kept under a `value` column.
    pub fn body_to_rows(body: Value) -> Vec<Row> {
        let to_row = |item: Value| match item {
            Value::Object(map) => map,
            other => {
                let mut row = Row::new();
                row.insert("value".to_string(), other);
                row
            }
        };

        match body {
            Value::Array(items) => items.into_iter().map(to_row).collect(),
            Value::Null => Vec::new(),
            other => vec![to_row(other)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(base: Option<&str>) -> ConnectionConfig {
        ConnectionConfig {
            base_url: base.map(str::to_string),
            ..Default::default()
        }
    }

    fn source(endpoint: Option<&str>) -> SourceConfig {
        SourceConfig {
            endpoint: endpoint.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_url() {
        assert_eq!(
            ApiClient::resolve_url(&config(Some("https://api.example.com/v1/")), &source(Some("/users"))).unwrap(),
            "https://api.example.com/v1/users"
        );
        assert_eq!(
            ApiClient::resolve_url(&config(Some("https://a.example.com")), &source(Some("https://b.example.com/x")))
                .unwrap(),
            "https://b.example.com/x"
        );
        assert_eq!(
            ApiClient::resolve_url(&config(Some("https://a.example.com")), &source(None)).unwrap(),
            "https://a.example.com"
        );
        assert!(matches!(
            ApiClient::resolve_url(&config(None), &source(Some("/users"))),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_body_to_rows() {
        let rows = ApiClient::body_to_rows(json!([{ "id": 1 }, { "id": 2 }]));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["id"], json!(2));

        let rows = ApiClient::body_to_rows(json!({ "id": 7, "name": "only" }));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], json!("only"));

        let rows = ApiClient::body_to_rows(json!([1, "two"]));
        assert_eq!(rows[1]["value"], json!("two"));

        assert!(ApiClient::body_to_rows(Value::Null).is_empty());
    }

    #[test]
    fn test_api_key_becomes_bearer_header() {
        let client = ApiClient::new(Duration::from_secs(5)).unwrap();
        let mut cfg = config(Some("https://api.example.com"));
        cfg.api_key = Some("sk-test".to_string());

        let request = client
            .request(HttpMethod::Get, "https://api.example.com", &cfg, None)
            .build()
            .unwrap();
        assert_eq!(request.headers()[AUTHORIZATION], "Bearer sk-test");

        cfg.headers.insert("Authorization".to_string(), "Token abc".to_string());
        let request = client
            .request(HttpMethod::Get, "https://api.example.com", &cfg, None)
            .build()
            .unwrap();
        assert_eq!(request.headers()[AUTHORIZATION], "Token abc");
    }

    #[test]
    fn test_post_sends_body() {
        let client = ApiClient::new(Duration::from_secs(5)).unwrap();
        let src = SourceConfig {
            method: HttpMethod::Post,
            body: Some(json!({ "q": "x" })),
            ..Default::default()
        };
        let request = client
            .request(HttpMethod::Post, "https://api.example.com/search", &config(None), Some(&src))
            .build()
            .unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.body().and_then(|b| b.as_bytes()), Some(&br#"{"q":"x"}"#[..]));
    }
}
