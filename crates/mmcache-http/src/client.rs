//! REST gateway backed by `reqwest`.
//!
//! Resolves everything the stream client needs from the control plane:
//! - one-time credentials (`POST /apid/otp`)
//! - the local edge location (`GET /datacenter/local`)
//! - arbitrary JSON calls against the fabric API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::Value;

use mmcache_core::config::ClientConfig;
use mmcache_core::error::CacheError;
use mmcache_core::gateway::{ApiRequest, Credential, EdgeEndpoint, Gateway, HttpMethod};

const OTP_PATH: &str = "/apid/otp";
const LOCAL_DATACENTER_PATH: &str = "/datacenter/local";
const GENERIC_ERROR: &str = "Something went wrong";

#[derive(Debug, Deserialize)]
struct OtpResponse {
    otp: String,
}

#[derive(Debug, Deserialize)]
struct DatacenterTags {
    url: String,
}

#[derive(Debug, Deserialize)]
struct LocalDatacenter {
    tags: DatacenterTags,
}

/// HTTP implementation of [`Gateway`].
pub struct HttpGateway {
    config: ClientConfig,
    http: reqwest::Client,
}

impl HttpGateway {
    /// Build a gateway for `config`.
    pub fn new(config: ClientConfig) -> Result<Self, CacheError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| CacheError::Configuration(format!("invalid header {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| CacheError::Configuration(format!("invalid header value: {e}")))?;
            headers.insert(name, value);
        }
        if let Some(key) = &config.api_key {
            let mut value = HeaderValue::from_str(&format!("apikey {key}"))
                .map_err(|e| CacheError::Configuration(format!("invalid api key: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .default_headers(headers)
            .build()
            .map_err(|e| CacheError::Http(e.to_string()))?;

        Ok(Self { config, http })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Base URL a request path is appended to.
    ///
    /// Fabric-relative calls go to `https://api-<host>/_fabric/<fabric>`;
    /// absolute calls use the configured URL unchanged.
    pub fn base_url(&self, absolute_path: bool) -> Result<String, CacheError> {
        let url = self.config.url.trim_end_matches('/');
        if absolute_path || self.config.absolute_path {
            return Ok(url.to_string());
        }
        let host = url
            .strip_prefix("https://")
            .ok_or_else(|| {
                CacheError::Configuration(format!("federation url must start with https://: {url}"))
            })?;
        let mut base = format!("https://api-{host}");
        if !self.config.fabric.is_empty() {
            base.push_str("/_fabric/");
            base.push_str(&self.config.fabric);
        }
        Ok(base)
    }

    fn method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn request_credential(&self) -> Result<Credential, CacheError> {
        let body = self.request(ApiRequest::post(OTP_PATH).absolute()).await?;
        let otp: OtpResponse = serde_json::from_value(body)?;
        Ok(Credential::new(otp.otp))
    }

    async fn request_edge_endpoint(&self) -> Result<EdgeEndpoint, CacheError> {
        let body = self.request(ApiRequest::get(LOCAL_DATACENTER_PATH).absolute()).await?;
        let dc: LocalDatacenter = serde_json::from_value(body)?;
        Ok(EdgeEndpoint::new(format!("api-{}", dc.tags.url)))
    }

    async fn request(&self, req: ApiRequest) -> Result<Value, CacheError> {
        let url = format!("{}{}", self.base_url(req.absolute_path)?, req.path);
        tracing::debug!(method = %req.method, url = %url, "gateway request");

        let mut builder = self.http.request(Self::method(req.method), &url);
        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| CacheError::Http(e.to_string()))?;
        let status = resp.status().as_u16();
        let text = resp.text().await.map_err(|e| CacheError::Http(e.to_string()))?;

        match status {
            200 | 202 => {
                if text.trim().is_empty() {
                    Ok(Value::Null)
                } else {
                    Ok(serde_json::from_str(&text)?)
                }
            }
            s if s >= 400 => {
                let message = serde_json::from_str::<Value>(&text)
                    .ok()
                    .and_then(|v| v.get("errorMessage").and_then(|m| m.as_str()).map(String::from))
                    .unwrap_or(text);
                tracing::warn!(status = s, url = %url, "gateway returned an error");
                Err(CacheError::Remote { status: s, message })
            }
            _ => Err(CacheError::Remote {
                status: 500,
                message: GENERIC_ERROR.into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer) -> HttpGateway {
        let mut config = ClientConfig::new(server.uri()).with_api_key("k3y");
        config.absolute_path = true;
        HttpGateway::new(config).unwrap()
    }

    #[test]
    fn fabric_base_url() {
        let gw = HttpGateway::new(ClientConfig::new("https://gdn.example.io/").with_fabric("shop"))
            .unwrap();
        assert_eq!(gw.base_url(false).unwrap(), "https://api-gdn.example.io/_fabric/shop");
        assert_eq!(gw.base_url(true).unwrap(), "https://gdn.example.io");
    }

    #[test]
    fn plain_http_url_needs_absolute_path() {
        let gw = HttpGateway::new(ClientConfig::new("http://gdn.example.io")).unwrap();
        assert!(gw.base_url(false).unwrap_err().is_configuration());
    }

    #[tokio::test]
    async fn credential_is_fetched_with_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/apid/otp"))
            .and(header("authorization", "apikey k3y"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"otp": "one-time"})))
            .expect(1)
            .mount(&server)
            .await;

        let cred = gateway(&server).request_credential().await.unwrap();
        assert_eq!(cred.expose(), "one-time");
    }

    #[tokio::test]
    async fn edge_endpoint_is_prefixed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/datacenter/local"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "_key": "gdn-us-west",
                "local": true,
                "tags": {"url": "gdn-us-west.example.io"}
            })))
            .mount(&server)
            .await;

        let edge = gateway(&server).request_edge_endpoint().await.unwrap();
        assert_eq!(edge.host, "api-gdn-us-west.example.io");
    }

    #[tokio::test]
    async fn error_status_maps_to_remote() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/apid/otp"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": true,
                "code": 401,
                "errorMessage": "not authorized to execute this request"
            })))
            .mount(&server)
            .await;

        let err = gateway(&server).request_credential().await.unwrap_err();
        match err {
            CacheError::Remote { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "not authorized to execute this request");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let unauthorized = CacheError::Remote {
            status: 401,
            message: String::new(),
        };
        assert!(unauthorized.is_retryable());
    }

    #[tokio::test]
    async fn unexpected_success_status_is_generic_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/datacenter/local"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let err = gateway(&server).request_edge_endpoint().await.unwrap_err();
        assert!(matches!(err, CacheError::Remote { status: 500, .. }));
    }

    #[tokio::test]
    async fn generic_request_sends_query_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_api/kv/mmcache/value"))
            .and(query_param("strategy", "update"))
            .and(body_json(json!([{"_key": "a", "value": 1}])))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let resp = gateway(&server)
            .request(
                ApiRequest::post("/_api/kv/mmcache/value")
                    .with_query("strategy", "update")
                    .with_body(json!([{"_key": "a", "value": 1}])),
            )
            .await
            .unwrap();
        assert_eq!(resp, json!({"ok": true}));
    }
}
