//! Tuya OpenAPI telemetry source.
//!
//! Every request is signed with HMAC-SHA256 over
//! `client_id [+ access_token] + t + nonce + stringToSign`, where
//! `stringToSign = METHOD \n sha256(body) \n headers \n path?query`.
//! A session starts with `GET /v1.0/token?grant_type=1`; device reads then carry
//! the returned access token.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::TuyaConfig;
use crate::error::{AppError, Result};
use crate::telemetry::RawProperty;

type HmacSha256 = Hmac<Sha256>;

const SIGN_METHOD: &str = "HMAC-SHA256";
const TOKEN_PATH: &str = "/v1.0/token?grant_type=1";

/// Source of raw device properties.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Establish a session. A failure here aborts the whole cycle.
    async fn connect(&mut self) -> Result<()>;

    /// Read the current properties of one device. `codes` lists the property
    /// codes of interest; sources that always return every property ignore it.
    async fn device_properties(&self, device_id: &str, codes: &[String])
        -> Result<Vec<RawProperty>>;
}

/// Which status endpoint to read devices from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusApi {
    /// `/v1.0/devices/{id}/status`, result is the property list.
    #[default]
    DeviceStatus,
    /// `/v2.0/cloud/thing/{id}/shadow/properties?codes=..`, result holds a
    /// `properties` list.
    ShadowProperties,
}

impl StatusApi {
    fn path(&self, device_id: &str, codes: &[String]) -> String {
        match self {
            StatusApi::DeviceStatus => format!("/v1.0/devices/{}/status", device_id),
            StatusApi::ShadowProperties if codes.is_empty() => {
                format!("/v2.0/cloud/thing/{}/shadow/properties", device_id)
            }
            StatusApi::ShadowProperties => format!(
                "/v2.0/cloud/thing/{}/shadow/properties?codes={}",
                device_id,
                codes.join(",")
            ),
        }
    }

    fn properties(&self, result: Value) -> Vec<RawProperty> {
        let list = match (self, result) {
            (StatusApi::DeviceStatus, Value::Array(items)) => items,
            (StatusApi::ShadowProperties, Value::Object(mut obj)) => {
                match obj.remove("properties") {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                }
            }
            _ => Vec::new(),
        };

        list.into_iter()
            .filter_map(|item| serde_json::from_value::<RawProperty>(item).ok())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    msg: Option<String>,
    result: Option<T>,
}

impl<T> ApiResponse<T> {
    fn into_result(self) -> Result<T> {
        match (self.success, self.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(AppError::Tuya {
                code: self.code.unwrap_or(-1),
                msg: self.msg.unwrap_or_else(|| "unsuccessful response".to_string()),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResult {
    access_token: String,
    #[serde(default)]
    expire_time: u64,
}

pub struct TuyaClient {
    client: Client,
    endpoint: String,
    access_id: String,
    access_secret: String,
    status_api: StatusApi,
    access_token: Option<String>,
}

impl std::fmt::Debug for TuyaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TuyaClient")
            .field("endpoint", &self.endpoint)
            .field("access_id", &self.access_id)
            .field("status_api", &self.status_api)
            .field("connected", &self.access_token.is_some())
            .finish()
    }
}

impl TuyaClient {
    pub fn new(cfg: &TuyaConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            access_id: cfg.access_id.clone(),
            access_secret: cfg.access_secret.clone(),
            status_api: cfg.status_api,
            access_token: None,
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path_and_query: &str,
        access_token: Option<&str>,
    ) -> Result<T> {
        let t = chrono::Utc::now().timestamp_millis().to_string();
        let nonce = uuid::Uuid::new_v4().to_string();
        let to_sign = string_to_sign(&Method::GET, b"", path_and_query);
        let payload = format!(
            "{}{}{}{}{}",
            self.access_id,
            access_token.unwrap_or(""),
            t,
            nonce,
            to_sign
        );
        let signature = sign(&self.access_secret, &payload)?;

        let mut request = self
            .client
            .get(format!("{}{}", self.endpoint, path_and_query))
            .header("client_id", &self.access_id)
            .header("sign", signature)
            .header("sign_method", SIGN_METHOD)
            .header("t", t)
            .header("nonce", nonce);
        if let Some(token) = access_token {
            request = request.header("access_token", token);
        }

        let response = request.send().await?.error_for_status()?;
        let envelope: ApiResponse<T> = response.json().await?;
        envelope.into_result()
    }
}

#[async_trait]
impl TelemetrySource for TuyaClient {
    async fn connect(&mut self) -> Result<()> {
        let token: TokenResult = self.get(TOKEN_PATH, None).await?;
        debug!(expires_in = token.expire_time, "obtained Tuya access token");
        self.access_token = Some(token.access_token);
        Ok(())
    }

    async fn device_properties(
        &self,
        device_id: &str,
        codes: &[String],
    ) -> Result<Vec<RawProperty>> {
        let token = self
            .access_token
            .as_deref()
            .ok_or_else(|| AppError::Config("Tuya session is not connected".to_string()))?;

        let path = self.status_api.path(device_id, codes);
        let result: Value = self.get(&path, Some(token)).await?;
        let properties = self.status_api.properties(result);
        if properties.is_empty() {
            warn!(device_id = %device_id, "device status contained no properties");
        }
        Ok(properties)
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Custom signature headers are not used, so that line stays empty.
fn string_to_sign(method: &Method, body: &[u8], path_and_query: &str) -> String {
    format!(
        "{}\n{}\n\n{}",
        method.as_str(),
        sha256_hex(body),
        path_and_query
    )
}

fn sign(secret: &str, payload: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Config(format!("invalid Tuya access secret: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(format!("{:X}", mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn config(endpoint: String, status_api: StatusApi) -> TuyaConfig {
        TuyaConfig {
            endpoint,
            access_id: "test_id".into(),
            access_secret: "test_secret".into(),
            status_api,
        }
    }

    async fn mock_token(server: &mut mockito::ServerGuard) -> mockito::Mock {
        server
            .mock("GET", Matcher::Regex(r"^/v1\.0/token".to_string()))
            .match_query(Matcher::UrlEncoded("grant_type".into(), "1".into()))
            .match_header("client_id", "test_id")
            .match_header("sign_method", "HMAC-SHA256")
            .match_header("sign", Matcher::Regex("^[0-9A-F]{64}$".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "success": true,
                    "t": 1_700_000_000_000_i64,
                    "result": {
                        "access_token": "token123",
                        "expire_time": 7200,
                        "refresh_token": "refresh",
                        "uid": "uid"
                    }
                })
                .to_string(),
            )
            .create_async()
            .await
    }

    #[test]
    fn test_string_to_sign_for_empty_get() {
        assert_eq!(
            string_to_sign(&Method::GET, b"", TOKEN_PATH),
            "GET\ne3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855\n\n/v1.0/token?grant_type=1"
        );
    }

    #[test]
    fn test_sign_is_uppercase_hex_and_keyed() {
        let a = sign("secret_a", "payload").unwrap();
        let b = sign("secret_b", "payload").unwrap();

        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
        assert_eq!(a, sign("secret_a", "payload").unwrap());
        assert_ne!(a, b);
    }

    #[test]
    fn test_status_paths() {
        let codes = vec!["flow_water".to_string(), "sw_water".to_string()];
        assert_eq!(
            StatusApi::DeviceStatus.path("dev1", &codes),
            "/v1.0/devices/dev1/status"
        );
        assert_eq!(
            StatusApi::ShadowProperties.path("dev1", &codes),
            "/v2.0/cloud/thing/dev1/shadow/properties?codes=flow_water,sw_water"
        );
        assert_eq!(
            StatusApi::ShadowProperties.path("dev1", &[]),
            "/v2.0/cloud/thing/dev1/shadow/properties"
        );
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let props = StatusApi::DeviceStatus.properties(json!([
            {"code": "flow_water", "value": 200},
            {"value": 3},
            "garbage",
            {"code": "sw_water"}
        ]));

        assert_eq!(
            props,
            vec![
                RawProperty::new("flow_water", 200),
                RawProperty::new("sw_water", Value::Null),
            ]
        );
    }

    #[test]
    fn test_unexpected_result_shape_yields_no_properties() {
        assert!(StatusApi::DeviceStatus
            .properties(json!({"properties": []}))
            .is_empty());
        assert!(StatusApi::ShadowProperties.properties(json!([])).is_empty());
    }

    #[tokio::test]
    async fn test_connect_and_read_device_status() {
        let mut server = Server::new_async().await;
        let token = mock_token(&mut server).await;
        let status = server
            .mock("GET", "/v1.0/devices/dev1/status")
            .match_header("access_token", "token123")
            .match_header("client_id", "test_id")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "success": true,
                    "result": [
                        {"code": "flow_water", "value": 250},
                        {"code": "temp_current", "value": 80},
                        {"code": "sw_water", "value": true}
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let mut client = TuyaClient::new(&config(server.url(), StatusApi::DeviceStatus)).unwrap();
        client.connect().await.unwrap();
        let props = client.device_properties("dev1", &[]).await.unwrap();

        assert_eq!(props.len(), 3);
        assert_eq!(props[0], RawProperty::new("flow_water", 250));
        token.assert_async().await;
        status.assert_async().await;
    }

    #[tokio::test]
    async fn test_shadow_properties() {
        let mut server = Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let shadow = server
            .mock(
                "GET",
                Matcher::Regex(r"^/v2\.0/cloud/thing/dev1/shadow/properties".to_string()),
            )
            .match_query(Matcher::UrlEncoded(
                "codes".into(),
                "flow_water,temp_current_f".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "success": true,
                    "result": {
                        "properties": [
                            {"code": "flow_water", "dp_id": 1, "time": 1, "value": 120},
                            {"code": "temp_current_f", "dp_id": 2, "time": 1, "value": 755}
                        ]
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let mut client =
            TuyaClient::new(&config(server.url(), StatusApi::ShadowProperties)).unwrap();
        client.connect().await.unwrap();
        let codes = vec!["flow_water".to_string(), "temp_current_f".to_string()];
        let props = client.device_properties("dev1", &codes).await.unwrap();

        assert_eq!(
            props,
            vec![
                RawProperty::new("flow_water", 120),
                RawProperty::new("temp_current_f", 755),
            ]
        );
        shadow.assert_async().await;
    }

    #[tokio::test]
    async fn test_connect_failure_reports_tuya_error() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Regex(r"^/v1\.0/token".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"success": false, "code": 1004, "msg": "sign invalid"}).to_string())
            .create_async()
            .await;

        let mut client = TuyaClient::new(&config(server.url(), StatusApi::DeviceStatus)).unwrap();
        let result = client.connect().await;

        match result {
            Err(AppError::Tuya { code, msg }) => {
                assert_eq!(code, 1004);
                assert_eq!(msg, "sign invalid");
            }
            other => panic!("expected Tuya error, got {:?}", other),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_device_failure_is_an_error() {
        let mut server = Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let _status = server
            .mock("GET", "/v1.0/devices/offline/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"success": false, "code": 2001, "msg": "device is offline"}).to_string(),
            )
            .create_async()
            .await;

        let mut client = TuyaClient::new(&config(server.url(), StatusApi::DeviceStatus)).unwrap();
        client.connect().await.unwrap();
        let result = client.device_properties("offline", &[]).await;

        assert!(matches!(result, Err(AppError::Tuya { code: 2001, .. })));
    }

    #[tokio::test]
    async fn test_read_before_connect_fails() {
        let client =
            TuyaClient::new(&config("http://localhost".into(), StatusApi::DeviceStatus)).unwrap();
        let result = client.device_properties("dev1", &[]).await;
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
