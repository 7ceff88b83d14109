use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::bundle::{build_jsonrpc_request, prepare_endpoint_url};
use super::error::RelayError;
use super::types::BundleErrorDetail;

pub const DEFAULT_BLOCK_ENGINE_URL: &str = "https://mainnet.block-engine.jito.wtf/api/v1/bundles";
pub const DEFAULT_BUNDLE_ERROR_API: &str = "https://bundles.jito.wtf/api/v1/bundles/get_bundle_error";

/// relay 的传输层：发 JSON-RPC 请求，返回完整响应信封。
#[async_trait]
pub trait RelayTransport: Send + Sync {
    async fn call(&self, method: &'static str, params: Value) -> Result<Value, RelayError>;

    /// 查询失败 bundle 的错误详情；接口无数据时返回 `None`。
    async fn bundle_error(&self, bundle_id: &str) -> Result<Option<BundleErrorDetail>, RelayError>;
}

#[derive(Clone)]
pub struct HttpRelayTransport {
    client: Client,
    endpoint: Url,
    auth: Option<String>,
    error_api: String,
}

impl HttpRelayTransport {
    pub fn new(
        endpoint: &str,
        uuid: Option<&str>,
        error_api: &str,
        timeout: Duration,
    ) -> Result<Self, RelayError> {
        let endpoint = prepare_endpoint_url(endpoint, uuid)
            .ok_or_else(|| RelayError::fatal(format!("无效的 relay 地址: {endpoint}")))?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            auth: uuid
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string),
            error_api: error_api.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl RelayTransport for HttpRelayTransport {
    async fn call(&self, method: &'static str, params: Value) -> Result<Value, RelayError> {
        let payload = build_jsonrpc_request(method, params);
        let mut request = self.client.post(self.endpoint.clone()).json(&payload);
        if let Some(auth) = &self.auth {
            request = request.header("x-jito-auth", auth);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // 限流等错误也可能带 JSON-RPC 错误体
            if let Ok(value) = serde_json::from_str::<Value>(&body) {
                if value.get("error").is_some() {
                    return Ok(value);
                }
            }
            warn!(
                target: "relay::transport",
                method,
                status = %status,
                "relay 返回非成功状态码"
            );
            return Err(RelayError::Http { status, body });
        }

        let value: Value = response.json().await?;
        debug!(target: "relay::transport", method, "relay 请求完成");
        Ok(value)
    }

    async fn bundle_error(&self, bundle_id: &str) -> Result<Option<BundleErrorDetail>, RelayError> {
        let url = format!("{}/{}", self.error_api, bundle_id);
        let response = self
            .client
            .get(&url)
            .header("accept", "application/json")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RelayError::Http {
                status: response.status(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let value: Value = response.json().await?;
        Ok(parse_bundle_error(value))
    }
}

fn parse_bundle_error(value: Value) -> Option<BundleErrorDetail> {
    let entry = match value {
        Value::Array(mut entries) if !entries.is_empty() => entries.swap_remove(0),
        Value::Object(map) => Value::Object(map),
        _ => return None,
    };
    serde_json::from_value(entry).ok()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn bundle_error_takes_first_entry() {
        let detail = parse_bundle_error(json!([
            {"error": "BundleFailed", "errorDetails": "account in use"},
            {"error": "ignored"}
        ]))
        .expect("detail");
        assert_eq!(detail.error.as_deref(), Some("BundleFailed"));
        assert_eq!(detail.error_details.as_deref(), Some("account in use"));
    }

    #[test]
    fn empty_bundle_error_is_none() {
        assert!(parse_bundle_error(json!([])).is_none());
        assert!(parse_bundle_error(Value::Null).is_none());
    }

    #[test]
    fn transport_rejects_blank_endpoint() {
        let result = HttpRelayTransport::new(
            "",
            None,
            DEFAULT_BUNDLE_ERROR_API,
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(RelayError::Fatal(_))));
    }
}
