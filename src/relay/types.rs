use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use solana_sdk::signature::Signature;

use super::error::RelayError;

/// JSON-RPC 响应只有两种形态：成功结果或 relay 错误。
#[derive(Debug, Clone, PartialEq)]
pub enum RpcReply<T> {
    Ok(T),
    RelayError { code: i64, message: String },
}

#[derive(Debug, Deserialize)]
struct RawReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RawRpcError>,
}

#[derive(Debug, Deserialize)]
struct RawRpcError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

impl<T: DeserializeOwned> RpcReply<T> {
    pub fn from_envelope(method: &'static str, envelope: Value) -> Result<Self, RelayError> {
        let raw: RawReply = serde_json::from_value(envelope)?;
        if let Some(error) = raw.error {
            return Ok(RpcReply::RelayError {
                code: error.code,
                message: error.message,
            });
        }
        match raw.result {
            Some(result) => Ok(RpcReply::Ok(serde_json::from_value(result)?)),
            None => Err(RelayError::MissingResult { method }),
        }
    }

    pub fn into_result(self) -> Result<T, RelayError> {
        match self {
            RpcReply::Ok(value) => Ok(value),
            RpcReply::RelayError { code, message } => Err(RelayError::Rpc { code, message }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcContext {
    pub slot: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContextValue<T> {
    #[serde(default)]
    pub context: Option<RpcContext>,
    pub value: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum InflightStatus {
    Invalid,
    Pending,
    Failed,
    Landed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InflightBundleInfo {
    pub bundle_id: String,
    pub status: InflightStatus,
    #[serde(default)]
    pub landed_slot: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BundleStatusInfo {
    pub bundle_id: String,
    #[serde(default)]
    pub transactions: Vec<String>,
    #[serde(default)]
    pub slot: Option<u64>,
    #[serde(default, alias = "confirmationStatus")]
    pub confirmation_status: Option<String>,
    #[serde(default)]
    pub err: Option<Value>,
}

impl BundleStatusInfo {
    /// `{"Ok": null}` 与 `null` 均表示无错误。
    pub fn error_text(&self) -> Option<String> {
        match &self.err {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) if map.contains_key("Ok") => None,
            Some(other) => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatedBundle {
    pub summary: SimulationSummary,
    #[serde(default)]
    pub transaction_results: Vec<SimulatedTransaction>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationSummary {
    Succeeded,
    Failed {
        error: Value,
        #[serde(default)]
        tx_signature: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatedTransaction {
    #[serde(default)]
    pub err: Option<Value>,
    #[serde(default)]
    pub logs: Option<Vec<String>>,
    #[serde(default)]
    pub units_consumed: Option<u64>,
}

/// `{"TransactionFailure": [[..sig..], "reason"]}` 中取出原因文本。
pub fn failure_reason(error: &Value) -> String {
    error
        .get("TransactionFailure")
        .and_then(|value| value.get(1))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| match error {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleErrorDetail {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_details: Option<String>,
}

/// 模拟结果：全部成功时带回每笔交易的 CU；失败时给出出错交易下标与原因。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulationReport {
    Succeeded { units: Vec<Option<u64>> },
    Failed { index: usize, reason: String },
}

/// 已提交的 bundle。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedBundle {
    pub bundle_id: String,
    pub signatures: Vec<Signature>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionResult {
    pub signature: String,
    pub compute_units: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LandedBundle {
    pub bundle_id: String,
    pub slot: Option<u64>,
    pub transactions: Vec<TransactionResult>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedBundle {
    pub bundle_id: String,
    pub detail: Option<BundleErrorDetail>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleStatus {
    Pending,
    Landed(LandedBundle),
    Failed(FailedBundle),
    Invalid,
    TimedOut,
}

impl BundleStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BundleStatus::Pending)
    }

    pub fn label(&self) -> &'static str {
        match self {
            BundleStatus::Pending => "pending",
            BundleStatus::Landed(_) => "landed",
            BundleStatus::Failed(_) => "failed",
            BundleStatus::Invalid => "invalid",
            BundleStatus::TimedOut => "timed_out",
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn envelope_with_error_becomes_relay_error() {
        let reply: RpcReply<String> = RpcReply::from_envelope(
            "sendBundle",
            json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32097, "message": "rate limited"}}),
        )
        .expect("parse");
        assert_eq!(
            reply,
            RpcReply::RelayError {
                code: -32097,
                message: "rate limited".to_string()
            }
        );
    }

    #[test]
    fn envelope_without_result_is_rejected() {
        let err = RpcReply::<String>::from_envelope("sendBundle", json!({"jsonrpc": "2.0"}))
            .expect_err("missing result");
        assert!(matches!(err, RelayError::MissingResult { .. }));
    }

    #[test]
    fn simulation_summary_parses_both_shapes() {
        let ok: SimulatedBundle = serde_json::from_value(json!({
            "summary": "succeeded",
            "transactionResults": [{"err": null, "unitsConsumed": 1200}]
        }))
        .expect("succeeded");
        assert!(matches!(ok.summary, SimulationSummary::Succeeded));
        assert_eq!(ok.transaction_results[0].units_consumed, Some(1200));

        let failed: SimulatedBundle = serde_json::from_value(json!({
            "summary": {"failed": {
                "error": {"TransactionFailure": [[1, 2], "custom program error: 0x1"]},
                "tx_signature": "abc"
            }},
            "transactionResults": []
        }))
        .expect("failed");
        match failed.summary {
            SimulationSummary::Failed {
                error,
                tx_signature,
            } => {
                assert_eq!(failure_reason(&error), "custom program error: 0x1");
                assert_eq!(tx_signature.as_deref(), Some("abc"));
            }
            other => panic!("unexpected summary {other:?}"),
        }
    }

    #[test]
    fn bundle_status_err_ok_means_no_error() {
        let info: BundleStatusInfo = serde_json::from_value(json!({
            "bundle_id": "b",
            "transactions": ["s1"],
            "slot": 10,
            "confirmation_status": "confirmed",
            "err": {"Ok": null}
        }))
        .expect("parse");
        assert_eq!(info.error_text(), None);
    }
}
