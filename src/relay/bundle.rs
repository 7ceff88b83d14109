use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use bincode::config::standard;
use bincode::serde::encode_to_vec;
use serde_json::{Value, json};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::VersionedTransaction;
use url::Url;

use super::error::RelayError;

pub(crate) const JSONRPC_VERSION: &str = "2.0";

pub fn serialize_transaction(tx: &VersionedTransaction) -> Result<Vec<u8>, RelayError> {
    let config = standard().with_fixed_int_encoding().with_little_endian();
    Ok(encode_to_vec(tx, config)?)
}

pub fn encode_transaction(tx: &VersionedTransaction) -> Result<String, RelayError> {
    Ok(BASE64_STANDARD.encode(serialize_transaction(tx)?))
}

pub(crate) fn prepare_endpoint_url(endpoint: &str, uuid: Option<&str>) -> Option<Url> {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut url = Url::parse(trimmed).ok()?;
    if let Some(uuid) = uuid.map(str::trim).filter(|value| !value.is_empty()) {
        url.query_pairs_mut().append_pair("uuid", uuid);
    }
    Some(url)
}

pub(crate) fn build_jsonrpc_request(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": 1,
        "method": method,
        "params": params,
    })
}

pub(crate) fn send_bundle_params(txs: Vec<String>) -> Value {
    json!([txs, {"encoding": "base64"}])
}

pub(crate) fn simulate_bundle_params(txs: Vec<String>, watched: &[Pubkey]) -> Value {
    let addresses: Vec<String> = watched.iter().map(|key| key.to_string()).collect();
    let accounts_configs: Vec<Value> = txs
        .iter()
        .map(|_| json!({"addresses": addresses}))
        .collect();
    json!([
        {"encodedTransactions": txs},
        {
            "encoding": "base64",
            "skipSigVerify": true,
            "replaceRecentBlockhash": true,
            "preExecutionAccountsConfigs": accounts_configs,
            "postExecutionAccountsConfigs": accounts_configs,
        }
    ])
}

pub(crate) fn bundle_id_params(bundle_id: &str) -> Value {
    json!([[bundle_id]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_url_appends_uuid() {
        let url = prepare_endpoint_url(
            "https://mainnet.block-engine.jito.wtf/api/v1/bundles",
            Some("abc"),
        )
        .expect("url");
        assert_eq!(url.query(), Some("uuid=abc"));
        assert!(prepare_endpoint_url("  ", None).is_none());
    }

    #[test]
    fn simulate_params_carry_one_config_per_transaction() {
        let params = simulate_bundle_params(vec!["a".into(), "b".into()], &[]);
        assert_eq!(params[0]["encodedTransactions"][1], "b");
        assert_eq!(params[1]["skipSigVerify"], true);
        assert_eq!(
            params[1]["preExecutionAccountsConfigs"]
                .as_array()
                .map(Vec::len),
            Some(2)
        );
    }

    #[test]
    fn request_envelope_has_jsonrpc_fields() {
        let request = build_jsonrpc_request("getBundleStatuses", bundle_id_params("id-1"));
        assert_eq!(request["jsonrpc"], "2.0");
        assert_eq!(request["method"], "getBundleStatuses");
        assert_eq!(request["params"][0][0], "id-1");
    }
}
