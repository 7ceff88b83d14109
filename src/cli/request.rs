//! 请求文件：`{"instructions": [...], "addressLookupTables": [...], "ephemeralSigners": 0, "memo": null}`。
//!
//! 指令格式与常见聚合器返回的一致：`programId`、`accounts[{pubkey,isSigner,isWritable}]`、base64 `data`。

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;

use crate::message::TransactionMessage;
use crate::pipeline::SubmitRequest;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct RequestFile {
    instructions: Vec<InstructionEntry>,
    #[serde(default)]
    address_lookup_tables: Vec<PubkeyEntry>,
    #[serde(default)]
    ephemeral_signers: u8,
    #[serde(default)]
    memo: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct InstructionEntry {
    #[serde(with = "pubkey_string")]
    program_id: Pubkey,
    #[serde(default)]
    accounts: Vec<AccountEntry>,
    #[serde(default, with = "base64_data")]
    data: Vec<u8>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct AccountEntry {
    #[serde(with = "pubkey_string")]
    pubkey: Pubkey,
    #[serde(default)]
    is_signer: bool,
    #[serde(default)]
    is_writable: bool,
}

#[derive(Deserialize, Debug, Clone)]
struct PubkeyEntry(#[serde(with = "pubkey_string")] Pubkey);

impl From<AccountEntry> for AccountMeta {
    fn from(value: AccountEntry) -> Self {
        Self {
            pubkey: value.pubkey,
            is_signer: value.is_signer,
            is_writable: value.is_writable,
        }
    }
}

impl From<InstructionEntry> for Instruction {
    fn from(value: InstructionEntry) -> Self {
        Self {
            program_id: value.program_id,
            accounts: value.accounts.into_iter().map(Into::into).collect(),
            data: value.data,
        }
    }
}

/// 解析请求内容；消息的付费者固定为当前钱包。
pub fn parse_request(raw: &str, payer: Pubkey) -> Result<SubmitRequest> {
    let file: RequestFile = serde_json::from_str(raw).context("解析请求文件失败")?;
    if file.instructions.is_empty() {
        bail!("请求文件中没有任何指令");
    }
    let instructions: Vec<Instruction> = file.instructions.into_iter().map(Into::into).collect();
    Ok(SubmitRequest {
        message: TransactionMessage::new(payer, instructions),
        lookup_tables: file
            .address_lookup_tables
            .into_iter()
            .map(|entry| entry.0)
            .collect(),
        ephemeral_signers: file.ephemeral_signers,
        memo: file.memo.filter(|memo| !memo.trim().is_empty()),
    })
}

pub async fn load_request(path: &Path, payer: Pubkey) -> Result<SubmitRequest> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("读取请求文件 {} 失败", path.display()))?;
    parse_request(&raw, payer)
}

mod pubkey_string {
    use std::str::FromStr;

    use serde::{Deserialize, Deserializer, de};
    use solana_sdk::pubkey::Pubkey;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Pubkey, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Pubkey::from_str(raw.trim())
            .map_err(|err| de::Error::custom(format!("invalid pubkey {raw}: {err}")))
    }
}

mod base64_data {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, de};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        STANDARD
            .decode(raw)
            .map_err(|err| de::Error::custom(format!("base64 decoding error: {err:?}")))
    }
}

#[cfg(test)]
mod tests {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_instructions_and_tables() {
        let payer = Pubkey::new_unique();
        let program = Pubkey::new_unique();
        let account = Pubkey::new_unique();
        let table = Pubkey::new_unique();
        let raw = json!({
            "instructions": [{
                "programId": program.to_string(),
                "accounts": [
                    {"pubkey": payer.to_string(), "isSigner": true, "isWritable": true},
                    {"pubkey": account.to_string(), "isSigner": false, "isWritable": false}
                ],
                "data": STANDARD.encode([1u8, 2, 3])
            }],
            "addressLookupTables": [table.to_string()],
            "ephemeralSigners": 2,
            "memo": "  "
        })
        .to_string();

        let request = parse_request(&raw, payer).expect("parse");
        assert_eq!(request.message.payer, payer);
        let ix = &request.message.instructions[0];
        assert_eq!(ix.program_id, program);
        assert_eq!(ix.data, vec![1, 2, 3]);
        assert!(ix.accounts[0].is_signer);
        assert!(!ix.accounts[1].is_writable);
        assert_eq!(request.lookup_tables, vec![table]);
        assert_eq!(request.ephemeral_signers, 2);
        assert_eq!(request.memo, None);
    }

    #[test]
    fn rejects_empty_and_malformed_requests() {
        let payer = Pubkey::new_unique();
        assert!(parse_request(r#"{"instructions": []}"#, payer).is_err());
        let bad_key = json!({
            "instructions": [{"programId": "not-a-key", "accounts": [], "data": ""}]
        })
        .to_string();
        assert!(parse_request(&bad_key, payer).is_err());
    }
}
