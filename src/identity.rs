use std::env;
use std::sync::Arc;

use solana_sdk::signature::Keypair;
use thiserror::Error;

use crate::config::WalletConfig;

pub const PRIVATE_KEY_ENV: &str = "SUPERBUNDLE_PRIVATE_KEY";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("缺少私钥配置，请提供 global.wallet.private_key 或环境变量 {PRIVATE_KEY_ENV}")]
    Missing,
    #[error("{source_name} 非法: {reason}")]
    Invalid {
        source_name: &'static str,
        reason: String,
    },
}

/// 环境变量优先于配置文件。
pub fn load_keypair(wallet: &WalletConfig) -> Result<Arc<Keypair>, IdentityError> {
    if let Ok(value) = env::var(PRIVATE_KEY_ENV) {
        if !value.trim().is_empty() {
            let keypair =
                parse_keypair_string(value.trim()).map_err(|err| IdentityError::Invalid {
                    source_name: PRIVATE_KEY_ENV,
                    reason: err.to_string(),
                })?;
            return Ok(Arc::new(keypair));
        }
    }

    if !wallet.private_key.trim().is_empty() {
        let keypair =
            parse_keypair_string(wallet.private_key.trim()).map_err(|err| IdentityError::Invalid {
                source_name: "global.wallet.private_key",
                reason: err.to_string(),
            })?;
        return Ok(Arc::new(keypair));
    }

    Err(IdentityError::Missing)
}

/// 支持 JSON 字节数组、逗号分隔的字节列表与 base58 三种写法。
pub fn parse_keypair_string(raw: &str) -> Result<Keypair, anyhow::Error> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        anyhow::bail!("keypair string empty");
    }

    if trimmed.starts_with('[') {
        let bytes: Vec<u8> = serde_json::from_str(trimmed)?;
        Ok(Keypair::try_from(bytes.as_slice())?)
    } else if trimmed.contains(',') {
        let bytes = trimmed
            .split(',')
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .map(|part| part.parse::<u8>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Keypair::try_from(bytes.as_slice())?)
    } else {
        let data = bs58::decode(trimmed).into_vec()?;
        Ok(Keypair::try_from(data.as_slice())?)
    }
}
