use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use solana_client::client_error::ClientError;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_commitment_config::{CommitmentConfig, CommitmentLevel};
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};

use crate::config::{AppConfig, ConfigError};
use crate::identity::load_keypair;
use crate::program::SUPER_TXN_PROGRAM_ID;

/// 流水线需要的只读链上查询。
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn latest_blockhash(&self) -> Result<Hash, ClientError>;

    /// 账户不存在时返回 `None`。
    async fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, ClientError>;
}

#[async_trait]
impl ChainReader for RpcClient {
    async fn latest_blockhash(&self) -> Result<Hash, ClientError> {
        self.get_latest_blockhash().await
    }

    async fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, ClientError> {
        let response = self
            .get_account_with_commitment(address, self.commitment())
            .await?;
        Ok(response.value.map(|account| account.data))
    }
}

/// 每次调用显式传入的执行上下文：RPC、签名者与程序地址。
#[derive(Clone)]
pub struct ExecutionContext {
    pub rpc: Arc<RpcClient>,
    pub signer: Arc<Keypair>,
    pub program_id: Pubkey,
}

impl ExecutionContext {
    pub fn new(rpc: Arc<RpcClient>, signer: Arc<Keypair>, program_id: Pubkey) -> Self {
        Self {
            rpc,
            signer,
            program_id,
        }
    }

    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let rpc_url = config
            .global
            .rpc_url
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(ConfigError::Invalid {
                field: "global.rpc_url",
                reason: "未配置 RPC 地址".to_string(),
            })?;
        let level = CommitmentLevel::from_str(config.global.commitment.trim()).map_err(|err| {
            ConfigError::Invalid {
                field: "global.commitment",
                reason: err.to_string(),
            }
        })?;
        let program_id = match config.global.program_id.as_deref().map(str::trim) {
            Some(value) if !value.is_empty() => {
                Pubkey::from_str(value).map_err(|err| ConfigError::Invalid {
                    field: "global.program_id",
                    reason: err.to_string(),
                })?
            }
            _ => SUPER_TXN_PROGRAM_ID,
        };
        let signer = load_keypair(&config.global.wallet)?;
        let rpc = Arc::new(RpcClient::new_with_commitment(
            rpc_url.to_string(),
            CommitmentConfig { commitment: level },
        ));
        Ok(Self::new(rpc, signer, program_id))
    }

    pub fn creator(&self) -> Pubkey {
        self.signer.pubkey()
    }
}
