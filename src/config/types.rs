use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::assembly::ComputeParams;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub rpc_url: Option<String>,
    #[serde(default = "super::default_commitment")]
    pub commitment: String,
    /// 覆盖默认的 `super_txn` 程序地址。
    #[serde(default)]
    pub program_id: Option<String>,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            commitment: super::default_commitment(),
            program_id: None,
            wallet: WalletConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WalletConfig {
    #[serde(default)]
    pub private_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "super::default_logging_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: super::default_logging_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "super::default_block_engine_url")]
    pub endpoint: String,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default = "super::default_bundle_error_api")]
    pub bundle_error_api: String,
    #[serde(default = "super::default_relay_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "super::default_max_bundle_transactions")]
    pub max_bundle_transactions: usize,
    #[serde(default)]
    pub tip: TipConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoint: super::default_block_engine_url(),
            uuid: None,
            bundle_error_api: super::default_bundle_error_api(),
            request_timeout_ms: super::default_relay_timeout_ms(),
            max_bundle_transactions: super::default_max_bundle_transactions(),
            tip: TipConfig::default(),
        }
    }
}

impl RelayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TipStrategyKind {
    Fixed,
    Range,
    Api,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TipFloorLevel {
    #[serde(rename = "p25")]
    Percentile25,
    #[serde(rename = "p50")]
    Percentile50,
    #[serde(rename = "p75")]
    Percentile75,
    #[serde(rename = "p95")]
    Percentile95,
    #[serde(rename = "p99")]
    Percentile99,
    #[serde(rename = "ema50")]
    Ema50,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TipConfig {
    #[serde(default = "super::default_tip_strategy")]
    pub strategy: TipStrategyKind,
    #[serde(default)]
    pub fixed_tip: Option<u64>,
    #[serde(default)]
    pub range_tips: Vec<u64>,
    #[serde(default)]
    pub tip_floor_api: Option<String>,
    #[serde(default = "super::default_floor_level")]
    pub floor_level: TipFloorLevel,
    #[serde(default)]
    pub max_tip_lamports: Option<u64>,
    #[serde(default = "super::default_tip_floor_timeout_ms")]
    pub tip_floor_timeout_ms: u64,
    /// 小费收款账户（base58）；为空时使用 block engine 公布的默认账户。
    #[serde(default)]
    pub tip_accounts: Vec<String>,
}

impl Default for TipConfig {
    fn default() -> Self {
        Self {
            strategy: super::default_tip_strategy(),
            fixed_tip: None,
            range_tips: Vec::new(),
            tip_floor_api: None,
            floor_level: super::default_floor_level(),
            max_tip_lamports: None,
            tip_floor_timeout_ms: super::default_tip_floor_timeout_ms(),
            tip_accounts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "super::default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "super::default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "super::default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "super::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "super::default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "super::default_true")]
    pub simulate: bool,
    /// 第一次尝试使用的缓冲区 / 记录槽位，后续尝试依次递增。
    #[serde(default)]
    pub first_slot_index: u8,
    #[serde(default)]
    pub compute: ComputeConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: super::default_chunk_size(),
            max_attempts: super::default_max_attempts(),
            retry_backoff_ms: super::default_retry_backoff_ms(),
            poll_interval_ms: super::default_poll_interval_ms(),
            poll_timeout_ms: super::default_poll_timeout_ms(),
            simulate: true,
            first_slot_index: 0,
            compute: ComputeConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ComputeConfig {
    #[serde(default = "super::default_finalize_unit_limit")]
    pub finalize_unit_limit: u32,
    #[serde(default = "super::default_execute_unit_price")]
    pub execute_unit_price: u64,
    #[serde(default = "super::default_execute_unit_limit")]
    pub execute_unit_limit: u32,
    #[serde(default = "super::default_heap_frame_bytes")]
    pub heap_frame_bytes: u32,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            finalize_unit_limit: super::default_finalize_unit_limit(),
            execute_unit_price: super::default_execute_unit_price(),
            execute_unit_limit: super::default_execute_unit_limit(),
            heap_frame_bytes: super::default_heap_frame_bytes(),
        }
    }
}

impl From<ComputeConfig> for ComputeParams {
    fn from(config: ComputeConfig) -> Self {
        Self {
            finalize_unit_limit: config.finalize_unit_limit,
            execute_unit_price: config.execute_unit_price,
            execute_unit_limit: config.execute_unit_limit,
            heap_frame_bytes: config.heap_frame_bytes,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "super::default_cache_dir")]
    pub dir: PathBuf,
    #[serde(default = "super::default_cache_max_age_secs")]
    pub max_age_secs: u64,
    #[serde(default = "super::default_true")]
    pub persist: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: super::default_cache_dir(),
            max_age_secs: super::default_cache_max_age_secs(),
            persist: true,
        }
    }
}

impl CacheConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_partial_yaml_keeps_defaults() {
        let yaml = r#"
global:
  rpc_url: http://localhost:8899
  logging:
    json: true
relay:
  uuid: abc
  tip:
    strategy: api
    floor_level: p75
    max_tip_lamports: 200000
pipeline:
  max_attempts: 5
  compute:
    execute_unit_price: 25000
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).expect("parse yaml");
        assert_eq!(config.global.rpc_url.as_deref(), Some("http://localhost:8899"));
        assert!(config.global.logging.json);
        assert_eq!(config.global.logging.level, "info");
        assert_eq!(config.relay.tip.strategy, TipStrategyKind::Api);
        assert_eq!(config.relay.tip.floor_level, TipFloorLevel::Percentile75);
        assert_eq!(config.relay.endpoint, crate::relay::DEFAULT_BLOCK_ENGINE_URL);
        assert_eq!(config.pipeline.max_attempts, 5);
        assert_eq!(config.pipeline.chunk_size, 700);
        assert_eq!(config.pipeline.compute.execute_unit_price, 25_000);
        assert_eq!(config.pipeline.compute.execute_unit_limit, 1_400_000);
        assert_eq!(config.cache.max_age(), Duration::from_secs(86_400));
    }

    #[test]
    fn unknown_tip_strategy_is_rejected() {
        let yaml = "relay:\n  tip:\n    strategy: stream\n";
        assert!(serde_yaml::from_str::<AppConfig>(yaml).is_err());
    }
}
