use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::seq::IndexedRandom;
use reqwest::Client;
use serde::Deserialize;
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, warn};

use crate::config::{TipConfig, TipFloorLevel, TipStrategyKind};

pub const DEFAULT_TIP_FLOOR_URL: &str = "http://bundles-api-rest.jito.wtf/api/v1/bundles/tip_floor";
pub const MIN_JITO_TIP_LAMPORTS: u64 = 1_000;

/// block engine 公布的小费账户。
pub const DEFAULT_TIP_ACCOUNTS: [&str; 8] = [
    "ADuUkR4vqLUMWXxW9gh6D6L8pMSawimctcNZ5pGwDcEt",
    "DfXygSm4jCyNCybVYYK6DwvWqjKee8pbDmJGcLWNDXjh",
    "DttWaMuVvTiduZRnguLF7jNxTgiMBZ1hyAumKUiL2KRL",
    "HFqU5x63VTqvQss8hp11i4wVV8bD44PvwucfZ2bU7gRe",
    "3AVi9Tg9Uo68tJfuvoKvqKNWKkC5wPdSSdeBnizKZ6jT",
    "Cw8CFyM9FkoMi7K7Crf6HNQqf4uEMzpKw6QNghXLvLkY",
    "96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5",
    "ADaUMid9yfUytqMBgopwjb2DTLSokTSzL1zt6iGPaS49",
];

#[derive(Clone)]
pub struct TipSelector {
    strategy: TipStrategyKind,
    base_tip: u64,
    range_tips: Vec<u64>,
    accounts: Vec<Pubkey>,
    api: Option<Arc<TipFloorApi>>,
}

impl TipSelector {
    pub fn from_config(config: &TipConfig) -> Self {
        let strategy = config.strategy;
        let base_tip = config
            .fixed_tip
            .filter(|value| *value > 0)
            .unwrap_or(MIN_JITO_TIP_LAMPORTS);
        let range_tips = config
            .range_tips
            .iter()
            .copied()
            .filter(|value| *value > 0)
            .collect();

        let api = if matches!(strategy, TipStrategyKind::Api) {
            let endpoint = config
                .tip_floor_api
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .unwrap_or(DEFAULT_TIP_FLOOR_URL)
                .to_string();
            Some(Arc::new(TipFloorApi::new(
                endpoint,
                config.floor_level,
                config.max_tip_lamports.filter(|value| *value > 0),
                Duration::from_millis(config.tip_floor_timeout_ms.max(200)),
            )))
        } else {
            None
        };

        Self {
            strategy,
            base_tip,
            range_tips,
            accounts: parse_tip_accounts(&config.tip_accounts),
            api,
        }
    }

    /// 随机挑选一个收款账户。
    pub fn tip_account(&self) -> Option<Pubkey> {
        let mut rng = rand::rng();
        self.accounts.as_slice().choose(&mut rng).copied()
    }

    pub fn tip_accounts(&self) -> &[Pubkey] {
        &self.accounts
    }

    pub fn strategy_kind(&self) -> TipStrategyKind {
        self.strategy
    }

    pub async fn select_tip(&self) -> u64 {
        match self.strategy {
            TipStrategyKind::Fixed => self.base_tip,
            TipStrategyKind::Range => self.pick_range_tip().unwrap_or_else(|| {
                warn!(
                    target: "relay::tip",
                    "range 策略未配置有效的随机列表，退回 {} lamports",
                    self.base_tip
                );
                self.base_tip
            }),
            TipStrategyKind::Api => {
                if let Some(api) = &self.api {
                    if let Some(value) = api.refresh().await {
                        return value.max(MIN_JITO_TIP_LAMPORTS);
                    }
                    warn!(
                        target: "relay::tip",
                        "tip floor 接口未产出有效值，回退为 {} lamports",
                        self.base_tip
                    );
                }
                self.base_tip.max(MIN_JITO_TIP_LAMPORTS)
            }
        }
    }

    fn pick_range_tip(&self) -> Option<u64> {
        if self.range_tips.is_empty() {
            return None;
        }
        let mut rng = rand::rng();
        Some(*self.range_tips.as_slice().choose(&mut rng)?)
    }
}

fn parse_tip_accounts(configured: &[String]) -> Vec<Pubkey> {
    let raw: Vec<&str> = if configured.is_empty() {
        DEFAULT_TIP_ACCOUNTS.to_vec()
    } else {
        configured.iter().map(String::as_str).collect()
    };
    raw.into_iter()
        .filter_map(|value| match Pubkey::from_str(value.trim()) {
            Ok(key) => Some(key),
            Err(err) => {
                warn!(
                    target: "relay::tip",
                    account = value,
                    error = %err,
                    "忽略无效的小费账户"
                );
                None
            }
        })
        .collect()
}

struct TipFloorApi {
    latest: AtomicU64,
    client: Client,
    endpoint: String,
    level: TipFloorLevel,
    cap: Option<u64>,
    timeout: Duration,
}

impl TipFloorApi {
    fn new(endpoint: String, level: TipFloorLevel, cap: Option<u64>, timeout: Duration) -> Self {
        Self {
            latest: AtomicU64::new(0),
            client: Client::new(),
            endpoint,
            level,
            cap,
            timeout,
        }
    }

    fn latest(&self) -> Option<u64> {
        let value = self.latest.load(Ordering::Relaxed);
        if value > 0 { Some(value) } else { None }
    }

    /// 拉取失败时沿用上一次的值。
    async fn refresh(&self) -> Option<u64> {
        match self.fetch_once().await {
            Ok(Some(value)) => {
                self.latest.store(value, Ordering::Relaxed);
                Some(value)
            }
            Ok(None) => {
                debug!(
                    target: "relay::tip",
                    endpoint = %self.endpoint,
                    "tip floor 接口返回空数据，使用旧值"
                );
                self.latest()
            }
            Err(err) => {
                warn!(
                    target: "relay::tip",
                    endpoint = %self.endpoint,
                    error = %err,
                    "tip floor 拉取失败，使用旧值"
                );
                self.latest()
            }
        }
    }

    async fn fetch_once(&self) -> Result<Option<u64>, reqwest::Error> {
        let response = self
            .client
            .get(&self.endpoint)
            .header("accept", "application/json")
            .timeout(self.timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            warn!(
                target: "relay::tip",
                endpoint = %self.endpoint,
                status = %response.status(),
                "tip floor 接口返回非成功状态码"
            );
            return Ok(None);
        }

        let entries: Vec<TipFloorEntry> = response.json().await?;
        Ok(entries
            .into_iter()
            .next()
            .and_then(|entry| entry.value(self.level, self.cap)))
    }
}

/// tip floor 接口的单条记录，数值单位为 SOL。
#[derive(Debug, Clone, Default, Deserialize)]
struct TipFloorEntry {
    #[serde(default)]
    landed_tips_25th_percentile: Option<f64>,
    #[serde(default)]
    landed_tips_50th_percentile: Option<f64>,
    #[serde(default)]
    landed_tips_75th_percentile: Option<f64>,
    #[serde(default)]
    landed_tips_95th_percentile: Option<f64>,
    #[serde(default)]
    landed_tips_99th_percentile: Option<f64>,
    #[serde(default)]
    ema_landed_tips_50th_percentile: Option<f64>,
}

impl TipFloorEntry {
    fn value(&self, level: TipFloorLevel, cap: Option<u64>) -> Option<u64> {
        let raw = match level {
            TipFloorLevel::Percentile25 => self.landed_tips_25th_percentile,
            TipFloorLevel::Percentile50 => self.landed_tips_50th_percentile,
            TipFloorLevel::Percentile75 => self.landed_tips_75th_percentile,
            TipFloorLevel::Percentile95 => self.landed_tips_95th_percentile,
            TipFloorLevel::Percentile99 => self.landed_tips_99th_percentile,
            TipFloorLevel::Ema50 => self.ema_landed_tips_50th_percentile,
        }
        .and_then(sol_to_lamports);

        match (raw, cap) {
            (Some(value), Some(limit)) => Some(value.min(limit)),
            (value, _) => value,
        }
    }
}

fn sol_to_lamports(value: f64) -> Option<u64> {
    if !value.is_finite() {
        return None;
    }
    let lamports = (value * 1_000_000_000.0).round();
    if lamports <= 0.0 {
        None
    } else if lamports >= u64::MAX as f64 {
        Some(u64::MAX)
    } else {
        Some(lamports as u64)
    }
}
