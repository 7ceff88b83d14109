use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::VersionedTransaction;
use tracing::{debug, info, warn};

use super::bundle::{
    bundle_id_params, encode_transaction, send_bundle_params, simulate_bundle_params,
};
use super::error::RelayError;
use super::poll::PollSchedule;
use super::transport::RelayTransport;
use super::types::{
    BundleStatus, BundleStatusInfo, ContextValue, FailedBundle, InflightBundleInfo,
    InflightStatus, LandedBundle, RpcReply, SimulatedBundle, SimulationReport, SimulationSummary,
    SubmittedBundle, TransactionResult, failure_reason,
};

/// Jito 单个 bundle 最多 5 笔交易。
pub const DEFAULT_MAX_BUNDLE_TRANSACTIONS: usize = 5;

#[derive(Clone)]
pub struct BundleClient {
    transport: Arc<dyn RelayTransport>,
    max_bundle_transactions: usize,
}

impl BundleClient {
    pub fn new(transport: Arc<dyn RelayTransport>, max_bundle_transactions: usize) -> Self {
        Self {
            transport,
            max_bundle_transactions: max_bundle_transactions.max(1),
        }
    }

    pub fn max_bundle_transactions(&self) -> usize {
        self.max_bundle_transactions
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Value,
    ) -> Result<T, RelayError> {
        let envelope = self.transport.call(method, params).await?;
        RpcReply::<T>::from_envelope(method, envelope)?.into_result()
    }

    fn encode_bundle(&self, txs: &[VersionedTransaction]) -> Result<Vec<String>, RelayError> {
        if txs.is_empty() {
            return Err(RelayError::EmptyBundle);
        }
        if txs.len() > self.max_bundle_transactions {
            return Err(RelayError::BundleTooLarge {
                count: txs.len(),
                max: self.max_bundle_transactions,
            });
        }
        txs.iter().map(encode_transaction).collect()
    }

    /// 在 relay 侧模拟整个 bundle；`watched` 中的账户会附带执行前后的状态。
    pub async fn simulate(
        &self,
        txs: &[VersionedTransaction],
        watched: &[Pubkey],
    ) -> Result<SimulationReport, RelayError> {
        let encoded = self.encode_bundle(txs)?;
        let reply: ContextValue<SimulatedBundle> = self
            .request("simulateBundle", simulate_bundle_params(encoded, watched))
            .await?;
        let simulated = reply.value;

        match simulated.summary {
            SimulationSummary::Succeeded => {
                let units = simulated
                    .transaction_results
                    .iter()
                    .map(|result| result.units_consumed)
                    .collect();
                debug!(
                    target: "relay::bundle",
                    count = txs.len(),
                    "bundle 模拟成功"
                );
                Ok(SimulationReport::Succeeded { units })
            }
            SimulationSummary::Failed {
                error,
                tx_signature,
            } => {
                let by_signature = tx_signature.as_deref().and_then(|signature| {
                    txs.iter().position(|tx| {
                        tx.signatures
                            .first()
                            .is_some_and(|first| first.to_string() == signature)
                    })
                });
                let by_result = simulated
                    .transaction_results
                    .iter()
                    .position(|result| result.err.as_ref().is_some_and(|err| !err.is_null()));
                let index = by_signature
                    .or(by_result)
                    .unwrap_or(simulated.transaction_results.len())
                    .min(txs.len() - 1);
                let reason = failure_reason(&error);
                warn!(
                    target: "relay::bundle",
                    index,
                    reason = %reason,
                    "bundle 模拟失败"
                );
                Ok(SimulationReport::Failed { index, reason })
            }
        }
    }

    pub async fn submit(&self, txs: &[VersionedTransaction]) -> Result<SubmittedBundle, RelayError> {
        let encoded = self.encode_bundle(txs)?;
        let bundle_id: String = self
            .request("sendBundle", send_bundle_params(encoded))
            .await?;
        info!(
            target: "relay::bundle",
            bundle_id = %bundle_id,
            count = txs.len(),
            "bundle 已提交"
        );
        Ok(SubmittedBundle {
            bundle_id,
            signatures: txs
                .iter()
                .filter_map(|tx| tx.signatures.first().copied())
                .collect(),
        })
    }

    pub async fn poll(
        &self,
        bundle: &SubmittedBundle,
        units: &[Option<u64>],
        schedule: &PollSchedule,
    ) -> Result<BundleStatus, RelayError> {
        self.poll_with(bundle, units, schedule, |status| {
            debug!(
                target: "relay::bundle",
                bundle_id = %bundle.bundle_id,
                status = status.label(),
                "bundle 状态更新"
            );
        })
        .await
    }

    /// 轮询直到终态；`observer` 会收到每次 Pending 以及唯一一次终态。
    pub async fn poll_with<F>(
        &self,
        bundle: &SubmittedBundle,
        units: &[Option<u64>],
        schedule: &PollSchedule,
        mut observer: F,
    ) -> Result<BundleStatus, RelayError>
    where
        F: FnMut(&BundleStatus) + Send,
    {
        let cancel = schedule.cancel_token();
        let deadline = schedule.start();
        let mut saw_invalid = false;
        let mut saw_other = false;

        loop {
            if cancel.is_cancelled() {
                return Err(RelayError::Cancelled);
            }

            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RelayError::Cancelled),
                reply = tokio::time::timeout_at(
                    deadline.at(),
                    self.request::<ContextValue<Vec<InflightBundleInfo>>>(
                        "getInflightBundleStatuses",
                        bundle_id_params(&bundle.bundle_id),
                    ),
                ) => reply,
            };
            let Ok(reply) = reply else {
                warn!(
                    target: "relay::bundle",
                    bundle_id = %bundle.bundle_id,
                    "状态查询超过截止时间"
                );
                break;
            };

            match reply {
                Ok(reply) => {
                    let info = reply
                        .value
                        .into_iter()
                        .find(|info| info.bundle_id == bundle.bundle_id);
                    match info.map(|info| (info.status, info.landed_slot)) {
                        None => {
                            debug!(
                                target: "relay::bundle",
                                bundle_id = %bundle.bundle_id,
                                "relay 暂无该 bundle 状态"
                            );
                        }
                        Some((InflightStatus::Pending, _)) => {
                            saw_other = true;
                            observer(&BundleStatus::Pending);
                        }
                        Some((InflightStatus::Invalid, _)) => {
                            saw_invalid = true;
                        }
                        Some((InflightStatus::Landed, landed_slot)) => {
                            let status = BundleStatus::Landed(
                                self.landed(bundle, landed_slot, units).await,
                            );
                            observer(&status);
                            return Ok(status);
                        }
                        Some((InflightStatus::Failed, _)) => {
                            let status = BundleStatus::Failed(self.failed(bundle).await);
                            observer(&status);
                            return Ok(status);
                        }
                    }
                }
                Err(err) => {
                    warn!(
                        target: "relay::bundle",
                        bundle_id = %bundle.bundle_id,
                        error = %err,
                        "查询 bundle 状态失败，继续轮询"
                    );
                }
            }

            if deadline.expired() {
                break;
            }
            let wake = deadline.next_wake(schedule.interval());
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RelayError::Cancelled),
                _ = tokio::time::sleep_until(wake) => {}
            }
        }

        let status = if saw_invalid && !saw_other {
            BundleStatus::Invalid
        } else {
            BundleStatus::TimedOut
        };
        warn!(
            target: "relay::bundle",
            bundle_id = %bundle.bundle_id,
            status = status.label(),
            timeout = ?schedule.timeout(),
            "bundle 在截止时间内未进入终态"
        );
        observer(&status);
        Ok(status)
    }

    async fn landed(
        &self,
        bundle: &SubmittedBundle,
        landed_slot: Option<u64>,
        units: &[Option<u64>],
    ) -> LandedBundle {
        let detail = match self
            .request::<ContextValue<Vec<Option<BundleStatusInfo>>>>(
                "getBundleStatuses",
                bundle_id_params(&bundle.bundle_id),
            )
            .await
        {
            Ok(reply) => reply.value.into_iter().flatten().next(),
            Err(err) => {
                warn!(
                    target: "relay::bundle",
                    bundle_id = %bundle.bundle_id,
                    error = %err,
                    "获取已上链 bundle 详情失败"
                );
                None
            }
        };

        let (slot, signatures, error) = match detail {
            Some(info) => {
                let error = info.error_text();
                let signatures = if info.transactions.is_empty() {
                    own_signatures(bundle)
                } else {
                    info.transactions
                };
                (info.slot.or(landed_slot), signatures, error)
            }
            None => (landed_slot, own_signatures(bundle), None),
        };

        let transactions = signatures
            .into_iter()
            .enumerate()
            .map(|(idx, signature)| TransactionResult {
                signature,
                compute_units: units.get(idx).copied().flatten(),
                error: error.clone(),
            })
            .collect();

        info!(
            target: "relay::bundle",
            bundle_id = %bundle.bundle_id,
            slot = ?slot,
            "bundle 已上链"
        );
        LandedBundle {
            bundle_id: bundle.bundle_id.clone(),
            slot,
            transactions,
        }
    }

    async fn failed(&self, bundle: &SubmittedBundle) -> FailedBundle {
        let detail = match self.transport.bundle_error(&bundle.bundle_id).await {
            Ok(detail) => detail,
            Err(err) => {
                warn!(
                    target: "relay::bundle",
                    bundle_id = %bundle.bundle_id,
                    error = %err,
                    "获取 bundle 错误详情失败"
                );
                None
            }
        };
        warn!(
            target: "relay::bundle",
            bundle_id = %bundle.bundle_id,
            detail = ?detail,
            "bundle 执行失败"
        );
        FailedBundle {
            bundle_id: bundle.bundle_id.clone(),
            detail,
        }
    }
}

fn own_signatures(bundle: &SubmittedBundle) -> Vec<String> {
    bundle
        .signatures
        .iter()
        .map(|signature| signature.to_string())
        .collect()
}
