//! 端到端提交流程：解析 ALT → 编译并编码 → 切块 → 组装 bundle → 模拟 → 提交 → 轮询。
//!
//! 每次尝试使用新的 blockhash 与新的缓冲区槽位；同一个 `Pipeline` 上的尝试严格顺序执行。

use std::sync::Arc;
use std::time::Duration;

use solana_client::client_error::ClientError;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::assembly::{
    AssembledBundle, AssemblyError, BundleRequest, ComputeParams, RecordError, RecordState,
    TipTransfer, TransactionAssembler, fetch_record,
};
use crate::buffer::{BufferError, BufferUploader, VerifyError, fetch_staged_buffer};
use crate::cache::{CacheError, LookupTableCache};
use crate::config::PipelineConfig;
use crate::context::{ChainReader, ExecutionContext};
use crate::message::{EncodingError, TransactionMessage, encode};
use crate::relay::{
    BundleClient, BundleStatus, FailedBundle, LandedBundle, PollSchedule, RelayError,
    SimulationReport, TipSelector,
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("解析地址查找表失败: {0}")]
    Cache(#[from] CacheError),
    #[error("消息编码失败: {0}")]
    Encoding(#[from] EncodingError),
    #[error("缓冲区规划失败: {0}")]
    Buffer(#[from] BufferError),
    #[error("组装 bundle 失败: {0}")]
    Assembly(#[from] AssemblyError),
    #[error("RPC 请求失败: {0}")]
    Rpc(#[from] ClientError),
    #[error("relay 请求失败: {0}")]
    Relay(#[from] RelayError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error("没有可用的小费账户")]
    NoTipWallet,
    #[error("缓冲区槽位已用尽（起始槽位 {first}）")]
    SlotsExhausted { first: u8 },
    #[error("消息记录 {record} 不存在")]
    RecordMissing { record: Pubkey },
}

impl PipelineError {
    /// 网络类错误可在退避后重试；本地构造错误重试也不会改变结果。
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Rpc(_) => true,
            PipelineError::Cache(CacheError::Rpc(_)) => true,
            PipelineError::Relay(err) => err.is_retryable(),
            PipelineError::Record(RecordError::Rpc(_)) => true,
            PipelineError::Verify(VerifyError::Rpc(_)) => true,
            _ => false,
        }
    }
}

/// 超时或 Invalid 之后对链上状态的核对结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// 消息记录已存在，说明 bundle 实际已经上链。
    RecordCreated,
    /// 只有缓冲区存在。
    BufferStaged { staged_len: usize, final_size: usize },
    NothingOnChain,
    /// 查询失败，状态未知。
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    SimulationRejected { index: usize, reason: String },
    Landed(LandedBundle),
    Failed(FailedBundle),
    Invalid {
        bundle_id: String,
        reconciliation: Reconciliation,
    },
    TimedOut {
        bundle_id: String,
        reconciliation: Reconciliation,
    },
}

impl AttemptOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::SimulationRejected { .. } => "simulation_rejected",
            AttemptOutcome::Landed(_) => "landed",
            AttemptOutcome::Failed(_) => "failed",
            AttemptOutcome::Invalid { .. } => "invalid",
            AttemptOutcome::TimedOut { .. } => "timed_out",
        }
    }

    /// 原子失败：bundle 中没有任何交易生效，可换槽位重试。
    fn is_safe_to_retry(&self) -> bool {
        matches!(
            self,
            AttemptOutcome::SimulationRejected { .. } | AttemptOutcome::Failed(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub attempts: u32,
    pub slot_index: u8,
    pub buffer: Pubkey,
    pub record: Pubkey,
    pub outcome: AttemptOutcome,
}

/// 调用方要执行的消息及其附加参数。
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub message: TransactionMessage,
    pub lookup_tables: Vec<Pubkey>,
    pub ephemeral_signers: u8,
    pub memo: Option<String>,
}

/// 依次分配缓冲区 / 记录槽位，同一进程内不重复。
#[derive(Debug, Clone)]
pub struct BufferSlotAllocator {
    first: u8,
    next: Option<u8>,
}

impl BufferSlotAllocator {
    pub fn new(first: u8) -> Self {
        Self {
            first,
            next: Some(first),
        }
    }

    pub fn next_slot(&mut self) -> Option<u8> {
        let slot = self.next?;
        self.next = slot.checked_add(1);
        Some(slot)
    }

    pub fn first(&self) -> u8 {
        self.first
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub simulate: bool,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    pub first_slot_index: u8,
}

impl From<&PipelineConfig> for PipelineSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            simulate: config.simulate,
            max_attempts: config.max_attempts.max(1),
            retry_backoff: config.retry_backoff(),
            poll_interval: config.poll_interval(),
            poll_timeout: config.poll_timeout(),
            first_slot_index: config.first_slot_index,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

pub struct Pipeline {
    signer: Arc<Keypair>,
    reader: Arc<dyn ChainReader>,
    cache: Arc<LookupTableCache>,
    uploader: BufferUploader,
    assembler: TransactionAssembler,
    relay: BundleClient,
    tips: TipSelector,
    settings: PipelineSettings,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        ctx: &ExecutionContext,
        cache: Arc<LookupTableCache>,
        relay: BundleClient,
        tips: TipSelector,
        config: &PipelineConfig,
    ) -> Result<Self, PipelineError> {
        let uploader = BufferUploader::new(ctx.program_id, config.chunk_size)?;
        let compute: ComputeParams = config.compute.into();
        Ok(Self {
            signer: ctx.signer.clone(),
            reader: ctx.rpc.clone(),
            cache,
            uploader,
            assembler: TransactionAssembler::new(ctx.program_id, compute),
            relay,
            tips,
            settings: PipelineSettings::from(config),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_reader(mut self, reader: Arc<dyn ChainReader>) -> Self {
        self.reader = reader;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn schedule(&self) -> PollSchedule {
        PollSchedule::new(self.settings.poll_interval, self.settings.poll_timeout)
            .with_cancel(self.cancel.clone())
    }

    /// 组装但不提交；`dry-run` / `simulate` 命令使用。
    pub async fn prepare(
        &self,
        request: &SubmitRequest,
        slot_index: u8,
    ) -> Result<AssembledBundle, PipelineError> {
        let creator = self.signer.pubkey();
        let tables = self.cache.resolve_all(&request.lookup_tables).await?;
        let compiled = request.message.compile(&tables)?;
        let encoded = encode(&compiled)?;
        let plan = self.uploader.plan(&encoded, &creator, slot_index)?;
        debug!(
            target: "pipeline",
            slot = slot_index,
            size = encoded.len(),
            chunks = plan.chunks().len(),
            "消息已编码并切块"
        );

        let recipient = self.tips.tip_account().ok_or(PipelineError::NoTipWallet)?;
        let lamports = self.tips.select_tip().await;
        let blockhash = self.reader.latest_blockhash().await?;

        let bundle = self.assembler.assemble(
            &self.signer,
            &BundleRequest {
                plan: &plan,
                message: &compiled,
                lookup_tables: &tables,
                transaction_index: slot_index,
                ephemeral_signers: request.ephemeral_signers,
                tip: TipTransfer {
                    recipient,
                    lamports,
                },
                memo: request.memo.clone(),
            },
            blockhash,
        )?;
        Ok(bundle)
    }

    /// 只做 relay 侧模拟，不提交。
    pub async fn simulate_only(
        &self,
        request: &SubmitRequest,
    ) -> Result<SimulationReport, PipelineError> {
        let bundle = self
            .prepare(request, self.settings.first_slot_index)
            .await?;
        Ok(self.relay.simulate(&bundle.transactions, &[]).await?)
    }

    /// 单次尝试：组装 → （可选）模拟 → 提交 → 轮询到终态。
    pub async fn run_attempt(
        &self,
        request: &SubmitRequest,
        slot_index: u8,
    ) -> Result<(AssembledBundle, AttemptOutcome), PipelineError> {
        let bundle = self.prepare(request, slot_index).await?;

        let units = if self.settings.simulate {
            match self.relay.simulate(&bundle.transactions, &[]).await? {
                SimulationReport::Succeeded { units } => units,
                SimulationReport::Failed { index, reason } => {
                    let role = bundle
                        .roles
                        .get(index)
                        .map(|role| role.label())
                        .unwrap_or_default();
                    warn!(
                        target: "pipeline",
                        slot = slot_index,
                        index,
                        role = %role,
                        reason = %reason,
                        "模拟未通过，放弃提交"
                    );
                    return Ok((bundle, AttemptOutcome::SimulationRejected { index, reason }));
                }
            }
        } else {
            Vec::new()
        };

        let submitted = self.relay.submit(&bundle.transactions).await?;
        let status = self
            .relay
            .poll(&submitted, &units, &self.schedule())
            .await?;

        let outcome = match status {
            BundleStatus::Landed(landed) => AttemptOutcome::Landed(landed),
            BundleStatus::Failed(failed) => AttemptOutcome::Failed(failed),
            BundleStatus::Invalid => AttemptOutcome::Invalid {
                bundle_id: submitted.bundle_id.clone(),
                reconciliation: self.reconcile(&bundle).await,
            },
            BundleStatus::TimedOut | BundleStatus::Pending => AttemptOutcome::TimedOut {
                bundle_id: submitted.bundle_id.clone(),
                reconciliation: self.reconcile(&bundle).await,
            },
        };
        Ok((bundle, outcome))
    }

    /// 顺序重试直到上链、本地致命错误或用尽尝试次数。
    ///
    /// 只有原子失败（模拟拒绝、bundle Failed）与可重试的网络错误会进入下一次尝试；
    /// Invalid / 超时的结果不确定，核对链上状态后直接返回。
    pub async fn run_with_retries(
        &self,
        request: &SubmitRequest,
    ) -> Result<PipelineReport, PipelineError> {
        let mut slots = BufferSlotAllocator::new(self.settings.first_slot_index);
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let slot_index = slots.next_slot().ok_or(PipelineError::SlotsExhausted {
                first: slots.first(),
            })?;
            info!(
                target: "pipeline",
                attempt,
                max_attempts,
                slot = slot_index,
                "开始提交尝试"
            );

            match self.run_attempt(request, slot_index).await {
                Ok((bundle, outcome)) => {
                    let exhausted = attempt >= max_attempts;
                    if outcome.is_safe_to_retry() && !exhausted {
                        warn!(
                            target: "pipeline",
                            attempt,
                            outcome = outcome.label(),
                            backoff = ?self.settings.retry_backoff,
                            "尝试未成功，退避后重试"
                        );
                        self.backoff().await?;
                        continue;
                    }
                    info!(
                        target: "pipeline",
                        attempt,
                        outcome = outcome.label(),
                        "提交流程结束"
                    );
                    return Ok(PipelineReport {
                        attempts: attempt,
                        slot_index,
                        buffer: bundle.buffer,
                        record: bundle.record,
                        outcome,
                    });
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    warn!(
                        target: "pipeline",
                        attempt,
                        error = %err,
                        backoff = ?self.settings.retry_backoff,
                        "尝试出错，退避后重试"
                    );
                    self.backoff().await?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn backoff(&self) -> Result<(), PipelineError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RelayError::Cancelled.into()),
            _ = tokio::time::sleep(self.settings.retry_backoff) => Ok(()),
        }
    }

    async fn reconcile(&self, bundle: &AssembledBundle) -> Reconciliation {
        let record = match fetch_record(self.reader.as_ref(), &bundle.record).await {
            Ok(state) => state,
            Err(err) => return Reconciliation::Unknown(err.to_string()),
        };
        if matches!(record, RecordState::Loaded(_)) {
            info!(
                target: "pipeline",
                record = %bundle.record,
                "轮询未确认，但消息记录已存在"
            );
            return Reconciliation::RecordCreated;
        }

        match fetch_staged_buffer(self.reader.as_ref(), &bundle.buffer).await {
            Ok(Some(staged)) => Reconciliation::BufferStaged {
                staged_len: staged.staged_len(),
                final_size: staged.final_buffer_size as usize,
            },
            Ok(None) => Reconciliation::NothingOnChain,
            Err(err) => Reconciliation::Unknown(err.to_string()),
        }
    }
}
