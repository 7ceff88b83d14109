//! 直接走 RPC 的单笔交易操作：单独执行已创建的记录、关闭缓冲区 / 记录、查看槽位状态。

use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use tracing::info;

use crate::assembly::{
    ComputeParams, RecordState, TransactionAssembler, TransactionRole, fetch_record,
};
use crate::buffer::fetch_staged_buffer;
use crate::cache::LookupTableCache;
use crate::context::ExecutionContext;
use crate::pipeline::PipelineError;
use crate::program::instructions::{super_transaction_accounts_close, txn_buffer_close};
use crate::program::{TransactionBufferAccount, transaction_address, transaction_buffer_address};

/// 某个槽位上缓冲区与记录的当前状态。
#[derive(Debug, Clone)]
pub struct SlotReport {
    pub slot_index: u8,
    pub buffer: Pubkey,
    pub staged: Option<TransactionBufferAccount>,
    pub record: Pubkey,
    pub record_state: RecordState,
}

pub async fn inspect_slot(
    ctx: &ExecutionContext,
    slot_index: u8,
) -> Result<SlotReport, PipelineError> {
    let creator = ctx.creator();
    let (buffer, _) = transaction_buffer_address(&creator, slot_index, &ctx.program_id);
    let (record, _) = transaction_address(&creator, slot_index, &ctx.program_id);
    let staged = fetch_staged_buffer(ctx.rpc.as_ref(), &buffer).await?;
    let record_state = fetch_record(ctx.rpc.as_ref(), &record).await?;
    Ok(SlotReport {
        slot_index,
        buffer,
        staged,
        record,
        record_state,
    })
}

/// 对已经 finalize 的记录单独发送 execute 交易。
pub async fn execute_record(
    ctx: &ExecutionContext,
    cache: &LookupTableCache,
    compute: ComputeParams,
    slot_index: u8,
) -> Result<Signature, PipelineError> {
    let creator = ctx.creator();
    let (record, _) = transaction_address(&creator, slot_index, &ctx.program_id);
    let account = match fetch_record(ctx.rpc.as_ref(), &record).await? {
        RecordState::Loaded(account) => account,
        RecordState::NotCreated => return Err(PipelineError::RecordMissing { record }),
    };

    let table_keys: Vec<Pubkey> = account
        .message
        .address_table_lookups
        .iter()
        .map(|lookup| lookup.account_key)
        .collect();
    let tables = cache.resolve_all(&table_keys).await?;

    let assembler = TransactionAssembler::new(ctx.program_id, compute);
    let instructions = assembler.execute_instructions(
        &creator,
        &record,
        &account.message,
        &tables,
        account.ephemeral_signer_count(),
    )?;
    let blockhash = ctx.rpc.get_latest_blockhash().await?;
    let tx = assembler.sign(
        &ctx.signer,
        &instructions,
        &tables,
        blockhash,
        TransactionRole::Execute,
    )?;
    let signature = ctx.rpc.send_and_confirm_transaction(&tx).await?;
    info!(
        target: "maintenance",
        record = %record,
        signature = %signature,
        "记录已单独执行"
    );
    Ok(signature)
}

pub async fn close_buffer(
    ctx: &ExecutionContext,
    slot_index: u8,
) -> Result<Signature, PipelineError> {
    let creator = ctx.creator();
    let (buffer, _) = transaction_buffer_address(&creator, slot_index, &ctx.program_id);
    let ix = txn_buffer_close(&ctx.program_id, &buffer, &creator);
    let signature = send_single(ctx, ix, TransactionRole::CloseBuffer).await?;
    info!(
        target: "maintenance",
        buffer = %buffer,
        signature = %signature,
        "缓冲区已关闭"
    );
    Ok(signature)
}

pub async fn close_record(
    ctx: &ExecutionContext,
    slot_index: u8,
) -> Result<Signature, PipelineError> {
    let creator = ctx.creator();
    let (record, _) = transaction_address(&creator, slot_index, &ctx.program_id);
    let ix = super_transaction_accounts_close(&ctx.program_id, &record, &creator);
    let signature = send_single(ctx, ix, TransactionRole::CloseRecord).await?;
    info!(
        target: "maintenance",
        record = %record,
        signature = %signature,
        "消息记录已关闭，租金已退回"
    );
    Ok(signature)
}

async fn send_single(
    ctx: &ExecutionContext,
    ix: Instruction,
    role: TransactionRole,
) -> Result<Signature, PipelineError> {
    let assembler = TransactionAssembler::new(ctx.program_id, ComputeParams::default());
    let blockhash = ctx.rpc.get_latest_blockhash().await?;
    let tx = assembler.sign(&ctx.signer, &[ix], &[], blockhash, role)?;
    Ok(ctx.rpc.send_and_confirm_transaction(&tx).await?)
}
