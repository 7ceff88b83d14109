//! 把上传计划与编译后的消息组装成按序签名的交易：create → extend × N → finalize → execute。

pub mod execute;

use bincode::config::standard;
use bincode::error::EncodeError;
use bincode::serde::encode_to_vec;
use solana_sdk::hash::Hash;
use solana_sdk::instruction::Instruction;
use solana_sdk::message::v0::Message as V0Message;
use solana_sdk::message::{AddressLookupTableAccount, CompileError, VersionedMessage};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::signer::SignerError;
use solana_sdk::transaction::VersionedTransaction;
use solana_system_interface::instruction as system_instruction;
use thiserror::Error;
use tracing::debug;

use crate::buffer::{BufferError, BufferUploadPlan, IntegrityError};
use crate::instructions::compute_budget::{
    compute_budget_sequence, compute_unit_limit_instruction,
};
use crate::message::{CompiledMessage, EncodedMessageBuffer, EncodingError};
use crate::program::instructions::{SuperTransactionCreateArgs, super_transaction_create_from_buffer};
use crate::program::transaction_address;

pub use execute::{
    RecordError, RecordState, execute_instruction, fetch_record, remaining_accounts,
};

/// 单笔交易序列化后的上限（IPv6 MTU 减去头部）。
pub const MAX_TRANSACTION_SIZE: usize = 1232;
pub const DEFAULT_FINALIZE_UNIT_LIMIT: u32 = 500_000;
pub const DEFAULT_EXECUTE_UNIT_PRICE: u64 = 10_000;
pub const DEFAULT_EXECUTE_UNIT_LIMIT: u32 = 1_400_000;
pub const DEFAULT_HEAP_FRAME_BYTES: u32 = 256 * 1024;

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error("编译交易消息失败: {0}")]
    Compile(#[from] CompileError),
    #[error("签名交易失败: {0}")]
    Sign(#[from] SignerError),
    #[error("序列化交易失败: {0}")]
    Serialize(#[from] EncodeError),
    #[error("构造指令失败: {0}")]
    Instruction(#[from] std::io::Error),
    #[error("{label} 交易 {size} 字节超过上限 {max} 字节")]
    TransactionTooLarge {
        label: String,
        size: usize,
        max: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeParams {
    pub finalize_unit_limit: u32,
    pub execute_unit_price: u64,
    pub execute_unit_limit: u32,
    pub heap_frame_bytes: u32,
}

impl Default for ComputeParams {
    fn default() -> Self {
        Self {
            finalize_unit_limit: DEFAULT_FINALIZE_UNIT_LIMIT,
            execute_unit_price: DEFAULT_EXECUTE_UNIT_PRICE,
            execute_unit_limit: DEFAULT_EXECUTE_UNIT_LIMIT,
            heap_frame_bytes: DEFAULT_HEAP_FRAME_BYTES,
        }
    }
}

/// 小费转账：目标为 relay 的小费账户之一。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TipTransfer {
    pub recipient: Pubkey,
    pub lamports: u64,
}

/// 组装一次 bundle 所需的全部输入。
#[derive(Debug, Clone)]
pub struct BundleRequest<'a> {
    pub plan: &'a BufferUploadPlan,
    pub message: &'a CompiledMessage,
    pub lookup_tables: &'a [AddressLookupTableAccount],
    pub transaction_index: u8,
    pub ephemeral_signers: u8,
    pub tip: TipTransfer,
    pub memo: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionRole {
    CreateBuffer,
    ExtendBuffer(usize),
    Finalize,
    Execute,
    CloseBuffer,
    CloseRecord,
}

impl TransactionRole {
    pub fn label(&self) -> String {
        match self {
            TransactionRole::CreateBuffer => "create".to_string(),
            TransactionRole::ExtendBuffer(chunk) => format!("extend#{chunk}"),
            TransactionRole::Finalize => "finalize".to_string(),
            TransactionRole::Execute => "execute".to_string(),
            TransactionRole::CloseBuffer => "close-buffer".to_string(),
            TransactionRole::CloseRecord => "close-record".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssembledBundle {
    pub transactions: Vec<VersionedTransaction>,
    pub roles: Vec<TransactionRole>,
    pub buffer: Pubkey,
    pub record: Pubkey,
    pub blockhash: Hash,
}

impl AssembledBundle {
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TransactionAssembler {
    program_id: Pubkey,
    compute: ComputeParams,
}

impl TransactionAssembler {
    pub fn new(program_id: Pubkey, compute: ComputeParams) -> Self {
        Self {
            program_id,
            compute,
        }
    }

    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    pub fn compute(&self) -> &ComputeParams {
        &self.compute
    }

    /// 所有交易共用同一个 blockhash；finalize 仅在本地校验通过后生成。
    pub fn assemble(
        &self,
        signer: &Keypair,
        request: &BundleRequest<'_>,
        blockhash: Hash,
    ) -> Result<AssembledBundle, AssemblyError> {
        let creator = signer.pubkey();
        let plan = request.plan;
        let (record, _) = transaction_address(&creator, request.transaction_index, &self.program_id);

        let mut transactions = Vec::with_capacity(plan.chunks().len() + 2);
        let mut roles = Vec::with_capacity(plan.chunks().len() + 2);

        let create = vec![
            plan.create_instruction()?,
            system_instruction::transfer(&creator, &request.tip.recipient, request.tip.lamports),
        ];
        transactions.push(self.sign(signer, &create, &[], blockhash, TransactionRole::CreateBuffer)?);
        roles.push(TransactionRole::CreateBuffer);

        for (offset, extend) in plan.extend_instructions()?.into_iter().enumerate() {
            let role = TransactionRole::ExtendBuffer(offset + 1);
            transactions.push(self.sign(signer, &[extend], &[], blockhash, role)?);
            roles.push(role);
        }

        plan.verify()?;
        let finalize = self.finalize_instructions(&creator, &record, plan, request)?;
        transactions.push(self.sign(signer, &finalize, &[], blockhash, TransactionRole::Finalize)?);
        roles.push(TransactionRole::Finalize);

        let execute = self.execute_instructions(
            &creator,
            &record,
            request.message,
            request.lookup_tables,
            request.ephemeral_signers,
        )?;
        transactions.push(self.sign(
            signer,
            &execute,
            request.lookup_tables,
            blockhash,
            TransactionRole::Execute,
        )?);
        roles.push(TransactionRole::Execute);

        debug!(
            target: "assembly",
            buffer = %plan.buffer(),
            record = %record,
            count = transactions.len(),
            "bundle 交易组装完成"
        );

        Ok(AssembledBundle {
            transactions,
            roles,
            buffer: *plan.buffer(),
            record,
            blockhash,
        })
    }

    fn finalize_instructions(
        &self,
        creator: &Pubkey,
        record: &Pubkey,
        plan: &BufferUploadPlan,
        request: &BundleRequest<'_>,
    ) -> Result<Vec<Instruction>, AssemblyError> {
        let args = SuperTransactionCreateArgs {
            transaction_index: request.transaction_index,
            ephemeral_signers: request.ephemeral_signers,
            transaction_message: EncodedMessageBuffer::placeholder().into_bytes(),
            memo: request.memo.clone(),
        };
        Ok(vec![
            compute_unit_limit_instruction(self.compute.finalize_unit_limit),
            super_transaction_create_from_buffer(
                &self.program_id,
                record,
                creator,
                creator,
                plan.buffer(),
                &args,
            )?,
        ])
    }

    /// execute 交易的指令：compute budget（price → limit → heap）加上 execute 本身。
    pub fn execute_instructions(
        &self,
        creator: &Pubkey,
        record: &Pubkey,
        message: &CompiledMessage,
        lookup_tables: &[AddressLookupTableAccount],
        ephemeral_signers: u8,
    ) -> Result<Vec<Instruction>, AssemblyError> {
        let mut instructions: Vec<Instruction> = compute_budget_sequence(
            self.compute.execute_unit_price,
            self.compute.execute_unit_limit,
            self.compute.heap_frame_bytes,
        )
        .into_vec();
        instructions.push(execute_instruction(
            &self.program_id,
            record,
            creator,
            message,
            lookup_tables,
            ephemeral_signers,
        )?);
        Ok(instructions)
    }

    pub fn sign(
        &self,
        signer: &Keypair,
        instructions: &[Instruction],
        lookup_tables: &[AddressLookupTableAccount],
        blockhash: Hash,
        role: TransactionRole,
    ) -> Result<VersionedTransaction, AssemblyError> {
        let message =
            V0Message::try_compile(&signer.pubkey(), instructions, lookup_tables, blockhash)?;
        let tx = VersionedTransaction::try_new(VersionedMessage::V0(message), &[signer])?;
        ensure_fits(&tx, &role.label())?;
        Ok(tx)
    }
}

pub fn serialized_size(tx: &VersionedTransaction) -> Result<usize, EncodeError> {
    let config = standard().with_fixed_int_encoding().with_little_endian();
    Ok(encode_to_vec(tx, config)?.len())
}

pub fn ensure_fits(tx: &VersionedTransaction, label: &str) -> Result<(), AssemblyError> {
    let size = serialized_size(tx)?;
    if size > MAX_TRANSACTION_SIZE {
        return Err(AssemblyError::TransactionTooLarge {
            label: label.to_string(),
            size,
            max: MAX_TRANSACTION_SIZE,
        });
    }
    Ok(())
}
