//! 把编码后的消息拆分成若干块，生成 create + N×extend 指令写入链上缓冲区。

pub mod verify;

use solana_sdk::hash::Hash;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

use crate::message::{EncodedMessageBuffer, content_hash};
use crate::program::instructions::{
    TransactionBufferCreateArgs, TransactionBufferExtendArgs, txn_buffer_create, txn_buffer_extend,
};
use crate::program::{MAX_BUFFER_SIZE, transaction_buffer_address};

pub use verify::{StagedProgress, VerifyError, fetch_staged_buffer, verify_staged};

/// 单个 extend 交易能安全携带的字节数。
pub const DEFAULT_CHUNK_SIZE: usize = 700;

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("分块上限必须大于 0")]
    InvalidChunkLimit,
    #[error("消息为空，无需暂存")]
    EmptyPayload,
    #[error("消息 {size} 字节超过缓冲区上限 {max} 字节")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("第 {index} 块长度 {len} 超过分块上限 {limit}")]
    OversizeChunk {
        index: usize,
        len: usize,
        limit: usize,
    },
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
    #[error("构造缓冲区指令失败: {0}")]
    Instruction(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    #[error("暂存长度 {actual} 与声明长度 {expected} 不一致")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("暂存内容哈希 {actual} 与声明哈希 {expected} 不一致")]
    HashMismatch { expected: Hash, actual: Hash },
    #[error("缓冲区 {buffer} 的创建者为 {actual}，期望 {expected}")]
    CreatorMismatch {
        buffer: Pubkey,
        expected: Pubkey,
        actual: Pubkey,
    },
    #[error("缓冲区已暂存内容在偏移 {offset} 处与本地消息不一致")]
    Diverged { offset: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct BufferUploader {
    program_id: Pubkey,
    chunk_limit: usize,
}

impl BufferUploader {
    pub fn new(program_id: Pubkey, chunk_limit: usize) -> Result<Self, BufferError> {
        if chunk_limit == 0 {
            return Err(BufferError::InvalidChunkLimit);
        }
        Ok(Self {
            program_id,
            chunk_limit,
        })
    }

    pub fn chunk_limit(&self) -> usize {
        self.chunk_limit
    }

    /// 按分块上限切分消息，块数为 `ceil(len / limit)`，只有最后一块可以不满。
    pub fn plan(
        &self,
        encoded: &EncodedMessageBuffer,
        creator: &Pubkey,
        buffer_index: u8,
    ) -> Result<BufferUploadPlan, BufferError> {
        let bytes = encoded.bytes();
        let final_size = checked_final_size(bytes.len())?;

        let total = bytes.len();
        let count = total.div_ceil(self.chunk_limit);
        let mut chunks = Vec::with_capacity(count);
        for index in 0..count {
            let start = index * self.chunk_limit;
            let end = (start + self.chunk_limit).min(total);
            chunks.push(bytes[start..end].to_vec());
        }

        Ok(self.assemble(creator, buffer_index, encoded.hash(), final_size, chunks))
    }

    /// 使用调用方给定的分块（例如续传时）构建计划，并校验与声明的大小、哈希一致。
    pub fn plan_from_chunks(
        &self,
        chunks: Vec<Vec<u8>>,
        final_hash: Hash,
        creator: &Pubkey,
        buffer_index: u8,
    ) -> Result<BufferUploadPlan, BufferError> {
        for (index, chunk) in chunks.iter().enumerate() {
            if chunk.len() > self.chunk_limit {
                return Err(BufferError::OversizeChunk {
                    index,
                    len: chunk.len(),
                    limit: self.chunk_limit,
                });
            }
        }
        let total: usize = chunks.iter().map(Vec::len).sum();
        let final_size = checked_final_size(total)?;
        let plan = self.assemble(creator, buffer_index, final_hash, final_size, chunks);
        plan.verify()?;
        Ok(plan)
    }

    fn assemble(
        &self,
        creator: &Pubkey,
        buffer_index: u8,
        final_hash: Hash,
        final_size: u16,
        chunks: Vec<Vec<u8>>,
    ) -> BufferUploadPlan {
        let (buffer, _) = transaction_buffer_address(creator, buffer_index, &self.program_id);
        BufferUploadPlan {
            program_id: self.program_id,
            buffer,
            creator: *creator,
            buffer_index,
            final_hash,
            final_size,
            chunk_limit: self.chunk_limit,
            chunks,
        }
    }
}

fn checked_final_size(len: usize) -> Result<u16, BufferError> {
    if len == 0 {
        return Err(BufferError::EmptyPayload);
    }
    if len > MAX_BUFFER_SIZE {
        return Err(BufferError::PayloadTooLarge {
            size: len,
            max: MAX_BUFFER_SIZE,
        });
    }
    u16::try_from(len).map_err(|_| BufferError::PayloadTooLarge {
        size: len,
        max: MAX_BUFFER_SIZE,
    })
}

/// 一次上传的完整计划：`chunks[0]` 随 create 写入，其余每块对应一次 extend。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferUploadPlan {
    program_id: Pubkey,
    buffer: Pubkey,
    creator: Pubkey,
    buffer_index: u8,
    final_hash: Hash,
    final_size: u16,
    chunk_limit: usize,
    chunks: Vec<Vec<u8>>,
}

impl BufferUploadPlan {
    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    pub fn buffer(&self) -> &Pubkey {
        &self.buffer
    }

    pub fn creator(&self) -> &Pubkey {
        &self.creator
    }

    pub fn buffer_index(&self) -> u8 {
        self.buffer_index
    }

    pub fn final_hash(&self) -> Hash {
        self.final_hash
    }

    pub fn final_size(&self) -> usize {
        self.final_size as usize
    }

    pub fn chunk_limit(&self) -> usize {
        self.chunk_limit
    }

    pub fn chunks(&self) -> &[Vec<u8>] {
        &self.chunks
    }

    pub fn extend_count(&self) -> usize {
        self.chunks.len().saturating_sub(1)
    }

    pub fn staged_bytes(&self) -> Vec<u8> {
        self.chunks.concat()
    }

    /// finalize 之前的本地校验：分块拼接结果的长度与哈希必须与声明一致。
    pub fn verify(&self) -> Result<(), IntegrityError> {
        let staged = self.staged_bytes();
        if staged.len() != self.final_size() {
            return Err(IntegrityError::SizeMismatch {
                expected: self.final_size(),
                actual: staged.len(),
            });
        }
        let actual = content_hash(&staged);
        if actual != self.final_hash {
            return Err(IntegrityError::HashMismatch {
                expected: self.final_hash,
                actual,
            });
        }
        Ok(())
    }

    pub fn create_instruction(&self) -> Result<Instruction, BufferError> {
        let first = self.chunks.first().cloned().unwrap_or_default();
        let args = TransactionBufferCreateArgs {
            buffer_index: self.buffer_index,
            final_buffer_hash: self.final_hash.to_bytes(),
            final_buffer_size: self.final_size,
            buffer: first,
        };
        Ok(txn_buffer_create(
            &self.program_id,
            &self.buffer,
            &self.creator,
            &self.creator,
            &args,
        )?)
    }

    pub fn extend_instructions(&self) -> Result<Vec<Instruction>, BufferError> {
        self.extend_instructions_from(1)
    }

    /// 从第 `start` 块开始生成 extend 指令（块 0 属于 create），便于中断后续传。
    pub fn extend_instructions_from(&self, start: usize) -> Result<Vec<Instruction>, BufferError> {
        let start = start.max(1);
        let mut instructions = Vec::with_capacity(self.chunks.len().saturating_sub(start));
        for chunk in self.chunks.iter().skip(start) {
            let args = TransactionBufferExtendArgs {
                buffer: chunk.clone(),
            };
            instructions.push(txn_buffer_extend(
                &self.program_id,
                &self.buffer,
                &self.creator,
                &args,
            )?);
        }
        Ok(instructions)
    }
}
