use solana_client::client_error::ClientError;
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;
use tracing::debug;

use crate::context::ChainReader;
use crate::program::{AccountDecodeError, TransactionBufferAccount};

use super::{BufferUploadPlan, IntegrityError};

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("读取缓冲区账户失败: {0}")]
    Rpc(#[from] ClientError),
    #[error("解析缓冲区账户失败: {0}")]
    Decode(#[from] AccountDecodeError),
}

/// 链上缓冲区相对本地计划的进度。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedProgress {
    pub staged_len: usize,
    pub final_size: usize,
    /// 下一块待写入的分块序号；已写满或未按分块边界对齐时为 `None`。
    pub next_chunk: Option<usize>,
    pub complete: bool,
}

pub async fn fetch_staged_buffer(
    reader: &dyn ChainReader,
    address: &Pubkey,
) -> Result<Option<TransactionBufferAccount>, VerifyError> {
    let Some(data) = reader.account_data(address).await? else {
        debug!(target: "buffer::verify", buffer = %address, "缓冲区账户不存在");
        return Ok(None);
    };
    Ok(Some(TransactionBufferAccount::decode(&data)?))
}

/// 比对链上暂存内容与本地计划：声明的大小、哈希、创建者必须一致，已写入部分必须是前缀。
pub fn verify_staged(
    plan: &BufferUploadPlan,
    staged: &TransactionBufferAccount,
) -> Result<StagedProgress, IntegrityError> {
    if staged.creator != *plan.creator() {
        return Err(IntegrityError::CreatorMismatch {
            buffer: *plan.buffer(),
            expected: *plan.creator(),
            actual: staged.creator,
        });
    }
    if staged.final_buffer_size as usize != plan.final_size() {
        return Err(IntegrityError::SizeMismatch {
            expected: plan.final_size(),
            actual: staged.final_buffer_size as usize,
        });
    }
    if staged.final_buffer_hash != plan.final_hash() {
        return Err(IntegrityError::HashMismatch {
            expected: plan.final_hash(),
            actual: staged.final_buffer_hash,
        });
    }

    let expected = plan.staged_bytes();
    if staged.buffer.len() > expected.len() {
        return Err(IntegrityError::SizeMismatch {
            expected: expected.len(),
            actual: staged.buffer.len(),
        });
    }
    if let Some(offset) = staged
        .buffer
        .iter()
        .zip(expected.iter())
        .position(|(left, right)| left != right)
    {
        return Err(IntegrityError::Diverged { offset });
    }

    let complete = staged.is_complete() && staged.hash_matches();
    let staged_len = staged.staged_len();
    let next_chunk = if complete || staged_len % plan.chunk_limit() != 0 {
        None
    } else {
        Some(staged_len / plan.chunk_limit())
    };

    Ok(StagedProgress {
        staged_len,
        final_size: plan.final_size(),
        next_chunk,
        complete,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferUploader;
    use crate::message::EncodedMessageBuffer;
    use crate::program::SUPER_TXN_PROGRAM_ID;

    fn staged_from(plan: &BufferUploadPlan, bytes: Vec<u8>) -> TransactionBufferAccount {
        TransactionBufferAccount {
            creator: *plan.creator(),
            buffer_index: plan.buffer_index(),
            final_buffer_hash: plan.final_hash(),
            final_buffer_size: plan.final_size() as u16,
            buffer: bytes,
        }
    }

    fn sample_plan() -> BufferUploadPlan {
        let uploader = BufferUploader::new(SUPER_TXN_PROGRAM_ID, 10).expect("uploader");
        let encoded = EncodedMessageBuffer::from_bytes((0u8..35).collect());
        uploader
            .plan(&encoded, &Pubkey::new_unique(), 2)
            .expect("plan")
    }

    #[test]
    fn partial_buffer_reports_next_chunk() {
        let plan = sample_plan();
        let staged = staged_from(&plan, plan.staged_bytes()[..20].to_vec());
        let progress = verify_staged(&plan, &staged).expect("prefix is valid");
        assert_eq!(progress.staged_len, 20);
        assert_eq!(progress.next_chunk, Some(2));
        assert!(!progress.complete);
    }

    #[test]
    fn full_buffer_is_complete() {
        let plan = sample_plan();
        let staged = staged_from(&plan, plan.staged_bytes());
        let progress = verify_staged(&plan, &staged).expect("complete");
        assert!(progress.complete);
        assert_eq!(progress.next_chunk, None);
    }

    #[test]
    fn divergent_bytes_are_integrity_errors() {
        let plan = sample_plan();
        let mut bytes = plan.staged_bytes()[..15].to_vec();
        bytes[12] ^= 0xFF;
        let staged = staged_from(&plan, bytes);
        assert_eq!(
            verify_staged(&plan, &staged),
            Err(IntegrityError::Diverged { offset: 12 })
        );

        let mut foreign = staged_from(&plan, Vec::new());
        foreign.creator = Pubkey::new_unique();
        assert!(matches!(
            verify_staged(&plan, &foreign),
            Err(IntegrityError::CreatorMismatch { .. })
        ));
    }
}
