use std::io;

use borsh::BorshDeserialize;
use once_cell::sync::Lazy;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

use crate::message::wire::{
    SmallVecU8, SmallVecU16, WireInstruction, WireMessage, WireTableLookup,
};
use crate::message::{CompiledMessage, content_hash, decode};

use super::instructions::account_discriminator;

static TRANSACTION_BUFFER_DISCRIMINATOR: Lazy<[u8; 8]> =
    Lazy::new(|| account_discriminator("TransactionBuffer"));
static SUPER_TRANSACTION_DISCRIMINATOR: Lazy<[u8; 8]> =
    Lazy::new(|| account_discriminator("SuperTransaction"));

#[derive(Debug, Error)]
pub enum AccountDecodeError {
    #[error("账户数据过短: {0} 字节")]
    TooShort(usize),
    #[error("账户判别符不匹配，期望 {expected}")]
    Discriminator { expected: &'static str },
    #[error("账户反序列化失败: {0}")]
    Borsh(#[from] io::Error),
    #[error("记录中的消息无效: {0}")]
    Message(#[from] crate::message::EncodingError),
}

#[derive(BorshDeserialize)]
struct RawTransactionBuffer {
    creator: [u8; 32],
    buffer_index: u8,
    final_buffer_hash: [u8; 32],
    final_buffer_size: u16,
    buffer: Vec<u8>,
}

/// 链上暂存缓冲区的快照。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionBufferAccount {
    pub creator: Pubkey,
    pub buffer_index: u8,
    pub final_buffer_hash: Hash,
    pub final_buffer_size: u16,
    pub buffer: Vec<u8>,
}

impl TransactionBufferAccount {
    pub fn decode(data: &[u8]) -> Result<Self, AccountDecodeError> {
        let mut body = strip_discriminator(
            data,
            &TRANSACTION_BUFFER_DISCRIMINATOR,
            "TransactionBuffer",
        )?;
        let raw = RawTransactionBuffer::deserialize(&mut body)?;
        Ok(Self {
            creator: Pubkey::new_from_array(raw.creator),
            buffer_index: raw.buffer_index,
            final_buffer_hash: Hash::new_from_array(raw.final_buffer_hash),
            final_buffer_size: raw.final_buffer_size,
            buffer: raw.buffer,
        })
    }

    pub fn staged_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_complete(&self) -> bool {
        self.buffer.len() == self.final_buffer_size as usize
    }

    /// 与链上 `validate_hash` 相同的判断。
    pub fn hash_matches(&self) -> bool {
        content_hash(&self.buffer) == self.final_buffer_hash
    }
}

#[derive(BorshDeserialize)]
struct RawSuperTransaction {
    creator: [u8; 32],
    ephemeral_signer_bumps: Vec<u8>,
    message: RawRecordMessage,
}

// 记录账户内的消息使用标准 borsh（u32 长度前缀），与上传时的紧凑格式不同。
#[derive(BorshDeserialize)]
struct RawRecordMessage {
    num_signers: u8,
    num_writable_signers: u8,
    num_writable_non_signers: u8,
    account_keys: Vec<[u8; 32]>,
    instructions: Vec<RawRecordInstruction>,
    address_table_lookups: Vec<RawRecordLookup>,
}

#[derive(BorshDeserialize)]
struct RawRecordInstruction {
    program_id_index: u8,
    account_indexes: Vec<u8>,
    data: Vec<u8>,
}

#[derive(BorshDeserialize)]
struct RawRecordLookup {
    account_key: [u8; 32],
    writable_indexes: Vec<u8>,
    readonly_indexes: Vec<u8>,
}

/// finalize 之后的消息记录账户。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperTransactionAccount {
    pub creator: Pubkey,
    pub ephemeral_signer_bumps: Vec<u8>,
    pub message: CompiledMessage,
}

impl SuperTransactionAccount {
    pub fn decode(data: &[u8]) -> Result<Self, AccountDecodeError> {
        let mut body =
            strip_discriminator(data, &SUPER_TRANSACTION_DISCRIMINATOR, "SuperTransaction")?;
        let raw = RawSuperTransaction::deserialize(&mut body)?;
        let message = raw.message;
        let wire = WireMessage {
            num_signers: message.num_signers,
            num_writable_signers: message.num_writable_signers,
            num_writable_non_signers: message.num_writable_non_signers,
            account_keys: SmallVecU8(message.account_keys),
            instructions: SmallVecU8(
                message
                    .instructions
                    .into_iter()
                    .map(|ix| WireInstruction {
                        program_id_index: ix.program_id_index,
                        account_indexes: SmallVecU8(ix.account_indexes),
                        data: SmallVecU16(ix.data),
                    })
                    .collect(),
            ),
            address_table_lookups: SmallVecU8(
                message
                    .address_table_lookups
                    .into_iter()
                    .map(|lookup| WireTableLookup {
                        account_key: lookup.account_key,
                        writable_indexes: SmallVecU8(lookup.writable_indexes),
                        readonly_indexes: SmallVecU8(lookup.readonly_indexes),
                    })
                    .collect(),
            ),
        };
        let compact = borsh::to_vec(&wire)?;
        Ok(Self {
            creator: Pubkey::new_from_array(raw.creator),
            ephemeral_signer_bumps: raw.ephemeral_signer_bumps,
            message: decode(&compact)?,
        })
    }

    pub fn ephemeral_signer_count(&self) -> u8 {
        self.ephemeral_signer_bumps.len().min(u8::MAX as usize) as u8
    }
}

fn strip_discriminator<'a>(
    data: &'a [u8],
    expected: &[u8; 8],
    name: &'static str,
) -> Result<&'a [u8], AccountDecodeError> {
    if data.len() < 8 {
        return Err(AccountDecodeError::TooShort(data.len()));
    }
    if &data[..8] != expected {
        return Err(AccountDecodeError::Discriminator { expected: name });
    }
    Ok(&data[8..])
}

#[cfg(test)]
pub(crate) fn encode_buffer_account(account: &TransactionBufferAccount) -> Vec<u8> {
    let mut data = TRANSACTION_BUFFER_DISCRIMINATOR.to_vec();
    data.extend_from_slice(account.creator.as_ref());
    data.push(account.buffer_index);
    data.extend_from_slice(account.final_buffer_hash.as_ref());
    data.extend_from_slice(&account.final_buffer_size.to_le_bytes());
    data.extend_from_slice(&(account.buffer.len() as u32).to_le_bytes());
    data.extend_from_slice(&account.buffer);
    data
}

#[cfg(test)]
pub(crate) fn encode_record_account(
    creator: &Pubkey,
    bumps: &[u8],
    message: &CompiledMessage,
) -> Vec<u8> {
    let mut data = SUPER_TRANSACTION_DISCRIMINATOR.to_vec();
    data.extend_from_slice(creator.as_ref());
    data.extend_from_slice(&(bumps.len() as u32).to_le_bytes());
    data.extend_from_slice(bumps);
    data.push(message.num_signers);
    data.push(message.num_writable_signers);
    data.push(message.num_writable_non_signers);
    data.extend_from_slice(&(message.account_keys.len() as u32).to_le_bytes());
    for key in &message.account_keys {
        data.extend_from_slice(key.as_ref());
    }
    data.extend_from_slice(&(message.instructions.len() as u32).to_le_bytes());
    for ix in &message.instructions {
        data.push(ix.program_id_index);
        data.extend_from_slice(&(ix.account_indexes.len() as u32).to_le_bytes());
        data.extend_from_slice(&ix.account_indexes);
        data.extend_from_slice(&(ix.data.len() as u32).to_le_bytes());
        data.extend_from_slice(&ix.data);
    }
    data.extend_from_slice(&(message.address_table_lookups.len() as u32).to_le_bytes());
    for lookup in &message.address_table_lookups {
        data.extend_from_slice(lookup.account_key.as_ref());
        data.extend_from_slice(&(lookup.writable_indexes.len() as u32).to_le_bytes());
        data.extend_from_slice(&lookup.writable_indexes);
        data.extend_from_slice(&(lookup.readonly_indexes.len() as u32).to_le_bytes());
        data.extend_from_slice(&lookup.readonly_indexes);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::CompiledInstruction;

    #[test]
    fn buffer_account_decodes_and_checks_hash() {
        let payload = vec![3u8; 120];
        let account = TransactionBufferAccount {
            creator: Pubkey::new_unique(),
            buffer_index: 9,
            final_buffer_hash: content_hash(&payload),
            final_buffer_size: 120,
            buffer: payload[..100].to_vec(),
        };
        let data = encode_buffer_account(&account);
        let decoded = TransactionBufferAccount::decode(&data).expect("decode buffer");
        assert_eq!(decoded, account);
        assert!(!decoded.is_complete());
        assert!(!decoded.hash_matches());

        let mut full = account.clone();
        full.buffer = payload;
        let decoded = TransactionBufferAccount::decode(&encode_buffer_account(&full))
            .expect("decode buffer");
        assert!(decoded.is_complete());
        assert!(decoded.hash_matches());
    }

    #[test]
    fn wrong_discriminator_is_rejected() {
        let mut data = vec![0u8; 64];
        data[0] = 1;
        assert!(matches!(
            TransactionBufferAccount::decode(&data),
            Err(AccountDecodeError::Discriminator { .. })
        ));
        assert!(matches!(
            SuperTransactionAccount::decode(&data[..4]),
            Err(AccountDecodeError::TooShort(4))
        ));
    }

    #[test]
    fn record_account_message_is_recovered() {
        let creator = Pubkey::new_unique();
        let message = CompiledMessage {
            num_signers: 1,
            num_writable_signers: 1,
            num_writable_non_signers: 1,
            account_keys: vec![creator, Pubkey::new_unique(), Pubkey::new_unique()],
            instructions: vec![CompiledInstruction {
                program_id_index: 2,
                account_indexes: vec![0, 1],
                data: vec![5, 6, 7],
            }],
            address_table_lookups: Vec::new(),
        };
        let data = encode_record_account(&creator, &[254], &message);
        let record = SuperTransactionAccount::decode(&data).expect("decode record");
        assert_eq!(record.creator, creator);
        assert_eq!(record.ephemeral_signer_count(), 1);
        assert_eq!(record.message, message);
    }
}
