//! 大消息的编译、紧凑编码与内容哈希。
//!
//! 编码结果会被分块写入链上缓冲区，链上程序在 finalize 时重新计算哈希并与
//! 创建缓冲区时声明的哈希比对，因此这里的输出必须完全确定。

mod compile;
pub mod wire;

use std::collections::HashMap;

use borsh::BorshDeserialize;
use sha2::{Digest, Sha256};
use solana_sdk::hash::Hash;
use solana_sdk::instruction::Instruction;
use solana_sdk::message::AddressLookupTableAccount;
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

use self::wire::{SmallVecU8, SmallVecU16, WireInstruction, WireMessage, WireTableLookup};

/// 消息中可寻址账户（静态 + 查找表加载）的上限，索引为 u8。
pub const MAX_ADDRESSABLE_ACCOUNTS: usize = u8::MAX as usize + 1;

#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("指令引用的账户 {0} 未进入寻址空间")]
    UnknownAccount(Pubkey),
    #[error(
        "消息头与账户列表不一致: signers={num_signers} writable_signers={num_writable_signers} writable_non_signers={num_writable_non_signers} keys={num_keys}"
    )]
    InconsistentHeader {
        num_signers: u8,
        num_writable_signers: u8,
        num_writable_non_signers: u8,
        num_keys: usize,
    },
    #[error("第 {instruction} 条指令引用了未解析的账户索引 {index}（可寻址账户 {available} 个）")]
    UnresolvedAccount {
        instruction: usize,
        index: u8,
        available: usize,
    },
    #[error("查找表 {table} 未提供，无法解析消息中的引用")]
    MissingLookupTable { table: Pubkey },
    #[error("查找表 {table} 不包含位置 {index}")]
    LookupIndexOutOfRange { table: Pubkey, index: u8 },
    #[error("可寻址账户数量 {0} 超过上限 {max}", max = MAX_ADDRESSABLE_ACCOUNTS)]
    TooManyAccounts(usize),
    #[error("消息序列化失败: {0}")]
    Io(#[from] std::io::Error),
    #[error("消息尾部残留 {0} 字节")]
    TrailingBytes(usize),
}

/// 调用方提交的原始消息；blockhash 只是占位，执行时由链上程序忽略。
#[derive(Debug, Clone)]
pub struct TransactionMessage {
    pub payer: Pubkey,
    pub instructions: Vec<Instruction>,
    pub recent_blockhash: Hash,
}

impl TransactionMessage {
    pub fn new(payer: Pubkey, instructions: Vec<Instruction>) -> Self {
        Self {
            payer,
            instructions,
            recent_blockhash: Hash::default(),
        }
    }

    /// 编译为紧凑消息；出现在查找表中的非签名账户会转为间接引用。
    pub fn compile(
        &self,
        lookup_tables: &[AddressLookupTableAccount],
    ) -> Result<CompiledMessage, EncodingError> {
        let message =
            compile::compile_message(&self.payer, &self.instructions, lookup_tables)?;
        message.validate()?;
        Ok(message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledInstruction {
    pub program_id_index: u8,
    pub account_indexes: Vec<u8>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableLookup {
    pub account_key: Pubkey,
    pub writable_indexes: Vec<u8>,
    pub readonly_indexes: Vec<u8>,
}

/// 编译后的消息。寻址空间依次为：静态账户、各查找表的可写位置、各查找表的只读位置。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledMessage {
    pub num_signers: u8,
    pub num_writable_signers: u8,
    pub num_writable_non_signers: u8,
    pub account_keys: Vec<Pubkey>,
    pub instructions: Vec<CompiledInstruction>,
    pub address_table_lookups: Vec<TableLookup>,
}

/// 查找表中被引用的地址，分为可写与只读两组。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedAddresses {
    pub writable: Vec<Pubkey>,
    pub readonly: Vec<Pubkey>,
}

impl CompiledMessage {
    pub fn num_lookup_writable(&self) -> usize {
        self.address_table_lookups
            .iter()
            .map(|lookup| lookup.writable_indexes.len())
            .sum()
    }

    pub fn num_lookup_readonly(&self) -> usize {
        self.address_table_lookups
            .iter()
            .map(|lookup| lookup.readonly_indexes.len())
            .sum()
    }

    pub fn num_addressable_accounts(&self) -> usize {
        self.account_keys.len() + self.num_lookup_writable() + self.num_lookup_readonly()
    }

    pub fn is_signer_index(&self, index: usize) -> bool {
        index < self.num_signers as usize
    }

    pub fn is_static_writable_index(&self, index: usize) -> bool {
        let num_keys = self.account_keys.len();
        let num_signers = self.num_signers as usize;
        if index >= num_keys {
            return false;
        }
        if index < num_signers {
            return index < self.num_writable_signers as usize;
        }
        index - num_signers < self.num_writable_non_signers as usize
    }

    /// 校验消息头计数与账户列表一致，且每条指令的索引都能解析。
    pub fn validate(&self) -> Result<(), EncodingError> {
        let num_keys = self.account_keys.len();
        let num_signers = self.num_signers as usize;
        let header_ok = num_signers <= num_keys
            && self.num_writable_signers <= self.num_signers
            && self.num_writable_non_signers as usize <= num_keys - num_signers;
        if !header_ok {
            return Err(EncodingError::InconsistentHeader {
                num_signers: self.num_signers,
                num_writable_signers: self.num_writable_signers,
                num_writable_non_signers: self.num_writable_non_signers,
                num_keys,
            });
        }

        let available = self.num_addressable_accounts();
        if available > MAX_ADDRESSABLE_ACCOUNTS {
            return Err(EncodingError::TooManyAccounts(available));
        }

        for (position, ix) in self.instructions.iter().enumerate() {
            let indexes = std::iter::once(&ix.program_id_index).chain(ix.account_indexes.iter());
            for index in indexes {
                if *index as usize >= available {
                    return Err(EncodingError::UnresolvedAccount {
                        instruction: position,
                        index: *index,
                        available,
                    });
                }
            }
        }
        Ok(())
    }

    /// 逐张查找表展开引用的地址，顺序与 `address_table_lookups` 一致。
    pub fn addresses_by_lookup(
        &self,
        lookup_tables: &[AddressLookupTableAccount],
    ) -> Result<Vec<LoadedAddresses>, EncodingError> {
        let by_key: HashMap<&Pubkey, &AddressLookupTableAccount> =
            lookup_tables.iter().map(|table| (&table.key, table)).collect();

        self.address_table_lookups
            .iter()
            .map(|lookup| {
                let table = by_key
                    .get(&lookup.account_key)
                    .ok_or(EncodingError::MissingLookupTable {
                        table: lookup.account_key,
                    })?;
                let resolve = |indexes: &[u8]| {
                    indexes
                        .iter()
                        .map(|index| resolve_position(table, *index))
                        .collect::<Result<Vec<_>, _>>()
                };
                Ok::<_, EncodingError>(LoadedAddresses {
                    writable: resolve(&lookup.writable_indexes)?,
                    readonly: resolve(&lookup.readonly_indexes)?,
                })
            })
            .collect()
    }

    /// 按 v0 寻址空间展开：所有表的可写地址在前，所有表的只读地址在后。
    pub fn loaded_addresses(
        &self,
        lookup_tables: &[AddressLookupTableAccount],
    ) -> Result<LoadedAddresses, EncodingError> {
        let mut loaded = LoadedAddresses::default();
        let mut readonly = Vec::new();
        for per_table in self.addresses_by_lookup(lookup_tables)? {
            loaded.writable.extend(per_table.writable);
            readonly.extend(per_table.readonly);
        }
        loaded.readonly = readonly;
        Ok(loaded)
    }

    fn to_wire(&self) -> WireMessage {
        WireMessage {
            num_signers: self.num_signers,
            num_writable_signers: self.num_writable_signers,
            num_writable_non_signers: self.num_writable_non_signers,
            account_keys: SmallVecU8(self.account_keys.iter().map(|key| key.to_bytes()).collect()),
            instructions: SmallVecU8(
                self.instructions
                    .iter()
                    .map(|ix| WireInstruction {
                        program_id_index: ix.program_id_index,
                        account_indexes: SmallVecU8(ix.account_indexes.clone()),
                        data: SmallVecU16(ix.data.clone()),
                    })
                    .collect(),
            ),
            address_table_lookups: SmallVecU8(
                self.address_table_lookups
                    .iter()
                    .map(|lookup| WireTableLookup {
                        account_key: lookup.account_key.to_bytes(),
                        writable_indexes: SmallVecU8(lookup.writable_indexes.clone()),
                        readonly_indexes: SmallVecU8(lookup.readonly_indexes.clone()),
                    })
                    .collect(),
            ),
        }
    }

    fn from_wire(wire: WireMessage) -> Self {
        Self {
            num_signers: wire.num_signers,
            num_writable_signers: wire.num_writable_signers,
            num_writable_non_signers: wire.num_writable_non_signers,
            account_keys: wire
                .account_keys
                .0
                .into_iter()
                .map(Pubkey::new_from_array)
                .collect(),
            instructions: wire
                .instructions
                .0
                .into_iter()
                .map(|ix| CompiledInstruction {
                    program_id_index: ix.program_id_index,
                    account_indexes: ix.account_indexes.0,
                    data: ix.data.0,
                })
                .collect(),
            address_table_lookups: wire
                .address_table_lookups
                .0
                .into_iter()
                .map(|lookup| TableLookup {
                    account_key: Pubkey::new_from_array(lookup.account_key),
                    writable_indexes: lookup.writable_indexes.0,
                    readonly_indexes: lookup.readonly_indexes.0,
                })
                .collect(),
        }
    }
}

fn resolve_position(
    table: &AddressLookupTableAccount,
    index: u8,
) -> Result<Pubkey, EncodingError> {
    table
        .addresses
        .get(index as usize)
        .copied()
        .ok_or(EncodingError::LookupIndexOutOfRange {
            table: table.key,
            index,
        })
}

/// 编码后的消息字节及其 sha256。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMessageBuffer {
    bytes: Vec<u8>,
    hash: Hash,
}

impl EncodedMessageBuffer {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let hash = content_hash(&bytes);
        Self { bytes, hash }
    }

    /// 从缓冲区创建记录时声明的空消息占位。
    pub fn placeholder() -> Self {
        Self::from_bytes(vec![0u8; 6])
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

pub fn encode(message: &CompiledMessage) -> Result<EncodedMessageBuffer, EncodingError> {
    message.validate()?;
    let bytes = borsh::to_vec(&message.to_wire())?;
    Ok(EncodedMessageBuffer::from_bytes(bytes))
}

pub fn decode(bytes: &[u8]) -> Result<CompiledMessage, EncodingError> {
    let mut cursor = bytes;
    let wire = WireMessage::deserialize(&mut cursor)?;
    if !cursor.is_empty() {
        return Err(EncodingError::TrailingBytes(cursor.len()));
    }
    let message = CompiledMessage::from_wire(wire);
    message.validate()?;
    Ok(message)
}

pub fn content_hash(bytes: &[u8]) -> Hash {
    let digest = Sha256::digest(bytes);
    Hash::new_from_array(digest.into())
}

pub fn verify_hash(bytes: &[u8], expected: &Hash) -> bool {
    content_hash(bytes) == *expected
}
