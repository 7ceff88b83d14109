//! `super_txn` 程序的 Anchor 指令构造：8 字节判别符 + borsh 参数。

use std::io;

use borsh::{BorshDeserialize, BorshSerialize};
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_system_interface::program as system_program;

fn anchor_discriminator(namespace: &str, name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("{namespace}:{name}").as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

pub(crate) fn account_discriminator(name: &str) -> [u8; 8] {
    anchor_discriminator("account", name)
}

static TXN_BUFFER_CREATE: Lazy<[u8; 8]> =
    Lazy::new(|| anchor_discriminator("global", "txn_buffer_create"));
static TXN_BUFFER_EXTEND: Lazy<[u8; 8]> =
    Lazy::new(|| anchor_discriminator("global", "txn_buffer_extend"));
static TXN_BUFFER_CLOSE: Lazy<[u8; 8]> =
    Lazy::new(|| anchor_discriminator("global", "txn_buffer_close"));
static CREATE_FROM_BUFFER: Lazy<[u8; 8]> =
    Lazy::new(|| anchor_discriminator("global", "super_transaction_create_from_buffer"));
static EXECUTE: Lazy<[u8; 8]> =
    Lazy::new(|| anchor_discriminator("global", "super_transaction_execute"));
static ACCOUNTS_CLOSE: Lazy<[u8; 8]> =
    Lazy::new(|| anchor_discriminator("global", "super_transaction_accounts_close"));

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TransactionBufferCreateArgs {
    pub buffer_index: u8,
    pub final_buffer_hash: [u8; 32],
    pub final_buffer_size: u16,
    pub buffer: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TransactionBufferExtendArgs {
    pub buffer: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SuperTransactionCreateArgs {
    pub transaction_index: u8,
    pub ephemeral_signers: u8,
    pub transaction_message: Vec<u8>,
    pub memo: Option<String>,
}

fn instruction_data<T: BorshSerialize>(discriminator: &[u8; 8], args: &T) -> io::Result<Vec<u8>> {
    let mut data = discriminator.to_vec();
    args.serialize(&mut data)?;
    Ok(data)
}

pub fn txn_buffer_create(
    program_id: &Pubkey,
    transaction_buffer: &Pubkey,
    creator: &Pubkey,
    rent_payer: &Pubkey,
    args: &TransactionBufferCreateArgs,
) -> io::Result<Instruction> {
    Ok(Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(*transaction_buffer, false),
            AccountMeta::new_readonly(*creator, true),
            AccountMeta::new(*rent_payer, true),
            AccountMeta::new_readonly(system_program::ID, false),
        ],
        data: instruction_data(&TXN_BUFFER_CREATE, args)?,
    })
}

pub fn txn_buffer_extend(
    program_id: &Pubkey,
    transaction_buffer: &Pubkey,
    creator: &Pubkey,
    args: &TransactionBufferExtendArgs,
) -> io::Result<Instruction> {
    Ok(Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(*transaction_buffer, false),
            AccountMeta::new_readonly(*creator, true),
        ],
        data: instruction_data(&TXN_BUFFER_EXTEND, args)?,
    })
}

pub fn txn_buffer_close(
    program_id: &Pubkey,
    transaction_buffer: &Pubkey,
    creator: &Pubkey,
) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(*transaction_buffer, false),
            AccountMeta::new_readonly(*creator, true),
        ],
        data: TXN_BUFFER_CLOSE.to_vec(),
    }
}

/// 从缓冲区物化消息记录；账户顺序为嵌套的 create 账户组，再接缓冲区与创建者。
pub fn super_transaction_create_from_buffer(
    program_id: &Pubkey,
    transaction: &Pubkey,
    creator: &Pubkey,
    rent_payer: &Pubkey,
    transaction_buffer: &Pubkey,
    args: &SuperTransactionCreateArgs,
) -> io::Result<Instruction> {
    Ok(Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(*transaction, false),
            AccountMeta::new_readonly(*creator, true),
            AccountMeta::new(*rent_payer, true),
            AccountMeta::new_readonly(system_program::ID, false),
            AccountMeta::new(*transaction_buffer, false),
            AccountMeta::new(*creator, true),
        ],
        data: instruction_data(&CREATE_FROM_BUFFER, args)?,
    })
}

pub fn super_transaction_execute(
    program_id: &Pubkey,
    transaction: &Pubkey,
    creator: &Pubkey,
    remaining_accounts: Vec<AccountMeta>,
) -> Instruction {
    let mut accounts = Vec::with_capacity(2 + remaining_accounts.len());
    accounts.push(AccountMeta::new(*transaction, false));
    accounts.push(AccountMeta::new(*creator, true));
    accounts.extend(remaining_accounts);
    Instruction {
        program_id: *program_id,
        accounts,
        data: EXECUTE.to_vec(),
    }
}

pub fn super_transaction_accounts_close(
    program_id: &Pubkey,
    transaction: &Pubkey,
    creator: &Pubkey,
) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(*transaction, false),
            AccountMeta::new(*creator, true),
            AccountMeta::new_readonly(system_program::ID, false),
        ],
        data: ACCOUNTS_CLOSE.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminator_matches_anchor_sighash() {
        let digest = Sha256::digest(b"global:txn_buffer_extend");
        assert_eq!(&TXN_BUFFER_EXTEND[..], &digest[..8]);
        assert_ne!(*TXN_BUFFER_CREATE, *TXN_BUFFER_EXTEND);
    }

    #[test]
    fn create_buffer_layout() {
        let program_id = Pubkey::new_unique();
        let buffer = Pubkey::new_unique();
        let creator = Pubkey::new_unique();
        let args = TransactionBufferCreateArgs {
            buffer_index: 4,
            final_buffer_hash: [7u8; 32],
            final_buffer_size: 1_024,
            buffer: vec![1, 2, 3],
        };
        let ix = txn_buffer_create(&program_id, &buffer, &creator, &creator, &args)
            .expect("build create");

        assert_eq!(ix.accounts.len(), 4);
        assert!(ix.accounts[0].is_writable && !ix.accounts[0].is_signer);
        assert!(ix.accounts[1].is_signer && !ix.accounts[1].is_writable);
        assert_eq!(ix.accounts[3].pubkey, system_program::ID);

        assert_eq!(&ix.data[..8], &TXN_BUFFER_CREATE[..]);
        assert_eq!(ix.data[8], 4);
        assert_eq!(&ix.data[9..41], &[7u8; 32]);
        assert_eq!(&ix.data[41..43], &1_024u16.to_le_bytes());
        assert_eq!(&ix.data[43..47], &3u32.to_le_bytes());
        assert_eq!(&ix.data[47..], &[1, 2, 3]);

        let decoded =
            TransactionBufferCreateArgs::try_from_slice(&ix.data[8..]).expect("decode args");
        assert_eq!(decoded, args);
    }

    #[test]
    fn execute_appends_remaining_accounts() {
        let program_id = Pubkey::new_unique();
        let record = Pubkey::new_unique();
        let creator = Pubkey::new_unique();
        let extra = AccountMeta::new_readonly(Pubkey::new_unique(), false);
        let ix = super_transaction_execute(&program_id, &record, &creator, vec![extra.clone()]);
        assert_eq!(ix.accounts.len(), 3);
        assert_eq!(ix.accounts[2], extra);
        assert_eq!(ix.data.len(), 8);
    }
}
