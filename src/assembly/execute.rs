use std::collections::HashSet;

use solana_client::client_error::ClientError;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::message::AddressLookupTableAccount;
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;
use tracing::debug;

use crate::context::ChainReader;
use crate::message::{CompiledMessage, EncodingError};
use crate::program::instructions::super_transaction_execute;
use crate::program::{AccountDecodeError, SuperTransactionAccount, ephemeral_signer_addresses};

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("读取消息记录失败: {0}")]
    Rpc(#[from] ClientError),
    #[error("解析消息记录失败: {0}")]
    Decode(#[from] AccountDecodeError),
}

/// 链上消息记录的状态。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordState {
    NotCreated,
    Loaded(SuperTransactionAccount),
}

pub async fn fetch_record(
    reader: &dyn ChainReader,
    record: &Pubkey,
) -> Result<RecordState, RecordError> {
    match reader.account_data(record).await? {
        Some(data) => Ok(RecordState::Loaded(SuperTransactionAccount::decode(&data)?)),
        None => {
            debug!(target: "assembly::execute", record = %record, "消息记录不存在");
            Ok(RecordState::NotCreated)
        }
    }
}

/// execute 指令的剩余账户：静态账户在前，随后按 `address_table_lookups` 顺序逐表列出可写地址、只读地址。
///
/// 签名位只保留给消息中的签名账户，创建者与临时签名 PDA 由链上程序代签，不在此标记。
pub fn remaining_accounts(
    message: &CompiledMessage,
    lookup_tables: &[AddressLookupTableAccount],
    creator: &Pubkey,
    ephemeral_signers: &[Pubkey],
) -> Result<Vec<AccountMeta>, EncodingError> {
    let program_signed: HashSet<&Pubkey> = std::iter::once(creator)
        .chain(ephemeral_signers.iter())
        .collect();

    let by_lookup = message.addresses_by_lookup(lookup_tables)?;
    let mut accounts = Vec::with_capacity(message.num_addressable_accounts());

    for (index, key) in message.account_keys.iter().enumerate() {
        let is_signer = message.is_signer_index(index) && !program_signed.contains(key);
        accounts.push(AccountMeta {
            pubkey: *key,
            is_signer,
            is_writable: message.is_static_writable_index(index),
        });
    }
    for loaded in by_lookup {
        accounts.extend(loaded.writable.into_iter().map(|key| AccountMeta::new(key, false)));
        accounts.extend(
            loaded
                .readonly
                .into_iter()
                .map(|key| AccountMeta::new_readonly(key, false)),
        );
    }
    Ok(accounts)
}

pub fn execute_instruction(
    program_id: &Pubkey,
    record: &Pubkey,
    creator: &Pubkey,
    message: &CompiledMessage,
    lookup_tables: &[AddressLookupTableAccount],
    ephemeral_signers: u8,
) -> Result<Instruction, EncodingError> {
    let ephemeral = ephemeral_signer_addresses(record, ephemeral_signers, program_id);
    let remaining = remaining_accounts(message, lookup_tables, creator, &ephemeral)?;
    Ok(super_transaction_execute(
        program_id, record, creator, remaining,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::TransactionMessage;
    use crate::program::{SUPER_TXN_PROGRAM_ID, transaction_address};

    #[test]
    fn static_keys_precede_lookup_addresses() {
        let creator = Pubkey::new_unique();
        let program = Pubkey::new_unique();
        let static_account = Pubkey::new_unique();
        let writable_loaded = Pubkey::new_unique();
        let readonly_loaded = Pubkey::new_unique();
        let table = AddressLookupTableAccount {
            key: Pubkey::new_unique(),
            addresses: vec![readonly_loaded, writable_loaded],
        };
        let ix = Instruction {
            program_id: program,
            accounts: vec![
                AccountMeta::new(creator, true),
                AccountMeta::new(static_account, false),
                AccountMeta::new(writable_loaded, false),
                AccountMeta::new_readonly(readonly_loaded, false),
            ],
            data: vec![1, 2, 3],
        };
        let message = TransactionMessage::new(creator, vec![ix])
            .compile(std::slice::from_ref(&table))
            .expect("compile");

        let accounts =
            remaining_accounts(&message, std::slice::from_ref(&table), &creator, &[]).expect("accounts");
        let keys: Vec<Pubkey> = accounts.iter().map(|meta| meta.pubkey).collect();
        assert_eq!(keys.len(), message.num_addressable_accounts());
        assert_eq!(keys[keys.len() - 2], writable_loaded);
        assert_eq!(keys[keys.len() - 1], readonly_loaded);
        assert!(accounts[keys.len() - 2].is_writable);
        assert!(!accounts[keys.len() - 1].is_writable);
        assert!(accounts.iter().all(|meta| !meta.is_signer));
    }

    #[test]
    fn lookup_accounts_are_listed_table_by_table() {
        let creator = Pubkey::new_unique();
        let program = Pubkey::new_unique();
        let (w1, r1, w2, r2) = (
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
        );
        let tables = [
            AddressLookupTableAccount {
                key: Pubkey::new_unique(),
                addresses: vec![w1, r1],
            },
            AddressLookupTableAccount {
                key: Pubkey::new_unique(),
                addresses: vec![w2, r2],
            },
        ];
        let ix = Instruction {
            program_id: program,
            accounts: vec![
                AccountMeta::new(w1, false),
                AccountMeta::new_readonly(r1, false),
                AccountMeta::new(w2, false),
                AccountMeta::new_readonly(r2, false),
            ],
            data: Vec::new(),
        };
        let message = TransactionMessage::new(creator, vec![ix])
            .compile(&tables)
            .expect("compile");
        assert_eq!(message.address_table_lookups.len(), 2);

        let accounts = remaining_accounts(&message, &tables, &creator, &[]).expect("accounts");
        let tail: Vec<(Pubkey, bool)> = accounts[message.account_keys.len()..]
            .iter()
            .map(|meta| (meta.pubkey, meta.is_writable))
            .collect();
        assert_eq!(tail, vec![(w1, true), (r1, false), (w2, true), (r2, false)]);

        // v0 寻址空间仍是先所有可写、后所有只读
        let loaded = message.loaded_addresses(&tables).expect("loaded");
        assert_eq!(loaded.writable, vec![w1, w2]);
        assert_eq!(loaded.readonly, vec![r1, r2]);
    }

    #[test]
    fn invoked_program_in_table_is_passed_as_lookup_account() {
        let creator = Pubkey::new_unique();
        let program = Pubkey::new_unique();
        let table = AddressLookupTableAccount {
            key: Pubkey::new_unique(),
            addresses: vec![program],
        };
        let ix = Instruction {
            program_id: program,
            accounts: vec![AccountMeta::new(creator, true)],
            data: vec![1],
        };
        let message = TransactionMessage::new(creator, vec![ix])
            .compile(std::slice::from_ref(&table))
            .expect("compile");
        assert_eq!(message.account_keys, vec![creator]);

        let accounts =
            remaining_accounts(&message, std::slice::from_ref(&table), &creator, &[]).expect("accounts");
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[1].pubkey, program);
        assert!(!accounts[1].is_writable);
    }

    #[test]
    fn other_signers_keep_signer_flag_but_ephemeral_do_not() {
        let creator = Pubkey::new_unique();
        let cosigner = Pubkey::new_unique();
        let (record, _) = transaction_address(&creator, 0, &SUPER_TXN_PROGRAM_ID);
        let ephemeral = ephemeral_signer_addresses(&record, 1, &SUPER_TXN_PROGRAM_ID);
        let ix = Instruction {
            program_id: Pubkey::new_unique(),
            accounts: vec![
                AccountMeta::new(creator, true),
                AccountMeta::new_readonly(cosigner, true),
                AccountMeta::new(ephemeral[0], true),
            ],
            data: vec![],
        };
        let message = TransactionMessage::new(creator, vec![ix])
            .compile(&[])
            .expect("compile");

        let accounts = remaining_accounts(&message, &[], &creator, &ephemeral).expect("accounts");
        let flag = |key: &Pubkey| {
            accounts
                .iter()
                .find(|meta| meta.pubkey == *key)
                .map(|meta| meta.is_signer)
        };
        assert_eq!(flag(&creator), Some(false));
        assert_eq!(flag(&ephemeral[0]), Some(false));
        assert_eq!(flag(&cosigner), Some(true));
    }

    #[test]
    fn missing_table_is_an_encoding_error() {
        let creator = Pubkey::new_unique();
        let loaded = Pubkey::new_unique();
        let table = AddressLookupTableAccount {
            key: Pubkey::new_unique(),
            addresses: vec![loaded],
        };
        let ix = Instruction {
            program_id: Pubkey::new_unique(),
            accounts: vec![AccountMeta::new(loaded, false)],
            data: vec![],
        };
        let message = TransactionMessage::new(creator, vec![ix])
            .compile(std::slice::from_ref(&table))
            .expect("compile");

        let err = execute_instruction(&SUPER_TXN_PROGRAM_ID, &Pubkey::new_unique(), &creator, &message, &[], 0)
            .expect_err("missing table");
        assert!(matches!(err, EncodingError::MissingLookupTable { .. }));
    }
}
