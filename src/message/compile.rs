//! 指令列表到紧凑消息的编译。
//!
//! 与运行时的 v0 编译不同，被调用的程序地址只要不是签名账户，也会从查找表加载：
//! 执行由链上程序通过 CPI 完成，程序账户只需出现在剩余账户中。

use std::collections::{BTreeMap, HashMap};

use solana_sdk::instruction::Instruction;
use solana_sdk::message::AddressLookupTableAccount;
use solana_sdk::pubkey::Pubkey;

use super::{
    CompiledInstruction, CompiledMessage, EncodingError, MAX_ADDRESSABLE_ACCOUNTS, TableLookup,
};

#[derive(Debug, Default, Clone, Copy)]
struct KeyMeta {
    is_signer: bool,
    is_writable: bool,
}

/// 一张查找表抽取出的引用及对应地址。
struct ExtractedLookup {
    lookup: TableLookup,
    writable: Vec<Pubkey>,
    readonly: Vec<Pubkey>,
}

/// 尚未被查找表吸收的账户；付款人固定在首位，其余按地址排序。
struct CompiledKeys {
    payer: Pubkey,
    key_meta_map: BTreeMap<Pubkey, KeyMeta>,
}

impl CompiledKeys {
    fn new(payer: Pubkey, instructions: &[Instruction]) -> Self {
        let mut key_meta_map = BTreeMap::<Pubkey, KeyMeta>::new();
        for ix in instructions {
            key_meta_map.entry(ix.program_id).or_default();
            for account in &ix.accounts {
                let meta = key_meta_map.entry(account.pubkey).or_default();
                meta.is_signer |= account.is_signer;
                meta.is_writable |= account.is_writable;
            }
        }
        let payer_meta = key_meta_map.entry(payer).or_default();
        payer_meta.is_signer = true;
        payer_meta.is_writable = true;
        Self {
            payer,
            key_meta_map,
        }
    }

    fn extract_table_lookup(&mut self, table: &AddressLookupTableAccount) -> Option<ExtractedLookup> {
        let (writable_indexes, writable) =
            self.drain_keys_found_in_table(table, |meta| !meta.is_signer && meta.is_writable);
        let (readonly_indexes, readonly) =
            self.drain_keys_found_in_table(table, |meta| !meta.is_signer && !meta.is_writable);
        if writable_indexes.is_empty() && readonly_indexes.is_empty() {
            return None;
        }
        Some(ExtractedLookup {
            lookup: TableLookup {
                account_key: table.key,
                writable_indexes,
                readonly_indexes,
            },
            writable,
            readonly,
        })
    }

    fn drain_keys_found_in_table(
        &mut self,
        table: &AddressLookupTableAccount,
        filter: impl Fn(&KeyMeta) -> bool,
    ) -> (Vec<u8>, Vec<Pubkey>) {
        let mut indexes = Vec::new();
        let mut drained = Vec::new();
        self.key_meta_map.retain(|key, meta| {
            if !filter(meta) {
                return true;
            }
            let position = table
                .addresses
                .iter()
                .position(|address| address == key)
                .and_then(|position| u8::try_from(position).ok());
            match position {
                Some(index) => {
                    indexes.push(index);
                    drained.push(*key);
                    false
                }
                None => true,
            }
        });
        (indexes, drained)
    }

    /// 静态账户顺序：可写签名、只读签名、可写非签名、只读非签名。
    fn into_static_keys(self) -> (Vec<Pubkey>, usize, usize, usize) {
        let mut writable_signers = vec![self.payer];
        let mut readonly_signers = Vec::new();
        let mut writable_non_signers = Vec::new();
        let mut readonly_non_signers = Vec::new();
        for (key, meta) in self.key_meta_map {
            if key == self.payer {
                continue;
            }
            match (meta.is_signer, meta.is_writable) {
                (true, true) => writable_signers.push(key),
                (true, false) => readonly_signers.push(key),
                (false, true) => writable_non_signers.push(key),
                (false, false) => readonly_non_signers.push(key),
            }
        }

        let num_writable_signers = writable_signers.len();
        let num_signers = num_writable_signers + readonly_signers.len();
        let num_writable_non_signers = writable_non_signers.len();
        let mut keys = writable_signers;
        keys.extend(readonly_signers);
        keys.extend(writable_non_signers);
        keys.extend(readonly_non_signers);
        (keys, num_signers, num_writable_signers, num_writable_non_signers)
    }
}

pub(super) fn compile_message(
    payer: &Pubkey,
    instructions: &[Instruction],
    lookup_tables: &[AddressLookupTableAccount],
) -> Result<CompiledMessage, EncodingError> {
    let mut keys = CompiledKeys::new(*payer, instructions);

    let mut address_table_lookups = Vec::new();
    let mut loaded_writable = Vec::new();
    let mut loaded_readonly = Vec::new();
    for table in lookup_tables {
        if let Some(extracted) = keys.extract_table_lookup(table) {
            address_table_lookups.push(extracted.lookup);
            loaded_writable.extend(extracted.writable);
            loaded_readonly.extend(extracted.readonly);
        }
    }

    let (account_keys, num_signers, num_writable_signers, num_writable_non_signers) =
        keys.into_static_keys();

    // 指令索引按 v0 寻址空间解析：静态账户，再是所有可写加载地址，最后所有只读加载地址
    let addressable = account_keys
        .iter()
        .chain(loaded_writable.iter())
        .chain(loaded_readonly.iter());
    let total = account_keys.len() + loaded_writable.len() + loaded_readonly.len();
    if total > MAX_ADDRESSABLE_ACCOUNTS {
        return Err(EncodingError::TooManyAccounts(total));
    }
    let index_of: HashMap<Pubkey, u8> = addressable
        .enumerate()
        .map(|(index, key)| (*key, index as u8))
        .collect();
    let lookup_index = |key: &Pubkey| {
        index_of
            .get(key)
            .copied()
            .ok_or(EncodingError::UnknownAccount(*key))
    };

    let instructions = instructions
        .iter()
        .map(|ix| {
            Ok::<_, EncodingError>(CompiledInstruction {
                program_id_index: lookup_index(&ix.program_id)?,
                account_indexes: ix
                    .accounts
                    .iter()
                    .map(|meta| lookup_index(&meta.pubkey))
                    .collect::<Result<Vec<_>, _>>()?,
                data: ix.data.clone(),
            })
        })
        .collect::<Result<Vec<_>, EncodingError>>()?;

    let header_count =
        |count: usize| u8::try_from(count).map_err(|_| EncodingError::TooManyAccounts(total));
    Ok(CompiledMessage {
        num_signers: header_count(num_signers)?,
        num_writable_signers: header_count(num_writable_signers)?,
        num_writable_non_signers: header_count(num_writable_non_signers)?,
        account_keys,
        instructions,
        address_table_lookups,
    })
}

#[cfg(test)]
mod tests {
    use solana_sdk::instruction::AccountMeta;

    use super::*;

    #[test]
    fn invoked_program_is_loaded_from_table() {
        let payer = Pubkey::new_unique();
        let program = Pubkey::new_unique();
        let table = AddressLookupTableAccount {
            key: Pubkey::new_unique(),
            addresses: vec![Pubkey::new_unique(), program],
        };
        let ix = Instruction {
            program_id: program,
            accounts: vec![AccountMeta::new(payer, true)],
            data: vec![7],
        };

        let message =
            compile_message(&payer, &[ix], std::slice::from_ref(&table)).expect("compile");

        assert_eq!(message.account_keys, vec![payer]);
        assert_eq!(message.address_table_lookups.len(), 1);
        assert_eq!(message.address_table_lookups[0].readonly_indexes, vec![1]);
        assert!(message.address_table_lookups[0].writable_indexes.is_empty());
        // 程序地址位于静态账户之后的第一个加载位置
        assert_eq!(message.instructions[0].program_id_index, 1);
        assert_eq!(message.instructions[0].account_indexes, vec![0]);
    }

    #[test]
    fn signers_stay_static_even_when_listed_in_table() {
        let payer = Pubkey::new_unique();
        let cosigner = Pubkey::new_unique();
        let program = Pubkey::new_unique();
        let table = AddressLookupTableAccount {
            key: Pubkey::new_unique(),
            addresses: vec![payer, cosigner],
        };
        let ix = Instruction {
            program_id: program,
            accounts: vec![
                AccountMeta::new(payer, true),
                AccountMeta::new_readonly(cosigner, true),
            ],
            data: Vec::new(),
        };

        let message =
            compile_message(&payer, &[ix], std::slice::from_ref(&table)).expect("compile");

        assert!(message.address_table_lookups.is_empty());
        assert_eq!(message.account_keys, vec![payer, cosigner, program]);
        assert_eq!(message.num_signers, 2);
        assert_eq!(message.num_writable_signers, 1);
        assert_eq!(message.num_writable_non_signers, 0);
    }

    #[test]
    fn loaded_indexes_follow_v0_addressing_across_tables() {
        let payer = Pubkey::new_unique();
        let program = Pubkey::new_unique();
        let (w1, r1, w2, r2) = (
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
        );
        let first = AddressLookupTableAccount {
            key: Pubkey::new_unique(),
            addresses: vec![w1, r1],
        };
        let second = AddressLookupTableAccount {
            key: Pubkey::new_unique(),
            addresses: vec![w2, r2],
        };
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

        let message = compile_message(&payer, &[ix], &[first, second]).expect("compile");

        assert_eq!(message.account_keys, vec![payer, program]);
        assert_eq!(message.address_table_lookups.len(), 2);
        // 静态 2 个，之后可写 w1 w2，只读 r1 r2
        assert_eq!(message.instructions[0].account_indexes, vec![2, 4, 3, 5]);
    }
}
