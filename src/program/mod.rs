//! `super_txn` 链上程序的地址推导、指令与账户布局。

pub mod instructions;
pub mod pda;
pub mod state;

use solana_sdk::pubkey::Pubkey;

pub use pda::{
    ephemeral_signer_address, ephemeral_signer_addresses, transaction_address,
    transaction_buffer_address,
};
pub use state::{AccountDecodeError, SuperTransactionAccount, TransactionBufferAccount};

pub const SUPER_TXN_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("superB6bzm82y1To5rRaMr7KmqkLNVnCUGwUBemtJV3");

/// 链上缓冲区允许的最大字节数。
pub const MAX_BUFFER_SIZE: usize = 10_128;
