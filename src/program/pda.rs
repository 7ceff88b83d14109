use solana_sdk::pubkey::Pubkey;

pub const SEED_PREFIX: &[u8] = b"super_txn";
pub const SEED_TRANSACTION: &[u8] = b"transaction";
pub const SEED_TRANSACTION_BUFFER: &[u8] = b"transaction_buffer";
pub const SEED_EPHEMERAL_SIGNER: &[u8] = b"ephemeral_signer";

/// 暂存缓冲区账户：`[prefix, "transaction_buffer", creator, u8(index)]`。
pub fn transaction_buffer_address(
    creator: &Pubkey,
    buffer_index: u8,
    program_id: &Pubkey,
) -> (Pubkey, u8) {
    Pubkey::find_program_address(
        &[
            SEED_PREFIX,
            SEED_TRANSACTION_BUFFER,
            creator.as_ref(),
            &[buffer_index],
        ],
        program_id,
    )
}

/// 消息记录账户：`[prefix, "transaction", creator, u8(index)]`。
pub fn transaction_address(creator: &Pubkey, index: u8, program_id: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(
        &[SEED_PREFIX, SEED_TRANSACTION, creator.as_ref(), &[index]],
        program_id,
    )
}

/// 临时签名者地址，种子顺序与链上程序保持一致：
/// `[prefix, record, "ephemeral_signer", u8(index)]`。
pub fn ephemeral_signer_address(
    transaction: &Pubkey,
    signer_index: u8,
    program_id: &Pubkey,
) -> (Pubkey, u8) {
    Pubkey::find_program_address(
        &[
            SEED_PREFIX,
            transaction.as_ref(),
            SEED_EPHEMERAL_SIGNER,
            &[signer_index],
        ],
        program_id,
    )
}

pub fn ephemeral_signer_addresses(
    transaction: &Pubkey,
    count: u8,
    program_id: &Pubkey,
) -> Vec<Pubkey> {
    (0..count)
        .map(|index| ephemeral_signer_address(transaction, index, program_id).0)
        .collect()
}
