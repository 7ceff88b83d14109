use std::mem;

use once_cell::sync::Lazy;
use smallvec::SmallVec;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;

pub const COMPUTE_BUDGET_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("ComputeBudget111111111111111111111111111111");

/// 运行时允许申请的最大堆内存。
pub const MAX_HEAP_FRAME_BYTES: u32 = 256 * 1024;

/// 缓存键，用于复用 compute budget 指令组合。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ComputeBudgetKey {
    unit_price: u64,
    unit_limit: u32,
    heap_frame_bytes: u32,
}

static CACHE: Lazy<dashmap::DashMap<ComputeBudgetKey, SmallVec<[Instruction; 3]>>> =
    Lazy::new(dashmap::DashMap::new);

fn tagged(tag: u8, payload: &[u8]) -> Instruction {
    let mut data = Vec::with_capacity(1 + payload.len());
    data.push(tag);
    data.extend_from_slice(payload);
    Instruction {
        program_id: COMPUTE_BUDGET_PROGRAM_ID,
        accounts: Vec::new(),
        data,
    }
}

/// 堆大小需为 1KiB 的整数倍，且不超过 [`MAX_HEAP_FRAME_BYTES`]。
pub fn request_heap_frame_instruction(bytes: u32) -> Instruction {
    debug_assert!(bytes % 1024 == 0 && bytes <= MAX_HEAP_FRAME_BYTES);
    let mut payload = [0u8; mem::size_of::<u32>()];
    payload.copy_from_slice(&bytes.to_le_bytes());
    tagged(1, &payload)
}

pub fn compute_unit_limit_instruction(limit: u32) -> Instruction {
    tagged(2, &limit.to_le_bytes())
}

pub fn compute_unit_price_instruction(price_micro_lamports: u64) -> Instruction {
    tagged(3, &price_micro_lamports.to_le_bytes())
}

/// 按 price → limit → heap 的顺序生成 compute budget 指令，值为 0 的项跳过。
pub fn compute_budget_sequence(
    unit_price: u64,
    unit_limit: u32,
    heap_frame_bytes: u32,
) -> SmallVec<[Instruction; 3]> {
    let key = ComputeBudgetKey {
        unit_price,
        unit_limit,
        heap_frame_bytes,
    };

    if let Some(cached) = CACHE.get(&key) {
        return cached.clone();
    }

    let mut seq = SmallVec::<[Instruction; 3]>::new();
    if unit_price > 0 {
        seq.push(compute_unit_price_instruction(unit_price));
    }
    if unit_limit > 0 {
        seq.push(compute_unit_limit_instruction(unit_limit));
    }
    if heap_frame_bytes > 0 {
        seq.push(request_heap_frame_instruction(heap_frame_bytes));
    }

    CACHE.insert(key, seq.clone());
    seq
}

pub fn is_compute_budget(ix: &Instruction) -> bool {
    ix.program_id == COMPUTE_BUDGET_PROGRAM_ID
}

#[cfg(test)]
mod tests {
    use solana_compute_budget_interface::ComputeBudgetInstruction;

    use super::*;

    #[test]
    fn encodings_match_interface_crate() {
        assert_eq!(
            compute_unit_limit_instruction(1_400_000),
            ComputeBudgetInstruction::set_compute_unit_limit(1_400_000)
        );
        assert_eq!(
            compute_unit_price_instruction(10_000),
            ComputeBudgetInstruction::set_compute_unit_price(10_000)
        );
        assert_eq!(
            request_heap_frame_instruction(262_144),
            ComputeBudgetInstruction::request_heap_frame(262_144)
        );
    }

    #[test]
    fn sequence_keeps_price_limit_heap_order() {
        let seq = compute_budget_sequence(10_000, 1_400_000, 262_144);
        let tags: Vec<u8> = seq.iter().map(|ix| ix.data[0]).collect();
        assert_eq!(tags, vec![3, 2, 1]);
        assert!(seq.iter().all(is_compute_budget));
    }

    #[test]
    fn zero_values_are_skipped() {
        let seq = compute_budget_sequence(0, 500_000, 0);
        assert_eq!(seq.len(), 1);
        assert_eq!(seq[0], compute_unit_limit_instruction(500_000));
    }
}
