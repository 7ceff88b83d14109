use std::path::PathBuf;

pub mod loader;
pub mod types;

pub use loader::*;
pub use types::*;

use self::types as cfg;

pub(crate) fn default_true() -> bool {
    true
}

pub(crate) fn default_logging_level() -> String {
    "info".to_string()
}

pub(crate) fn default_commitment() -> String {
    "confirmed".to_string()
}

pub(crate) fn default_block_engine_url() -> String {
    crate::relay::DEFAULT_BLOCK_ENGINE_URL.to_string()
}

pub(crate) fn default_bundle_error_api() -> String {
    crate::relay::DEFAULT_BUNDLE_ERROR_API.to_string()
}

pub(crate) fn default_relay_timeout_ms() -> u64 {
    5_000
}

pub(crate) fn default_max_bundle_transactions() -> usize {
    crate::relay::DEFAULT_MAX_BUNDLE_TRANSACTIONS
}

pub(crate) fn default_tip_strategy() -> cfg::TipStrategyKind {
    cfg::TipStrategyKind::Fixed
}

pub(crate) fn default_floor_level() -> cfg::TipFloorLevel {
    cfg::TipFloorLevel::Percentile50
}

pub(crate) fn default_tip_floor_timeout_ms() -> u64 {
    2_000
}

pub(crate) fn default_chunk_size() -> usize {
    crate::buffer::DEFAULT_CHUNK_SIZE
}

pub(crate) fn default_max_attempts() -> u32 {
    3
}

pub(crate) fn default_retry_backoff_ms() -> u64 {
    4_000
}

pub(crate) fn default_poll_interval_ms() -> u64 {
    2_000
}

pub(crate) fn default_poll_timeout_ms() -> u64 {
    20_000
}

pub(crate) fn default_finalize_unit_limit() -> u32 {
    crate::assembly::DEFAULT_FINALIZE_UNIT_LIMIT
}

pub(crate) fn default_execute_unit_price() -> u64 {
    crate::assembly::DEFAULT_EXECUTE_UNIT_PRICE
}

pub(crate) fn default_execute_unit_limit() -> u32 {
    crate::assembly::DEFAULT_EXECUTE_UNIT_LIMIT
}

pub(crate) fn default_heap_frame_bytes() -> u32 {
    crate::assembly::DEFAULT_HEAP_FRAME_BYTES
}

pub(crate) fn default_cache_dir() -> PathBuf {
    PathBuf::from(crate::cache::DEFAULT_CACHE_DIR)
}

pub(crate) fn default_cache_max_age_secs() -> u64 {
    crate::cache::DEFAULT_MAX_AGE.as_secs()
}
