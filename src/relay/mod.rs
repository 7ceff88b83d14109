//! Jito block engine 客户端：bundle 模拟、提交与状态轮询。

pub mod bundle;
pub mod client;
pub mod error;
pub mod poll;
pub mod tip;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use bundle::{encode_transaction, serialize_transaction};
pub use client::{BundleClient, DEFAULT_MAX_BUNDLE_TRANSACTIONS};
pub use error::RelayError;
pub use poll::{DEFAULT_POLL_INTERVAL, DEFAULT_POLL_TIMEOUT, PollSchedule};
pub use tip::{DEFAULT_TIP_ACCOUNTS, DEFAULT_TIP_FLOOR_URL, MIN_JITO_TIP_LAMPORTS, TipSelector};
pub use transport::{
    DEFAULT_BLOCK_ENGINE_URL, DEFAULT_BUNDLE_ERROR_API, HttpRelayTransport, RelayTransport,
};
pub use types::{
    BundleErrorDetail, BundleStatus, FailedBundle, LandedBundle, SimulationReport,
    SubmittedBundle, TransactionResult,
};
