use std::fmt;

use bincode::error::EncodeError;
use reqwest::Error as ReqwestError;
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("网络请求失败: {0}")]
    Network(#[from] ReqwestError),
    #[error("relay 返回非成功状态码 {status}: {body}")]
    Http { status: StatusCode, body: String },
    #[error("relay 返回错误 {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("JSON 解析失败: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("序列化交易失败: {0}")]
    Encode(#[from] EncodeError),
    #[error("{method} 响应缺少 result 字段")]
    MissingResult { method: &'static str },
    #[error("bundle 为空")]
    EmptyBundle,
    #[error("bundle 含 {count} 笔交易，超过 relay 上限 {max}")]
    BundleTooLarge { count: usize, max: usize },
    #[error("轮询已取消")]
    Cancelled,
    #[error("{0}")]
    Fatal(String),
}

impl RelayError {
    pub fn fatal(reason: impl fmt::Display) -> Self {
        Self::Fatal(reason.to_string())
    }

    /// 传输层或 relay 侧的临时错误，换一次尝试可能成功。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayError::Network(_)
                | RelayError::Http { .. }
                | RelayError::Rpc { .. }
                | RelayError::MissingResult { .. }
        )
    }
}
