use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use super::error::RelayError;
use super::transport::RelayTransport;
use super::types::BundleErrorDetail;

pub(crate) enum Step {
    Reply(Value),
    TransportError,
    /// 永不返回，模拟卡住的请求。
    Stall,
}

/// 按方法名依次回放预设响应；队列耗尽后使用该方法的兜底响应。
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    scripts: Mutex<HashMap<&'static str, VecDeque<Step>>>,
    fallback: Mutex<HashMap<&'static str, Value>>,
    calls: Mutex<Vec<&'static str>>,
    bundle_error: Mutex<Option<BundleErrorDetail>>,
}

impl ScriptedTransport {
    pub fn push(&self, method: &'static str, step: Step) -> &Self {
        self.scripts.lock().entry(method).or_default().push_back(step);
        self
    }

    pub fn reply(&self, method: &'static str, result: Value) -> &Self {
        self.push(method, Step::Reply(ok_envelope(result)))
    }

    pub fn always(&self, method: &'static str, result: Value) -> &Self {
        self.fallback.lock().insert(method, ok_envelope(result));
        self
    }

    pub fn set_bundle_error(&self, detail: BundleErrorDetail) {
        *self.bundle_error.lock() = Some(detail);
    }

    pub fn calls(&self, method: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|called| **called == method)
            .count()
    }

    pub fn call_log(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }
}

pub(crate) fn ok_envelope(result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": 1, "result": result})
}

pub(crate) fn inflight(bundle_id: &str, status: &str, landed_slot: Option<u64>) -> Value {
    json!({
        "context": {"slot": 100},
        "value": [{"bundle_id": bundle_id, "status": status, "landed_slot": landed_slot}]
    })
}

#[async_trait]
impl RelayTransport for ScriptedTransport {
    async fn call(&self, method: &'static str, _params: Value) -> Result<Value, RelayError> {
        self.calls.lock().push(method);
        let step = self
            .scripts
            .lock()
            .get_mut(method)
            .and_then(|queue| queue.pop_front());
        match step {
            Some(Step::Reply(value)) => Ok(value),
            Some(Step::TransportError) => Err(RelayError::Http {
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                body: String::new(),
            }),
            Some(Step::Stall) => futures::future::pending().await,
            None => self
                .fallback
                .lock()
                .get(method)
                .cloned()
                .ok_or_else(|| RelayError::fatal(format!("no scripted reply for {method}"))),
        }
    }

    async fn bundle_error(&self, _bundle_id: &str) -> Result<Option<BundleErrorDetail>, RelayError> {
        self.calls.lock().push("get_bundle_error");
        Ok(self.bundle_error.lock().clone())
    }
}
