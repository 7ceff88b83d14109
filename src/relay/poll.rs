use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(20);

/// 轮询节奏：固定间隔、绝对截止时间与取消令牌。
#[derive(Debug, Clone)]
pub struct PollSchedule {
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_POLL_TIMEOUT)
    }
}

impl PollSchedule {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn start(&self) -> Deadline {
        Deadline(Instant::now() + self.timeout)
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline(Instant);

impl Deadline {
    pub fn at(&self) -> Instant {
        self.0
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.0
    }

    /// 下一次唤醒时刻，不会越过截止时间。
    pub fn next_wake(&self, interval: Duration) -> Instant {
        (Instant::now() + interval).min(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn wake_is_clamped_to_deadline() {
        let schedule = PollSchedule::new(Duration::from_secs(2), Duration::from_secs(3));
        let deadline = schedule.start();
        let start = Instant::now();

        assert_eq!(deadline.next_wake(schedule.interval()), start + Duration::from_secs(2));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(
            deadline.next_wake(schedule.interval()),
            start + Duration::from_secs(3)
        );
        assert!(!deadline.expired());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(deadline.expired());
    }
}
