use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as TokioMutex;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// 进程级出站请求间隔控制
///
/// 每次 `acquire` 在锁内预约下一个发送时刻，然后在锁外等待，
/// 并发调用者会被依次排开，彼此间隔不少于 `min_spacing`。
#[derive(Clone, Debug)]
pub struct RequestSpacer {
    min_spacing: Duration,
    next_slot: Arc<TokioMutex<Option<Instant>>>,
}

impl RequestSpacer {
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            min_spacing,
            next_slot: Arc::new(TokioMutex::new(None)),
        }
    }

    pub fn min_spacing(&self) -> Duration {
        self.min_spacing
    }

    /// 等待直到可以发出下一个请求
    pub async fn acquire(&self) {
        if self.min_spacing.is_zero() {
            return;
        }

        let due = {
            let mut next_slot = self.next_slot.lock().await;
            let now = Instant::now();
            let due = match *next_slot {
                Some(slot) if slot > now => slot,
                _ => now,
            };
            *next_slot = Some(due + self.min_spacing);
            due
        };

        let now = Instant::now();
        if due > now {
            debug!(target: "限流", wait_ms = (due - now).as_millis() as u64, "距上次请求过近，等待");
            sleep_until(due).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_acquire_is_immediate() {
        let spacer = RequestSpacer::new(Duration::from_millis(200));
        let start = std::time::Instant::now();
        spacer.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_consecutive_acquires_are_spaced() {
        let spacer = RequestSpacer::new(Duration::from_millis(80));
        let start = std::time::Instant::now();
        spacer.acquire().await;
        spacer.acquire().await;
        spacer.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(160));
    }

    #[tokio::test]
    async fn test_zero_spacing_never_waits() {
        let spacer = RequestSpacer::new(Duration::ZERO);
        let start = std::time::Instant::now();
        for _ in 0..10 {
            spacer.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
