use std::time::Duration;

use log::{trace, warn};
use thiserror::Error;

use crate::{barrier::CancelToken, client::ClientError};

/// 輪詢策略：最多嘗試 `attempts` 次，每次之間等待 `interval`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub attempts: u32,
}

impl PollPolicy {
    pub const fn new(interval: Duration, attempts: u32) -> Self {
        PollPolicy { interval, attempts }
    }

    /// 只嘗試一次、不等待。
    pub const fn once() -> Self {
        PollPolicy {
            interval: Duration::ZERO,
            attempts: 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum PollError<E> {
    #[error(transparent)]
    Failed(E),
    #[error("Gave up after {attempts} attempt(s)")]
    Exhausted { attempts: u32 },
    #[error("Cancelled")]
    Cancelled,
}

/// 反覆呼叫 `step` 直到它回傳 `Some`。
///
/// `step` 收到目前的嘗試次數（從 1 開始）。回傳 `Err` 立即結束；
/// 要重試的錯誤應由 `step` 自行轉為 `Ok(None)`。
pub fn poll_until<T, E, F>(
    policy: PollPolicy,
    cancel: &CancelToken,
    what: &str,
    mut step: F,
) -> Result<T, PollError<E>>
where
    F: FnMut(u32) -> Result<Option<T>, E>,
{
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }
        if let Some(value) = step(attempt).map_err(PollError::Failed)? {
            return Ok(value);
        }
        trace!("{}: attempt {}/{} not done", what, attempt, attempts);
        if attempt < attempts && !cancel.sleep(policy.interval) {
            return Err(PollError::Cancelled);
        }
    }
    Err(PollError::Exhausted { attempts })
}

/// 呼叫 `op` 直到成功；只有 [`ClientError::is_transient`] 的錯誤會重試。
///
/// 次數用盡時回傳最後一次的錯誤。
pub fn retry_transient<T, F>(
    policy: PollPolicy,
    cancel: &CancelToken,
    what: &str,
    mut op: F,
) -> Result<T, PollError<ClientError>>
where
    F: FnMut() -> Result<T, ClientError>,
{
    let mut last_error = None;
    let result = poll_until(policy, cancel, what, |attempt| match op() {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_transient() => {
            warn!("{} failed (attempt {}): {}", what, attempt, e);
            last_error = Some(e);
            Ok(None)
        }
        Err(e) => Err(e),
    });
    match (result, last_error) {
        (Err(PollError::Exhausted { .. }), Some(e)) => Err(PollError::Failed(e)),
        (result, _) => result,
    }
}
