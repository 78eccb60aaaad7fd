//! 外部调用的有界重试

use std::future::Future;
use std::time::Duration;

use config::DeliveryConfig;
use tokio::time::{sleep, timeout};

#[derive(Clone, Debug)]
pub enum Backoff {
    Exponential { base: Duration },
}

impl Backoff {
    pub fn exponential(base: Duration) -> Self {
        Backoff::Exponential { base }
    }

    fn delay_at(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Exponential { base } => {
                let exp = std::cmp::min(attempt.saturating_sub(1), 10);
                let factor = 1u32 << exp;
                base.saturating_mul(factor)
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// 单次尝试的超时
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Backoff::exponential(config.backoff_base()),
            attempt_timeout: config.timeout(),
        }
    }

    /// 只尝试一次，不等待
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::exponential(Duration::ZERO),
            attempt_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&DeliveryConfig::default())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
    #[error("gave up after {attempts} attempts: timed out")]
    TimedOut { attempts: u32 },
}

/// 反复执行 `op` 直到成功、尝试次数用尽；每次尝试受超时约束
pub async fn retry_async<F, Fut, T, E>(policy: &RetryPolicy, mut op: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let outcome = timeout(policy.attempt_timeout, op()).await;
        let error = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => RetryError::Exhausted {
                attempts: attempt,
                last: err,
            },
            Err(_) => RetryError::TimedOut { attempts: attempt },
        };
        if attempt >= policy.max_attempts {
            return Err(error);
        }
        sleep(policy.backoff.delay_at(attempt)).await;
    }
}
