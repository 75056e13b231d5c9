//! 외부 호출 재시도 정책
//!
//! 임베딩/벡터 저장소/생성 호출은 모두 타임아웃으로 제한되며,
//! 실패 시 지수 백오프로 제한된 횟수만큼 재시도합니다.
//! 타임아웃은 호출자가 복구 가능한 실패로 취급합니다.

use std::fmt;
use std::future::Future;
use std::time::Duration;

/// 재시도 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 첫 시도 이후 최대 재시도 횟수
    pub max_retries: u32,
    /// 첫 재시도 전 대기 시간 (시도마다 2배)
    pub initial_backoff: Duration,
    /// 시도 1회당 타임아웃
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff: Duration, timeout: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
            timeout,
        }
    }

    /// 재시도 없이 타임아웃만 적용
    pub fn no_retry(timeout: Duration) -> Self {
        Self::new(0, Duration::ZERO, timeout)
    }

    /// `attempt`번째(0부터) 실패 후 대기 시간
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// 타임아웃과 재시도를 적용하여 `op` 실행
    ///
    /// 마지막 시도의 실패를 반환합니다.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, CallError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let mut attempt = 0;

        loop {
            let failure = match tokio::time::timeout(self.timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => CallError::Failed(e),
                Err(_) => CallError::Timeout(self.timeout),
            };

            if attempt >= self.max_retries {
                return Err(failure);
            }

            let backoff = self.backoff(attempt);
            tracing::warn!(
                "{} failed: {}, retrying in {:?} (attempt {}/{})",
                label,
                failure,
                backoff,
                attempt + 1,
                self.max_retries
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }
}

/// 재시도가 모두 소진된 호출의 최종 실패
#[derive(Debug)]
pub enum CallError<E> {
    /// 시도 시간 초과
    Timeout(Duration),
    /// 호출 자체가 실패
    Failed(E),
}

impl<E: fmt::Display> fmt::Display for CallError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Timeout(after) => write!(f, "timed out after {:?}", after),
            CallError::Failed(e) => write!(f, "{}", e),
        }
    }
}

impl<E: fmt::Display + fmt::Debug> std::error::Error for CallError<E> {}

// ============================================================================
// Tests
// ============================================================================
