use std::future::Future;
use std::time::Duration;

/// Capped exponential backoff for transient remote failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first attempt.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// No waiting between attempts; used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }
}

/// Terminal state returned when the retry runner gives up.
#[derive(Debug)]
pub struct RetryTerminal<E> {
    pub error: E,
    pub attempts: u32,
    pub exhausted_retryable: bool,
}

/// Runs `op` until it succeeds, returns a non-retryable error, or attempts run out.
///
/// `seed` keys the jitter so different objects don't retry in lockstep.
pub async fn run_with_retry<T, E, F, Fut, R>(
    retry_policy: &RetryPolicy,
    seed: u64,
    mut op: F,
    mut is_retryable: R,
) -> Result<(T, u32), RetryTerminal<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(&E) -> bool,
{
    let max_attempts = retry_policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok((value, attempt)),
            Err(error) => {
                let retryable = is_retryable(&error);
                if retryable && attempt < max_attempts {
                    let delay = compute_backoff_delay(retry_policy, attempt, seed);
                    tracing::debug!(
                        event = "retry_scheduled",
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "transient failure; retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                    continue;
                }
                return Err(RetryTerminal {
                    error,
                    attempts: attempt,
                    exhausted_retryable: retryable,
                });
            }
        }
    }
}

pub fn compute_backoff_delay(policy: &RetryPolicy, attempt: u32, seed: u64) -> Duration {
    if policy.initial_backoff.is_zero() && policy.jitter.is_zero() {
        return Duration::ZERO;
    }

    let shift = u32::min(attempt.saturating_sub(1), 20);
    let exponential_ms = policy
        .initial_backoff
        .as_millis()
        .saturating_mul(1u128 << shift);
    let capped_ms = exponential_ms.min(policy.max_backoff.as_millis());

    let jitter_ms = if policy.jitter.is_zero() {
        0
    } else {
        deterministic_jitter(seed, attempt, policy.jitter.as_millis())
    };

    let total_ms = capped_ms.saturating_add(jitter_ms);
    Duration::from_millis(total_ms.min(u64::MAX as u128) as u64)
}

/// FNV-1a over the key bytes; a stable jitter seed for string-keyed operations.
pub fn seed_from_key(key: &str) -> u64 {
    key.bytes().fold(0xcbf2_9ce4_8422_2325u64, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

fn deterministic_jitter(seed: u64, attempt: u32, jitter_cap: u128) -> u128 {
    if jitter_cap == 0 {
        return 0;
    }

    let mut x = seed ^ (attempt as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    x ^= x >> 33;

    (x as u128) % (jitter_cap + 1)
}

#[cfg(test)]
mod tests {
    use super::{compute_backoff_delay, run_with_retry, seed_from_key, RetryPolicy};
    use std::cell::Cell;
    use std::time::Duration;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            jitter: Duration::ZERO,
        };

        assert_eq!(compute_backoff_delay(&policy, 1, 7), Duration::from_millis(100));
        assert_eq!(compute_backoff_delay(&policy, 2, 7), Duration::from_millis(200));
        assert_eq!(compute_backoff_delay(&policy, 3, 7), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_cap_and_is_deterministic() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter: Duration::from_millis(40),
        };
        let seed = seed_from_key("attendance_logs_backup.sql");

        let first = compute_backoff_delay(&policy, 2, seed);
        assert!(first <= Duration::from_millis(40));
        assert_eq!(first, compute_backoff_delay(&policy, 2, seed));
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = Cell::new(0u32);
        let result = run_with_retry(
            &RetryPolicy::immediate(3),
            1,
            |_| {
                calls.set(calls.get() + 1);
                let current = calls.get();
                async move {
                    if current < 3 {
                        Err("busy")
                    } else {
                        Ok(current)
                    }
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap(), (3, 3));
    }

    #[tokio::test]
    async fn permanent_errors_stop_immediately() {
        let calls = Cell::new(0u32);
        let result: Result<((), u32), _> = run_with_retry(
            &RetryPolicy::immediate(5),
            1,
            |_| {
                calls.set(calls.get() + 1);
                async { Err("forbidden") }
            },
            |_| false,
        )
        .await;

        let terminal = result.unwrap_err();
        assert_eq!(terminal.attempts, 1);
        assert!(!terminal.exhausted_retryable);
        assert_eq!(calls.get(), 1);
    }
}
