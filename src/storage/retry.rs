//! Retry-on-contention policy for frontier store writes
//!
//! SQLite reports `SQLITE_BUSY`/`SQLITE_LOCKED` when another connection or
//! process holds the write lock. Every store operation runs through a
//! [`RetryPolicy`], which sleeps a backoff interval and re-executes the
//! identical operation on those codes. Any other error propagates at once.
//!
//! # Liveness
//!
//! With `max_attempts: None` (the default) there is no ceiling: a writer
//! that never releases the lock stalls the caller forever. Set
//! `retry-max-attempts` in the storage config to trade that for a
//! [`StorageError::ContentionExhausted`] error.

use crate::config::StorageConfig;
use crate::storage::traits::{StorageError, StorageResult};
use rand::Rng;
use rusqlite::ErrorCode;
use std::time::Duration;

/// Sleep strategy between contention retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Uniformly random sleep in `[0, max)`
    Random { max: Duration },
    /// Constant sleep
    Fixed(Duration),
}

impl Backoff {
    fn delay(&self) -> Duration {
        match *self {
            Backoff::Random { max } => {
                let factor: f64 = rand::thread_rng().gen();
                Duration::from_secs_f64(max.as_secs_f64() * factor)
            }
            Backoff::Fixed(delay) => delay,
        }
    }
}

/// Explicit retry policy wrapping every frontier store call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff: Backoff,
    /// Total attempts allowed; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Backoff::Random {
                max: Duration::from_secs(1),
            },
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            backoff: Backoff::Random {
                max: Duration::from_millis(config.retry_max_backoff_ms),
            },
            max_attempts: config.retry_max_attempts,
        }
    }

    /// Runs `op`, retrying it for as long as the database reports contention
    pub fn run<T, F>(&self, operation: &str, mut op: F) -> StorageResult<T>
    where
        F: FnMut() -> rusqlite::Result<T>,
    {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if is_contention(&e) => {
                    if let Some(max) = self.max_attempts {
                        if attempt >= max {
                            tracing::error!(
                                operation,
                                attempts = attempt,
                                "Database still busy after all retry attempts"
                            );
                            return Err(StorageError::ContentionExhausted {
                                operation: operation.to_string(),
                                attempts: attempt,
                            });
                        }
                    }

                    let delay = self.backoff.delay();
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Database busy, retrying"
                    );
                    std::thread::sleep(delay);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Returns true when the error is SQLite signalling lock contention
pub fn is_contention(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::ffi;

    fn busy() -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_BUSY), None)
    }

    fn fast_policy(max_attempts: Option<u32>) -> RetryPolicy {
        RetryPolicy {
            backoff: Backoff::Fixed(Duration::from_millis(1)),
            max_attempts,
        }
    }

    #[test]
    fn test_busy_is_retried_until_success() {
        let mut calls = 0;
        let result = fast_policy(None).run("test", || {
            calls += 1;
            if calls < 4 {
                Err(busy())
            } else {
                Ok(calls)
            }
        });

        assert_eq!(result.unwrap(), 4);
        assert_eq!(calls, 4);
    }

    #[test]
    fn test_locked_counts_as_contention() {
        let locked = rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_LOCKED), None);
        assert!(is_contention(&locked));
        assert!(is_contention(&busy()));
        assert!(!is_contention(&rusqlite::Error::QueryReturnedNoRows));
    }

    #[test]
    fn test_other_errors_propagate_immediately() {
        let mut calls = 0;
        let result: StorageResult<()> = fast_policy(None).run("test", || {
            calls += 1;
            Err(rusqlite::Error::QueryReturnedNoRows)
        });

        assert!(matches!(result, Err(StorageError::Sqlite(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_cap_is_honoured() {
        let mut calls = 0;
        let result: StorageResult<()> = fast_policy(Some(3)).run("test", || {
            calls += 1;
            Err(busy())
        });

        assert!(matches!(
            result,
            Err(StorageError::ContentionExhausted { attempts: 3, .. })
        ));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_random_backoff_stays_below_max() {
        let backoff = Backoff::Random {
            max: Duration::from_millis(20),
        };
        for _ in 0..100 {
            assert!(backoff.delay() < Duration::from_millis(20));
        }
    }
}
