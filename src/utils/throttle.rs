//! Log throttling utility
//!
//! Provides a mechanism to limit how often the same log message is recorded,
//! preventing log flooding when errors occur repeatedly.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Log throttler that limits how often the same message is logged.
///
/// Used by the clipboard-sync loop (§10.1): a `Desktop::read_clipboard`
/// failure at ~10 Hz would otherwise flood the log.
///
/// # Example
///
/// ```
/// use kvm_coordinator::utils::LogThrottler;
///
/// let throttler = LogThrottler::new(std::time::Duration::from_secs(5));
///
/// assert!(throttler.should_log("clipboard_read"));
/// assert!(!throttler.should_log("clipboard_read"));
/// ```
pub struct LogThrottler {
    last_logged: RwLock<HashMap<String, Instant>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self { last_logged: RwLock::new(HashMap::new()), interval }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns `true` if `key` should be logged now (and not throttled).
    /// If `true`, the internal timestamp is updated.
    pub fn should_log(&self, key: &str) -> bool {
        let now = Instant::now();
        {
            let map = self.last_logged.read().unwrap();
            if let Some(last) = map.get(key) {
                if now.duration_since(*last) < self.interval {
                    return false;
                }
            }
        }
        let mut map = self.last_logged.write().unwrap();
        if let Some(last) = map.get(key) {
            if now.duration_since(*last) < self.interval {
                return false;
            }
        }
        map.insert(key.to_string(), now);
        true
    }

    pub fn clear(&self, key: &str) {
        self.last_logged.write().unwrap().remove(key);
    }

    pub fn clear_all(&self) {
        self.last_logged.write().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.last_logged.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_logged.read().unwrap().is_empty()
    }
}

impl Default for LogThrottler {
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Macro for throttled warning logging.
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::warn!($($arg)*);
        }
    };
}

/// Macro for throttled error logging.
#[macro_export]
macro_rules! error_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::error!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn should_log_first_call() {
        let throttler = LogThrottler::with_secs(1);
        assert!(throttler.should_log("test_key"));
    }

    #[test]
    fn throttling_suppresses_repeats_within_interval() {
        let throttler = LogThrottler::new(Duration::from_millis(100));
        assert!(throttler.should_log("test_key"));
        assert!(!throttler.should_log("test_key"));
        thread::sleep(Duration::from_millis(150));
        assert!(throttler.should_log("test_key"));
    }

    #[test]
    fn different_keys_are_independent() {
        let throttler = LogThrottler::with_secs(10);
        assert!(throttler.should_log("key1"));
        assert!(throttler.should_log("key2"));
        assert!(!throttler.should_log("key1"));
        assert!(!throttler.should_log("key2"));
    }

    #[test]
    fn clear_allows_immediate_relog() {
        let throttler = LogThrottler::with_secs(10);
        assert!(throttler.should_log("test_key"));
        assert!(!throttler.should_log("test_key"));
        throttler.clear("test_key");
        assert!(throttler.should_log("test_key"));
    }

    #[test]
    fn len_and_is_empty_track_key_count() {
        let throttler = LogThrottler::with_secs(10);
        assert!(throttler.is_empty());
        throttler.should_log("key1");
        assert!(!throttler.is_empty());
        assert_eq!(throttler.len(), 1);
    }
}
