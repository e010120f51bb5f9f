//! Log throttling utility
//!
//! Per-frame failures (drops, failed sends) repeat at the stream rate. The
//! throttler lets the first occurrence through, then at most one message
//! per interval and key, and counts what it swallowed in between.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct KeyState {
    last_logged: Instant,
    suppressed: u64,
}

/// Log throttler that limits how often the same message is recorded
///
/// ```rust
/// use realsense_monitor::utils::LogThrottler;
/// use std::time::Duration;
///
/// let throttler = LogThrottler::new(Duration::from_secs(5));
/// assert!(throttler.should_log("viewer-1:drop").is_some());
/// assert!(throttler.should_log("viewer-1:drop").is_none());
/// ```
pub struct LogThrottler {
    keys: Mutex<HashMap<String, KeyState>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Check whether a message for `key` may be logged now
    ///
    /// Returns `Some(n)` when it may, where `n` is the number of messages
    /// suppressed since the last one; `None` when it should be dropped.
    pub fn should_log(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let mut keys = self.keys.lock();
        match keys.get_mut(key) {
            Some(state) if now.duration_since(state.last_logged) < self.interval => {
                state.suppressed += 1;
                None
            }
            Some(state) => {
                state.last_logged = now;
                Some(std::mem::take(&mut state.suppressed))
            }
            None => {
                keys.insert(
                    key.to_string(),
                    KeyState {
                        last_logged: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }

    /// Forget a key, e.g. when the subscriber it belongs to goes away
    pub fn clear(&self, key: &str) {
        self.keys.lock().remove(key);
    }

    /// Forget every key starting with `prefix`
    pub fn clear_prefix(&self, prefix: &str) {
        self.keys.lock().retain(|k, _| !k.starts_with(prefix));
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }
}

impl Default for LogThrottler {
    /// 5 second interval
    fn default() -> Self {
        Self::with_secs(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_first_call_logs() {
        let throttler = LogThrottler::with_secs(1);
        assert_eq!(throttler.should_log("k"), Some(0));
    }

    #[test]
    fn test_suppressed_are_counted() {
        let throttler = LogThrottler::new(Duration::from_millis(50));
        assert!(throttler.should_log("k").is_some());
        assert!(throttler.should_log("k").is_none());
        assert!(throttler.should_log("k").is_none());

        sleep(Duration::from_millis(60));
        assert_eq!(throttler.should_log("k"), Some(2));
    }

    #[test]
    fn test_keys_are_independent() {
        let throttler = LogThrottler::with_secs(10);
        assert!(throttler.should_log("a").is_some());
        assert!(throttler.should_log("b").is_some());
        assert!(throttler.should_log("a").is_none());
    }

    #[test]
    fn test_clear_prefix() {
        let throttler = LogThrottler::with_secs(10);
        throttler.should_log("v1:drop");
        throttler.should_log("v1:send");
        throttler.should_log("v2:drop");
        throttler.clear_prefix("v1:");
        assert_eq!(throttler.len(), 1);
        assert!(throttler.should_log("v1:drop").is_some());
        throttler.clear("v2:drop");
        throttler.clear("v1:drop");
        assert!(throttler.is_empty());
    }
}
