//! Fixed-window rate limiting for tool invocations

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Fixed-window counter limiting calls per tool.
///
/// `allow` increments on entry and never blocks; the caller decides what to
/// do on refusal. The count resets whenever the current window opened at
/// least one window length ago.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    state: Mutex<WindowState>,
}

#[derive(Debug)]
struct WindowState {
    count: u32,
    window_start: Instant,
}

impl RateLimiter {
    /// Limiter allowing `limit` calls per minute.
    pub fn per_minute(limit: u32) -> Self {
        Self::with_window(limit, Duration::from_secs(60))
    }

    /// Limiter with an explicit window length.
    pub fn with_window(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            state: Mutex::new(WindowState {
                count: 0,
                window_start: Instant::now(),
            }),
        }
    }

    /// The configured per-window limit.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Admit one call if the window has capacity.
    pub fn allow(&self) -> bool {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if state.window_start.elapsed() >= self.window {
            state.count = 0;
            state.window_start = Instant::now();
        }

        if state.count < self.limit {
            state.count += 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_limit() {
        let limiter = RateLimiter::per_minute(2);
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
        assert!(!limiter.allow());
    }

    #[test]
    fn test_window_reset() {
        let limiter = RateLimiter::with_window(1, Duration::from_millis(20));
        assert!(limiter.allow());
        assert!(!limiter.allow());

        std::thread::sleep(Duration::from_millis(25));
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }

    #[test]
    fn test_never_exceeds_limit_within_window() {
        let limiter = RateLimiter::per_minute(5);
        let admitted = (0..100).filter(|_| limiter.allow()).count();
        assert_eq!(admitted, 5);
    }

    #[test]
    fn test_thread_safety() {
        use std::sync::Arc;

        let limiter = Arc::new(RateLimiter::per_minute(10));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = Arc::clone(&limiter);
            handles.push(std::thread::spawn(move || {
                (0..25).filter(|_| limiter.allow()).count()
            }));
        }

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 10);
    }
}
