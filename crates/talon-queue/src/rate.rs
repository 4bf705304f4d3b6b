//! Per-chat sliding-window rate limiter.
//!
//! State is in-process only and resets on restart.

use std::collections::HashMap;
use std::sync::Mutex;

/// Admissions allowed per chat within any 60 s window.
pub const MAX_MESSAGES_PER_MINUTE: usize = 10;

const WINDOW_MS: i64 = 60_000;

#[derive(Default)]
pub struct RateLimiter {
    windows: Mutex<HashMap<i64, Vec<i64>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admission check: prune the chat's window, reject when it is full,
    /// otherwise record this admission. `now_ms` is wall-clock milliseconds.
    pub fn admit(&self, chat_id: i64, now_ms: i64) -> bool {
        let mut windows = self.windows.lock().unwrap();
        let entries = windows.entry(chat_id).or_default();
        entries.retain(|&t| now_ms - t < WINDOW_MS);
        if entries.len() >= MAX_MESSAGES_PER_MINUTE {
            return false;
        }
        entries.push(now_ms);
        true
    }

    /// Check-only probe used by command handlers: prunes but never records.
    pub fn probe(&self, chat_id: i64, now_ms: i64) -> bool {
        let mut windows = self.windows.lock().unwrap();
        let entries = windows.entry(chat_id).or_default();
        entries.retain(|&t| now_ms - t < WINDOW_MS);
        entries.len() < MAX_MESSAGES_PER_MINUTE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eleventh_admission_in_window_is_rejected() {
        let rl = RateLimiter::new();
        // Ten admissions spread over 30s all pass.
        for i in 0..10 {
            assert!(rl.admit(1, i * 3_000), "admission {i} should pass");
        }
        // The 11th inside the same 60s window fails.
        assert!(!rl.admit(1, 30_000));
        // Just past the first entry's expiry, a new admission passes.
        assert!(rl.admit(1, 60_001));
    }

    #[test]
    fn windows_are_per_chat() {
        let rl = RateLimiter::new();
        for i in 0..10 {
            assert!(rl.admit(1, i));
        }
        assert!(!rl.admit(1, 20));
        assert!(rl.admit(2, 20));
    }

    #[test]
    fn probe_prunes_but_does_not_record() {
        let rl = RateLimiter::new();
        for _ in 0..200 {
            assert!(rl.probe(1, 0));
        }
        // Probes consumed nothing: ten real admissions still fit.
        for i in 0..10 {
            assert!(rl.admit(1, i));
        }
        assert!(!rl.probe(1, 15));
        // After the window slides, probe reports capacity again.
        assert!(rl.probe(1, 70_000));
    }
}
