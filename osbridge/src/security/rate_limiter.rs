//! Sliding-window rate limiting per `(module, action)` key.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::errors::{BridgeError, BridgeResult};

const WINDOW: Duration = Duration::from_secs(60);

pub struct ActionRateLimiter {
    /// action_key -> timestamps of calls within the window
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
    /// action_key -> calls per minute
    limits: HashMap<String, u32>,
    default_limit: u32,
}

impl ActionRateLimiter {
    pub fn new(limits: HashMap<String, u32>, default_limit: u32) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            limits,
            default_limit,
        }
    }

    pub fn limit_for(&self, action_key: &str) -> u32 {
        self.limits
            .get(action_key)
            .copied()
            .unwrap_or(self.default_limit)
    }

    /// Record one call against `action_key`, failing with a wait-hint when
    /// the window is full. A limit of 0 disables limiting for the key.
    pub fn check(&self, action_key: &str) -> BridgeResult<()> {
        let limit = self.limit_for(action_key);
        if limit == 0 {
            return Ok(());
        }
        let now = Instant::now();
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| BridgeError::Internal("rate limiter lock poisoned".to_string()))?;
        let window = windows.entry(action_key.to_string()).or_default();
        while let Some(front) = window.front() {
            if now.duration_since(*front) >= WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }
        if window.len() >= limit as usize {
            let oldest = window.front().copied().unwrap_or(now);
            let retry_after = WINDOW
                .checked_sub(now.duration_since(oldest))
                .unwrap_or_default()
                .as_secs_f64();
            return Err(BridgeError::RateLimitExceeded {
                action_key: action_key.to_string(),
                limit,
                retry_after_s: retry_after,
            });
        }
        window.push_back(now);
        Ok(())
    }
}
