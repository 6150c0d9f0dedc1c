//! Turn throttle
//!
//! Fixed-window counter per member identity. Each key opens its own window
//! on first use and resets it independently; nothing is persisted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Default turns allowed per window
pub const DEFAULT_MAX_TURNS: u32 = 30;

/// Default window length
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Advisory shown when a member runs out of turns
pub const RATE_LIMIT_MESSAGE: &str =
    "You're sending messages too quickly. Please wait a minute and try again.";

/// Time source, swappable in tests
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    opened: Instant,
    used: u32,
}

/// Per-identity turn limiter
pub struct TurnThrottle {
    windows: Mutex<HashMap<String, Window>>,
    max_turns: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TurnThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnThrottle")
            .field("max_turns", &self.max_turns)
            .field("window", &self.window)
            .field("keys", &self.key_count())
            .finish()
    }
}

impl TurnThrottle {
    pub fn new(max_turns: u32, window: Duration) -> Self {
        Self::with_clock(max_turns, window, Arc::new(SystemClock))
    }

    pub fn with_clock(max_turns: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            max_turns,
            window,
            clock,
        }
    }

    fn windows(&self) -> MutexGuard<'_, HashMap<String, Window>> {
        self.windows.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Count one turn against `key`
    pub fn try_acquire(&self, key: &str) -> ThrottleResult {
        let now = self.clock.now();
        let mut windows = self.windows();

        let entry = windows.entry(key.to_string()).or_insert(Window {
            opened: now,
            used: 0,
        });

        if now.duration_since(entry.opened) >= self.window {
            *entry = Window {
                opened: now,
                used: 0,
            };
        }

        if entry.used < self.max_turns {
            entry.used += 1;
            ThrottleResult::Allowed {
                remaining: self.max_turns - entry.used,
            }
        } else {
            let elapsed = now.duration_since(entry.opened);
            ThrottleResult::Limited {
                retry_after: self.window.saturating_sub(elapsed),
            }
        }
    }

    /// Drop windows that have already expired
    pub fn cleanup(&self) {
        let now = self.clock.now();
        let window = self.window;
        self.windows()
            .retain(|_, w| now.duration_since(w.opened) < window);
    }

    pub fn key_count(&self) -> usize {
        self.windows().len()
    }
}

impl Default for TurnThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TURNS, DEFAULT_WINDOW)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThrottleResult {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

impl ThrottleResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ThrottleResult::Allowed { .. })
    }

    pub fn is_limited(&self) -> bool {
        matches!(self, ThrottleResult::Limited { .. })
    }
}
