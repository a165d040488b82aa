//! Rate Limiter
//!
//! Fixed-window, per-class client-side rate limiting. The limiter never
//! sleeps; it hands a delay back to the caller, which decides how to wait.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::transport::HttpMethod;

/// Class used for GET and HEAD requests.
pub const READ_CLASS: &str = "read";
/// Class used for mutating requests.
pub const WRITE_CLASS: &str = "write";

/// Limit for one class: at most `limit` requests per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    /// Requests allowed per window.
    pub limit: u32,
    /// Window length.
    pub window: Duration,
}

impl RateLimitRule {
    /// Creates a rule.
    pub const fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }
}

/// Routes requests whose path contains `fragment` into `class`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathOverride {
    /// Path substring to match.
    pub fragment: String,
    /// Class assigned on match.
    pub class: String,
}

/// Published limits of one product line, as data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitProfile {
    rules: HashMap<String, RateLimitRule>,
    overrides: Vec<PathOverride>,
}

impl RateLimitProfile {
    /// Profile without any limits.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Adds or replaces the rule for `class`.
    pub fn with_rule(mut self, class: impl Into<String>, limit: u32, window: Duration) -> Self {
        self.rules
            .insert(class.into(), RateLimitRule::new(limit, window));
        self
    }

    /// Sends paths containing `fragment` to their own class.
    pub fn with_path_override(
        mut self,
        fragment: impl Into<String>,
        class: impl Into<String>,
    ) -> Self {
        self.overrides.push(PathOverride {
            fragment: fragment.into(),
            class: class.into(),
        });
        self
    }

    /// Rule for a class, if it is limited.
    pub fn rule(&self, class: &str) -> Option<RateLimitRule> {
        self.rules.get(class).copied()
    }

    /// Maps a request onto its rate-limit class.
    pub fn classify(&self, method: HttpMethod, path: &str) -> String {
        if let Some(o) = self.overrides.iter().find(|o| path.contains(&o.fragment)) {
            return o.class.clone();
        }
        if method.is_mutating() {
            WRITE_CLASS.to_string()
        } else {
            READ_CLASS.to_string()
        }
    }
}

/// Outcome of asking the limiter for a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// A slot was consumed; send now.
    Proceed,
    /// The window is full; retry after the delay.
    Wait(Duration),
}

impl RateLimitDecision {
    /// True when the caller has to wait.
    pub fn must_wait(&self) -> bool {
        matches!(self, RateLimitDecision::Wait(_))
    }

    /// Delay to apply, zero for `Proceed`.
    pub fn delay(&self) -> Duration {
        match self {
            RateLimitDecision::Proceed => Duration::ZERO,
            RateLimitDecision::Wait(d) => *d,
        }
    }
}

#[derive(Debug)]
struct Window {
    start: Instant,
    count: u32,
    rule: RateLimitRule,
}

impl Window {
    fn roll(&mut self, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.start);
        if elapsed >= self.rule.window {
            self.start = now;
            self.count = 0;
            Duration::ZERO
        } else {
            elapsed
        }
    }
}

/// Per-client limiter holding one counter per class.
#[derive(Debug)]
pub struct RateLimiter {
    profile: RateLimitProfile,
    windows: RwLock<HashMap<String, Arc<Mutex<Window>>>>,
}

impl RateLimiter {
    /// Create a limiter for a profile.
    pub fn new(profile: RateLimitProfile) -> Self {
        Self {
            profile,
            windows: RwLock::new(HashMap::new()),
        }
    }

    /// The profile this limiter enforces.
    pub fn profile(&self) -> &RateLimitProfile {
        &self.profile
    }

    fn window(&self, class: &str) -> Option<Arc<Mutex<Window>>> {
        if let Some(w) = self.windows.read().get(class) {
            return Some(Arc::clone(w));
        }
        let rule = self.profile.rule(class)?;
        let mut windows = self.windows.write();
        let entry = windows.entry(class.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(Window {
                start: Instant::now(),
                count: 0,
                rule,
            }))
        });
        Some(Arc::clone(entry))
    }

    /// Consumes a slot for `class` or reports how long to wait.
    pub fn wait(&self, class: &str) -> RateLimitDecision {
        let Some(window) = self.window(class) else {
            return RateLimitDecision::Proceed;
        };
        let mut w = window.lock();
        let elapsed = w.roll(Instant::now());
        if w.count < w.rule.limit {
            w.count += 1;
            RateLimitDecision::Proceed
        } else {
            RateLimitDecision::Wait(w.rule.window - elapsed)
        }
    }

    /// Delay the next `wait` would return, without consuming a slot.
    pub fn peek(&self, class: &str) -> Option<Duration> {
        let window = self.window(class)?;
        let mut w = window.lock();
        let elapsed = w.roll(Instant::now());
        if w.count < w.rule.limit {
            None
        } else {
            Some(w.rule.window - elapsed)
        }
    }
}
