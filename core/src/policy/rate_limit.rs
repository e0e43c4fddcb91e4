use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct Entry {
    count: u32,
    reset_at: DateTime<Utc>,
    blocked_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSnapshot {
    pub identifier: String,
    pub count: u32,
    pub reset_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_until: Option<DateTime<Utc>>,
}

/// `now + d`, pinned to the end of time instead of overflowing.
fn later(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    now.checked_add_signed(d).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Fixed-window request counter per identifier with a temporary block once
/// the window quota is exceeded.
pub struct RateLimiter {
    enabled: bool,
    max_requests: u32,
    window: Duration,
    block: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl RateLimiter {
    pub fn new(enabled: bool, max_requests: u32, window: Duration, block: Duration) -> Self {
        Self {
            enabled,
            max_requests,
            window,
            block,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, identifier: &str) -> RateLimitDecision {
        self.check_at(identifier, Utc::now())
    }

    pub fn check_at(&self, identifier: &str, now: DateTime<Utc>) -> RateLimitDecision {
        if !self.enabled {
            return RateLimitDecision {
                allowed: true,
                remaining: self.max_requests,
                reset_at: later(now, self.window),
                blocked_until: None,
            };
        }

        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = entries
            .entry(identifier.to_string())
            .or_insert_with(|| Entry {
                count: 0,
                reset_at: later(now, self.window),
                blocked_until: None,
            });

        if let Some(until) = entry.blocked_until {
            if now < until {
                return RateLimitDecision {
                    allowed: false,
                    remaining: 0,
                    reset_at: entry.reset_at,
                    blocked_until: Some(until),
                };
            }
            entry.blocked_until = None;
            entry.count = 0;
            entry.reset_at = later(now, self.window);
        }

        if now >= entry.reset_at {
            entry.count = 0;
            entry.reset_at = later(now, self.window);
        }

        entry.count += 1;
        if entry.count > self.max_requests {
            let until = later(now, self.block);
            entry.blocked_until = Some(until);
            tracing::warn!(identifier, count = entry.count, blocked_until = %until, "rate limit exceeded");
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at: entry.reset_at,
                blocked_until: Some(until),
            };
        }

        RateLimitDecision {
            allowed: true,
            remaining: self.max_requests - entry.count,
            reset_at: entry.reset_at,
            blocked_until: None,
        }
    }

    pub fn snapshot(&self) -> Vec<RateLimitSnapshot> {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut out = entries
            .iter()
            .map(|(id, e)| RateLimitSnapshot {
                identifier: id.clone(),
                count: e.count,
                reset_at: e.reset_at,
                blocked_until: e.blocked_until,
            })
            .collect::<Vec<_>>();
        out.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        out
    }
}
