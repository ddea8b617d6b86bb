//! Rate limit entries and the keys that identify them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A key that uniquely identifies a rate limit entry.
///
/// The scope separates independent policies (`login`, `signup`, ...) that
/// share one store; the identifier separates callers within a scope. Tiers of
/// a tiered policy get their own counter through `tier`, kept apart from the
/// scope so no scope name can collide with a tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryKey {
    /// Policy namespace
    pub scope: String,
    /// Tier label within a tiered policy
    pub tier: Option<String>,
    /// Caller identity (IP address, e-mail, API key id)
    pub identifier: String,
}

impl EntryKey {
    /// Create a new entry key.
    pub fn new(scope: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            tier: None,
            identifier: identifier.into(),
        }
    }

    /// Create a key for one tier of a scope.
    pub fn tiered(
        scope: impl Into<String>,
        tier: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Self {
        Self {
            scope: scope.into(),
            tier: Some(tier.into()),
            identifier: identifier.into(),
        }
    }

    /// Key string used for gossip state.
    ///
    /// Format: "ratelimit|{len}:{scope}|{tier}|{identifier}" where `tier` is
    /// `-` for untiered keys and `{len}:{label}` otherwise. The length prefixes
    /// keep the encoding unambiguous whatever the fields contain.
    pub fn to_gossip_key(&self) -> String {
        let tier = match &self.tier {
            Some(label) => format!("{}:{}", label.len(), label),
            None => "-".to_string(),
        };
        format!(
            "ratelimit|{}:{}|{}|{}",
            self.scope.len(),
            self.scope,
            tier,
            self.identifier
        )
    }
}

impl std::fmt::Display for EntryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.tier {
            Some(tier) => write!(f, "{}[{}]:{}", self.scope, tier, self.identifier),
            None => write!(f, "{}:{}", self.scope, self.identifier),
        }
    }
}

/// Request count for one key within one fixed window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitEntry {
    /// Requests observed since `window_start`
    pub count: u32,
    /// When the current window opened
    pub window_start: DateTime<Utc>,
    /// When the current window closes
    pub reset_at: DateTime<Utc>,
}

impl RateLimitEntry {
    /// Open a fresh window at `now` with a zero count.
    pub fn open(now: DateTime<Utc>, window: chrono::Duration) -> Self {
        Self {
            count: 0,
            window_start: now,
            reset_at: now + window,
        }
    }

    /// Whether the window has closed.
    ///
    /// The boundary instant itself still belongs to the window.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.reset_at
    }

    /// Count one request.
    pub fn record_hit(&mut self) -> u32 {
        self.count = self.count.saturating_add(1);
        self.count
    }
}
