//! Rate limit policies and named policy sets.
//!
//! A policy is a `(max_attempts, window)` pair. Policy sets map scope names to
//! one or more policies and are loaded from YAML:
//!
//! ```yaml
//! policies:
//!   login:
//!     max_attempts: 5
//!     window_seconds: 900
//!   api_key:
//!     - { name: minute, max_attempts: 60, window_seconds: 60 }
//!     - { name: day, max_attempts: 10000, window_seconds: 86400 }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::error::{Result, TollgateError};

/// Longest accepted window. Keeps `now + window` far away from timestamp overflow.
pub const MAX_WINDOW_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Scope used when a named scope has no policy of its own.
pub const DEFAULT_SCOPE: &str = "default";

/// A validated fixed-window policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    max_attempts: u32,
    window_secs: u64,
    name: Option<String>,
}

impl Policy {
    /// Create a policy, rejecting zero limits and zero or oversized windows.
    pub fn new(max_attempts: u32, window_secs: u64) -> Result<Self> {
        if max_attempts == 0 {
            return Err(TollgateError::InvalidPolicy(
                "max_attempts must be greater than zero".to_string(),
            ));
        }
        if window_secs == 0 {
            return Err(TollgateError::InvalidPolicy(
                "window_seconds must be greater than zero".to_string(),
            ));
        }
        if window_secs > MAX_WINDOW_SECS {
            return Err(TollgateError::InvalidPolicy(format!(
                "window_seconds must be at most {}",
                MAX_WINDOW_SECS
            )));
        }

        Ok(Self {
            max_attempts,
            window_secs,
            name: None,
        })
    }

    /// Attach a tier name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    pub(crate) fn window_delta(&self) -> chrono::Duration {
        // Bounded by MAX_WINDOW_SECS, so the cast cannot wrap.
        chrono::Duration::seconds(self.window_secs as i64)
    }

    /// Tier label: the configured name, or the window length (`"60s"`).
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{}s", self.window_secs),
        }
    }
}

/// A policy rule as written in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Requests admitted per window
    pub max_attempts: u32,
    /// Window length in seconds
    pub window_seconds: u64,
    /// Optional tier name
    #[serde(default)]
    pub name: Option<String>,
}

impl PolicyRule {
    fn to_policy(&self) -> Result<Policy> {
        let policy = Policy::new(self.max_attempts, self.window_seconds)?;
        Ok(match &self.name {
            Some(name) => policy.named(name.clone()),
            None => policy,
        })
    }
}

/// One rule or an ordered list of tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScopeRules {
    Single(PolicyRule),
    Tiered(Vec<PolicyRule>),
}

impl ScopeRules {
    fn rules(&self) -> &[PolicyRule] {
        match self {
            ScopeRules::Single(rule) => std::slice::from_ref(rule),
            ScopeRules::Tiered(rules) => rules,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    policies: HashMap<String, ScopeRules>,
}

/// Named policies keyed by scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicySet {
    scopes: HashMap<String, Vec<Policy>>,
}

impl PolicySet {
    /// Create an empty policy set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Policies used across the web applications this service fronts.
    pub fn builtin() -> Self {
        let mut set = Self::new();
        for (scope, max_attempts, window_secs) in [
            ("login", 5, 900),
            ("signup", 3, 3600),
            ("auth", 5, 300),
            ("api", 100, 60),
            ("payment", 10, 300),
            ("user_api", 500, 60),
            ("trading", 100, 60),
            (DEFAULT_SCOPE, 200, 60),
        ] {
            // Constants above are all in range.
            if let Ok(policy) = Policy::new(max_attempts, window_secs) {
                set.scopes.insert(scope.to_string(), vec![policy]);
            }
        }
        set
    }

    /// Load a policy set from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit policies");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load a policy set from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: PolicyFile = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse policies: {}", e)))?;

        let mut set = Self::new();
        for (scope, rules) in file.policies {
            if rules.rules().is_empty() {
                return Err(TollgateError::Config(format!(
                    "Scope '{}' has no rate limit rules",
                    scope
                )));
            }
            let policies = rules
                .rules()
                .iter()
                .map(PolicyRule::to_policy)
                .collect::<Result<Vec<_>>>()
                .map_err(|e| TollgateError::Config(format!("Scope '{}': {}", scope, e)))?;
            set.scopes.insert(scope, policies);
        }

        Ok(set)
    }

    /// Replace or add a scope's policies.
    pub fn insert(&mut self, scope: impl Into<String>, policies: Vec<Policy>) {
        self.scopes.insert(scope.into(), policies);
    }

    /// Overlay another set on this one, scope by scope.
    pub fn merged(mut self, other: PolicySet) -> Self {
        self.scopes.extend(other.scopes);
        self
    }

    /// Policies for a scope, falling back to the default scope.
    pub fn resolve(&self, scope: &str) -> Option<&[Policy]> {
        self.scopes
            .get(scope)
            .or_else(|| self.scopes.get(DEFAULT_SCOPE))
            .map(Vec::as_slice)
    }

    /// Number of configured scopes.
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}
