//! Route table: action patterns bound to concrete tools
//!
//! Route selection is deterministic. Actions are normalized by stripping the
//! leading `/`, then matched in three tiers: exact pattern, longest pattern
//! that is a prefix of the action, longest pattern contained anywhere in the
//! action. Within a tier, the earliest-registered route wins ties.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Binding from an action pattern to a tool, with invocation policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRoute {
    /// Pattern matched against normalized action verbs
    pub action_pattern: String,

    /// Tool the executor should dispatch to
    pub tool: String,

    /// Deadline for a single invocation
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Calls per minute; 0 means unlimited
    pub rate_limit: u32,

    /// Whether the binding requires safe mode
    pub requires_safe: bool,
}

impl ToolRoute {
    /// Create a route with the given pattern, tool, and timeout.
    pub fn new(pattern: impl Into<String>, tool: impl Into<String>, timeout: Duration) -> Self {
        Self {
            action_pattern: normalize(&pattern.into()).to_string(),
            tool: tool.into(),
            timeout,
            rate_limit: 0,
            requires_safe: false,
        }
    }

    /// Set the per-minute rate limit.
    pub fn with_rate_limit(mut self, per_minute: u32) -> Self {
        self.rate_limit = per_minute;
        self
    }

    /// Mark the route as requiring safe mode.
    pub fn with_requires_safe(mut self, requires_safe: bool) -> Self {
        self.requires_safe = requires_safe;
        self
    }
}

/// Strip the leading `/` used by action atoms.
pub fn normalize(action: &str) -> &str {
    action.strip_prefix('/').unwrap_or(action)
}

/// Associative set of routes with stable insertion order.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<ToolRoute>,
}

impl RouteTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table seeded with the default tool bindings: filesystem, code search,
    /// execution, network, delegation, and user interaction.
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        let defaults = [
            ToolRoute::new("read_file", "fs_read", Duration::from_secs(10)),
            ToolRoute::new("write_file", "fs_write", Duration::from_secs(10))
                .with_requires_safe(true),
            ToolRoute::new("list_dir", "fs_list", Duration::from_secs(10)),
            ToolRoute::new("search_code", "code_search", Duration::from_secs(20)),
            ToolRoute::new("execute", "shell_exec", Duration::from_secs(60))
                .with_rate_limit(10)
                .with_requires_safe(true),
            ToolRoute::new("fetch_url", "http_fetch", Duration::from_secs(30)).with_rate_limit(30),
            ToolRoute::new("delegate", "shard_delegate", Duration::from_secs(30)),
            ToolRoute::new("ask_user", "user_prompt", Duration::from_secs(120)),
        ];
        for route in defaults {
            table.add(route);
        }
        table
    }

    /// Add a route. A route whose pattern is already present replaces the
    /// existing binding in place, keeping its registration position.
    pub fn add(&mut self, route: ToolRoute) {
        if let Some(existing) = self
            .routes
            .iter_mut()
            .find(|r| r.action_pattern == route.action_pattern)
        {
            *existing = route;
        } else {
            self.routes.push(route);
        }
    }

    /// Select the route for `action`, per the exact / longest-prefix /
    /// longest-containing precedence.
    pub fn find_route(&self, action: &str) -> Option<&ToolRoute> {
        let action = normalize(action);

        if let Some(route) = self.routes.iter().find(|r| r.action_pattern == action) {
            return Some(route);
        }

        let mut best: Option<&ToolRoute> = None;
        for route in &self.routes {
            if action.starts_with(&route.action_pattern)
                && best.is_none_or(|b| route.action_pattern.len() > b.action_pattern.len())
            {
                best = Some(route);
            }
        }
        if best.is_some() {
            return best;
        }

        for route in &self.routes {
            if action.contains(&route.action_pattern)
                && best.is_none_or(|b| route.action_pattern.len() > b.action_pattern.len())
            {
                best = Some(route);
            }
        }
        best
    }

    /// Snapshot of all routes in registration order.
    pub fn routes(&self) -> Vec<ToolRoute> {
        self.routes.clone()
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
