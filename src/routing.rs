//! Routing filters decide which targets receive an event.
//!
//! A filter is a case-insensitive token list. Two filters match when either
//! side is `all`, when they are equal, or when their comma separated token
//! sets intersect.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sentinel that matches every target
pub const ALL: &str = "all";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoutingFilter(String);

impl RoutingFilter {
    pub fn new(filter: impl Into<String>) -> Self {
        Self(filter.into())
    }

    /// Filter that every target accepts
    pub fn all() -> Self {
        Self(ALL.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_all(&self) -> bool {
        self.0.eq_ignore_ascii_case(ALL)
    }

    /// Test this filter against another filter
    pub fn matches(&self, other: &RoutingFilter) -> bool {
        self.matches_str(&other.0)
    }

    /// Test this filter against a raw filter string, usually a target name
    pub fn matches_str(&self, other: &str) -> bool {
        let own = self.0.to_lowercase();
        let other = other.to_lowercase();

        if own == other || own == ALL || other == ALL {
            return true;
        }

        let targets: Vec<&str> = other.split(',').map(str::trim).collect();
        own.split(',')
            .map(str::trim)
            .any(|token| targets.contains(&token))
    }
}

impl Default for RoutingFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Display for RoutingFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoutingFilter {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
