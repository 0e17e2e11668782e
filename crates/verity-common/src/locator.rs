//! Locator strategies and the prioritized locator spec.
//!
//! A `LocatorSpec` names a logical UI target as an ordered list of
//! `(strategy, value)` candidates. Resolution tries them in declared order
//! and takes the first strategy that matches exactly one live element.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Supported locator strategies, listed in descending default preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// `data-testid` style attribute lookup. Most stable across refactors.
    DataAttribute,
    /// Element id lookup.
    Id,
    /// ARIA role lookup.
    AccessibilityRole,
    /// Raw CSS selector. Most brittle, lowest preference.
    CssSelector,
}

impl StrategyKind {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::DataAttribute => "data-attribute",
            StrategyKind::Id => "id",
            StrategyKind::AccessibilityRole => "role",
            StrategyKind::CssSelector => "css",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
#[error("locator spec must declare at least one strategy")]
pub struct EmptyLocator;

/// Ordered locator candidates for one logical target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocatorSpec {
    strategies: Vec<(StrategyKind, String)>,
}

impl LocatorSpec {
    /// Build a spec from pre-ordered candidates. Fails on an empty list.
    pub fn new(strategies: Vec<(StrategyKind, String)>) -> Result<Self, EmptyLocator> {
        if strategies.is_empty() {
            return Err(EmptyLocator);
        }
        Ok(Self { strategies })
    }

    pub fn data_attribute(value: impl Into<String>) -> Self {
        Self {
            strategies: vec![(StrategyKind::DataAttribute, value.into())],
        }
    }

    pub fn id(value: impl Into<String>) -> Self {
        Self {
            strategies: vec![(StrategyKind::Id, value.into())],
        }
    }

    pub fn role(value: impl Into<String>) -> Self {
        Self {
            strategies: vec![(StrategyKind::AccessibilityRole, value.into())],
        }
    }

    pub fn css(value: impl Into<String>) -> Self {
        Self {
            strategies: vec![(StrategyKind::CssSelector, value.into())],
        }
    }

    /// Append a lower-priority fallback candidate.
    pub fn or(mut self, strategy: StrategyKind, value: impl Into<String>) -> Self {
        self.strategies.push((strategy, value.into()));
        self
    }

    pub fn strategies(&self) -> &[(StrategyKind, String)] {
        &self.strategies
    }

    /// Short human-readable form used in logs and error messages.
    pub fn describe(&self) -> String {
        self.strategies
            .iter()
            .map(|(kind, value)| format!("{}={}", kind, value))
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

impl std::fmt::Display for LocatorSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_spec() {
        assert!(LocatorSpec::new(vec![]).is_err());
    }

    #[test]
    fn preserves_declared_order() {
        let spec = LocatorSpec::data_attribute("login-button")
            .or(StrategyKind::Id, "login")
            .or(StrategyKind::CssSelector, "button.login");

        let kinds: Vec<StrategyKind> = spec.strategies().iter().map(|(k, _)| *k).collect();
        assert_eq!(
            kinds,
            vec![
                StrategyKind::DataAttribute,
                StrategyKind::Id,
                StrategyKind::CssSelector
            ]
        );
    }

    #[test]
    fn describe_lists_all_candidates() {
        let spec = LocatorSpec::data_attribute("submit").or(StrategyKind::CssSelector, "#submit");
        assert_eq!(spec.describe(), "data-attribute=submit | css=#submit");
    }
}
