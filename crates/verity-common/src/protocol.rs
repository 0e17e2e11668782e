//! Core data model shared by the engine, the backends and the CLI.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use url::Url;

use crate::locator::StrategyKind;

/// Browser engines a session can be requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserType {
    Chromium,
    Firefox,
    Webkit,
    Edge,
}

impl BrowserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserType::Chromium => "chromium",
            BrowserType::Firefox => "firefox",
            BrowserType::Webkit => "webkit",
            BrowserType::Edge => "edge",
        }
    }
}

impl std::fmt::Display for BrowserType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BrowserType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chromium" => Ok(BrowserType::Chromium),
            "firefox" => Ok(BrowserType::Firefox),
            "webkit" => Ok(BrowserType::Webkit),
            "edge" => Ok(BrowserType::Edge),
            other => Err(format!(
                "unknown browser type '{}' (expected chromium, firefox, webkit or edge)",
                other
            )),
        }
    }
}

/// Viewport presets. `Fullscreen` defers to whatever the display offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Hd,
    Fhd,
    Qhd,
    Uhd,
    Fullscreen,
}

impl Resolution {
    /// Pixel dimensions, `None` for fullscreen.
    pub fn viewport(&self) -> Option<(u32, u32)> {
        match self {
            Resolution::Hd => Some((1280, 720)),
            Resolution::Fhd => Some((1920, 1080)),
            Resolution::Qhd => Some((2560, 1440)),
            Resolution::Uhd => Some((3840, 2160)),
            Resolution::Fullscreen => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Hd => "hd",
            Resolution::Fhd => "fhd",
            Resolution::Qhd => "qhd",
            Resolution::Uhd => "uhd",
            Resolution::Fullscreen => "fullscreen",
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hd" => Ok(Resolution::Hd),
            "fhd" => Ok(Resolution::Fhd),
            "qhd" => Ok(Resolution::Qhd),
            "uhd" => Ok(Resolution::Uhd),
            "fullscreen" => Ok(Resolution::Fullscreen),
            other => Err(format!(
                "unknown resolution '{}' (expected hd, fhd, qhd, uhd or fullscreen)",
                other
            )),
        }
    }
}

/// Everything needed to acquire one browser session.
///
/// A present `grid_endpoint` selects remote (grid-provisioned) execution;
/// absence selects a locally launched browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub browser: BrowserType,
    pub browser_version: String,
    pub resolution: Resolution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_endpoint: Option<Url>,
}

impl SessionRequest {
    pub fn local(browser: BrowserType) -> Self {
        Self {
            browser,
            browser_version: "latest".into(),
            resolution: Resolution::Fhd,
            grid_endpoint: None,
        }
    }

    pub fn remote(browser: BrowserType, grid_endpoint: Url) -> Self {
        Self {
            grid_endpoint: Some(grid_endpoint),
            ..Self::local(browser)
        }
    }

    pub fn is_remote(&self) -> bool {
        self.grid_endpoint.is_some()
    }
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Provisioning,
    Ready,
    InUse,
    Releasing,
    Closed,
    Failed,
}

/// Opaque reference to one element the driver resolved.
///
/// `selector` is the concrete CSS form the strategy expanded to, kept for
/// diagnostics and for backends that re-address elements by selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementHandle {
    pub id: u64,
    pub strategy: StrategyKind,
    pub selector: String,
}

/// Actions the driver can perform against a resolved element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ElementAction {
    Click,
    DoubleClick,
    RightClick,
    Hover,
    Focus,
    /// Replace the element's current value with `text`.
    Fill { text: String },
    Clear,
    Press { key: String },
    SelectOption { value: String },
    ReadText,
    ReadValue,
    ReadAttribute { name: String },
    IsVisible,
    IsEnabled,
    IsChecked,
}

impl ElementAction {
    pub fn name(&self) -> &'static str {
        match self {
            ElementAction::Click => "click",
            ElementAction::DoubleClick => "double_click",
            ElementAction::RightClick => "right_click",
            ElementAction::Hover => "hover",
            ElementAction::Focus => "focus",
            ElementAction::Fill { .. } => "fill",
            ElementAction::Clear => "clear",
            ElementAction::Press { .. } => "press",
            ElementAction::SelectOption { .. } => "select_option",
            ElementAction::ReadText => "read_text",
            ElementAction::ReadValue => "read_value",
            ElementAction::ReadAttribute { .. } => "read_attribute",
            ElementAction::IsVisible => "is_visible",
            ElementAction::IsEnabled => "is_enabled",
            ElementAction::IsChecked => "is_checked",
        }
    }
}

/// What an action produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutput {
    Done,
    Text(String),
    Attribute(Option<String>),
    Flag(bool),
}

impl ActionOutput {
    pub fn into_text(self) -> Option<String> {
        match self {
            ActionOutput::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            ActionOutput::Flag(flag) => Some(*flag),
            _ => None,
        }
    }
}

/// Final grade of one executed test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    /// Passed, but only after at least one retried attempt.
    Flaky,
    Skipped,
}

/// Diagnostic artifacts gathered for a failed test. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct FailureArtifactBundle {
    pub test_id: String,
    pub screenshot: Option<Vec<u8>>,
    pub video: Option<Vec<u8>>,
    pub dom_snapshot: Option<String>,
    pub log_lines: Vec<String>,
    /// Capture-degradation notes: an artifact that could not be gathered
    /// lands here as a warning instead of failing the capture.
    pub warnings: Vec<String>,
}

impl FailureArtifactBundle {
    pub fn new(test_id: impl Into<String>, log_lines: Vec<String>) -> Self {
        Self {
            test_id: test_id.into(),
            log_lines,
            ..Default::default()
        }
    }

    /// Minimal bundle for failures that never reached a live session.
    pub fn log_only(test_id: impl Into<String>, log_lines: Vec<String>) -> Self {
        Self::new(test_id, log_lines)
    }

    pub fn degrade(&mut self, artifact: &str, reason: impl std::fmt::Display) {
        self.warnings
            .push(format!("{} capture degraded: {}", artifact, reason));
    }
}

/// Terminal result of one test, rich enough to tell environment flakiness
/// from a genuine assertion failure without reading raw logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    pub test_id: String,
    pub status: TestStatus,
    pub attempts_used: u32,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub artifacts: Option<FailureArtifactBundle>,
}

impl TestOutcome {
    pub fn skipped(test_id: impl Into<String>) -> Self {
        Self {
            test_id: test_id.into(),
            status: TestStatus::Skipped,
            attempts_used: 0,
            duration_ms: 0,
            error: None,
            artifacts: None,
        }
    }
}
