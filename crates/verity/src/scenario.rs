//! YAML scenario files: the CLI's way of feeding tests to the engine.
//!
//! A scenario file is a list of named tests, each a sequence of steps
//! interpreted through the engine's `TestContext`.

use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use verity_common::error::TestError;
use verity_common::locator::{LocatorSpec, StrategyKind};
use verity_engine::context::TestContext;
use verity_engine::orchestrator::TestCase;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to read scenario file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse scenario file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("test '{test}', step {step}: target needs at least one of testid, id, role, css")]
    EmptyTarget { test: String, step: usize },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioFile {
    pub tests: Vec<ScenarioTest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioTest {
    pub name: String,
    #[serde(default)]
    pub skip: bool,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// A logical target; present fields become locator candidates in
/// priority order (testid, id, role, css).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetSpec {
    pub testid: Option<String>,
    pub id: Option<String>,
    pub role: Option<String>,
    pub css: Option<String>,
}

impl TargetSpec {
    pub fn to_locator(&self) -> Option<LocatorSpec> {
        let mut strategies = Vec::new();
        if let Some(v) = &self.testid {
            strategies.push((StrategyKind::DataAttribute, v.clone()));
        }
        if let Some(v) = &self.id {
            strategies.push((StrategyKind::Id, v.clone()));
        }
        if let Some(v) = &self.role {
            strategies.push((StrategyKind::AccessibilityRole, v.clone()));
        }
        if let Some(v) = &self.css {
            strategies.push((StrategyKind::CssSelector, v.clone()));
        }
        LocatorSpec::new(strategies).ok()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Navigate { path: String },
    Click { target: TargetSpec },
    DoubleClick { target: TargetSpec },
    Fill { target: TargetSpec, text: String },
    Clear { target: TargetSpec },
    Press { target: TargetSpec, key: String },
    Hover { target: TargetSpec },
    SelectOption { target: TargetSpec, value: String },
    WaitNetworkIdle,
    WaitAnimationsSettled,
    WaitVisible { target: TargetSpec },
    WaitHidden { target: TargetSpec },
    ExpectVisible { target: TargetSpec },
    ExpectHidden { target: TargetSpec },
    ExpectText { target: TargetSpec, text: String },
    ExpectValue { target: TargetSpec, value: String },
    ExpectAttribute { target: TargetSpec, name: String, value: String },
    ExpectCount { target: TargetSpec, count: usize },
}

impl Step {
    fn target(&self) -> Option<&TargetSpec> {
        match self {
            Step::Navigate { .. } | Step::WaitNetworkIdle | Step::WaitAnimationsSettled => None,
            Step::Click { target }
            | Step::DoubleClick { target }
            | Step::Fill { target, .. }
            | Step::Clear { target }
            | Step::Press { target, .. }
            | Step::Hover { target }
            | Step::SelectOption { target, .. }
            | Step::WaitVisible { target }
            | Step::WaitHidden { target }
            | Step::ExpectVisible { target }
            | Step::ExpectHidden { target }
            | Step::ExpectText { target, .. }
            | Step::ExpectValue { target, .. }
            | Step::ExpectAttribute { target, .. }
            | Step::ExpectCount { target, .. } => Some(target),
        }
    }
}

/// Load a scenario file and compile its tests into schedulable cases.
pub fn load_scenarios(path: &Path) -> Result<Vec<TestCase>, ScenarioError> {
    let content = std::fs::read_to_string(path)?;
    let file: ScenarioFile = serde_yaml::from_str(&content)?;

    // Validate targets up front so a typo fails the load, not the run.
    for test in &file.tests {
        for (index, step) in test.steps.iter().enumerate() {
            if let Some(target) = step.target()
                && target.to_locator().is_none()
            {
                return Err(ScenarioError::EmptyTarget {
                    test: test.name.clone(),
                    step: index + 1,
                });
            }
        }
    }

    Ok(file.tests.into_iter().map(compile).collect())
}

fn compile(test: ScenarioTest) -> TestCase {
    if test.skip {
        return TestCase::skipped(test.name);
    }

    let steps = Arc::new(test.steps);
    TestCase::new(test.name, move |ctx| {
        let steps = Arc::clone(&steps);
        Box::pin(async move {
            for step in steps.iter() {
                run_step(ctx, step).await?;
            }
            Ok(())
        })
    })
}

fn locator(target: &TargetSpec) -> Result<LocatorSpec, TestError> {
    target
        .to_locator()
        .ok_or_else(|| TestError::Assertion("scenario target has no strategies".into()))
}

async fn run_step(ctx: &mut TestContext, step: &Step) -> Result<(), TestError> {
    match step {
        Step::Navigate { path } => ctx.navigate(path).await,
        Step::Click { target } => ctx.click(&locator(target)?).await,
        Step::DoubleClick { target } => ctx.double_click(&locator(target)?).await,
        Step::Fill { target, text } => ctx.fill(&locator(target)?, text.clone()).await,
        Step::Clear { target } => ctx.clear(&locator(target)?).await,
        Step::Press { target, key } => ctx.press(&locator(target)?, key.clone()).await,
        Step::Hover { target } => ctx.hover(&locator(target)?).await,
        Step::SelectOption { target, value } => {
            ctx.select_option(&locator(target)?, value.clone()).await
        }
        Step::WaitNetworkIdle => ctx.wait_until_loaded().await,
        Step::WaitAnimationsSettled => ctx.wait_animations_settled().await,
        Step::WaitVisible { target } => ctx.wait_visible(&locator(target)?).await,
        Step::WaitHidden { target } => ctx.wait_hidden(&locator(target)?).await,
        Step::ExpectVisible { target } => ctx.expect_visible(&locator(target)?).await,
        Step::ExpectHidden { target } => ctx.expect_hidden(&locator(target)?).await,
        Step::ExpectText { target, text } => ctx.expect_text(&locator(target)?, text).await,
        Step::ExpectValue { target, value } => ctx.expect_value(&locator(target)?, value).await,
        Step::ExpectAttribute {
            target,
            name,
            value,
        } => ctx.expect_attribute(&locator(target)?, name, value).await,
        Step::ExpectCount { target, count } => ctx.expect_count(&locator(target)?, *count).await,
    }
}
