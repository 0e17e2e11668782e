//! fantoccini-backed `Driver` implementation.

use async_trait::async_trait;
use fantoccini::elements::Element;
use fantoccini::{Client, Locator};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

use verity_common::error::DriverError;
use verity_common::locator::StrategyKind;
use verity_common::protocol::{ActionOutput, ElementAction, ElementHandle};
use verity_engine::driver::Driver;

use crate::launcher::DriverProcess;

/// Expand a strategy candidate into concrete CSS.
pub(crate) fn strategy_css(strategy: StrategyKind, value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    match strategy {
        StrategyKind::DataAttribute => format!("[data-testid=\"{}\"]", escaped),
        StrategyKind::Id => format!("[id=\"{}\"]", escaped),
        StrategyKind::AccessibilityRole => format!("[role=\"{}\"]", escaped),
        StrategyKind::CssSelector => value.to_string(),
    }
}

fn webdriver_key(key: &str) -> String {
    use fantoccini::key::Key;
    let mapped = match key {
        "Enter" => Some(Key::Enter),
        "Tab" => Some(Key::Tab),
        "Escape" => Some(Key::Escape),
        "Backspace" => Some(Key::Backspace),
        "Delete" => Some(Key::Delete),
        "Home" => Some(Key::Home),
        "End" => Some(Key::End),
        "PageUp" => Some(Key::PageUp),
        "PageDown" => Some(Key::PageDown),
        "ArrowUp" => Some(Key::Up),
        "ArrowDown" => Some(Key::Down),
        "ArrowLeft" => Some(Key::Left),
        "ArrowRight" => Some(Key::Right),
        _ => None,
    };
    match mapped {
        Some(k) => char::from(k).to_string(),
        None => key.to_string(),
    }
}

fn cmd_err(error: fantoccini::error::CmdError) -> DriverError {
    let text = error.to_string();
    if text.contains("connection") || text.contains("Connection") || text.contains("timed out") {
        DriverError::Network(text)
    } else {
        DriverError::Backend(text)
    }
}

pub struct WdDriver {
    client: Option<Client>,
    elements: HashMap<u64, Element>,
    next_element_id: u64,
    /// Grid video endpoint for this session, when the grid records one.
    video_source: Option<Url>,
    recording: bool,
    /// Local webdriver process; kept alive for the driver's lifetime.
    process: Option<DriverProcess>,
    http: reqwest::Client,
}

impl WdDriver {
    pub fn new(client: Client, process: Option<DriverProcess>, video_source: Option<Url>) -> Self {
        Self {
            client: Some(client),
            elements: HashMap::new(),
            next_element_id: 1,
            video_source,
            recording: false,
            process,
            http: reqwest::Client::new(),
        }
    }

    fn ready(&mut self) -> Result<&mut Client, DriverError> {
        self.client.as_mut().ok_or(DriverError::NotReady)
    }

    fn element(&self, handle: &ElementHandle) -> Result<Element, DriverError> {
        self.elements
            .get(&handle.id)
            .cloned()
            .ok_or_else(|| DriverError::Protocol(format!("unknown element handle {}", handle.id)))
    }

    /// Dispatch a DOM event on the element, for interactions the wire
    /// protocol has no first-class command for.
    async fn dispatch_event(
        &mut self,
        handle: &ElementHandle,
        script: &str,
    ) -> Result<(), DriverError> {
        let selector = handle.selector.clone();
        let client = self.ready()?;
        let wrapped = format!(
            r#"
            const el = document.querySelector(arguments[0]);
            if (!el) return false;
            {}
            return true;
            "#,
            script
        );
        let found = client
            .execute(&wrapped, vec![serde_json::Value::String(selector)])
            .await
            .map_err(cmd_err)?
            .as_bool()
            .unwrap_or(false);
        if found {
            Ok(())
        } else {
            Err(DriverError::Backend(format!(
                "element vanished before event dispatch: {}",
                handle.selector
            )))
        }
    }
}

#[async_trait]
impl Driver for WdDriver {
    async fn query(
        &mut self,
        strategy: StrategyKind,
        value: &str,
    ) -> Result<Vec<ElementHandle>, DriverError> {
        let css = strategy_css(strategy, value);
        let client = self.ready()?;
        let found = client
            .find_all(Locator::Css(&css))
            .await
            .map_err(cmd_err)?;

        let mut handles = Vec::with_capacity(found.len());
        for element in found {
            let id = self.next_element_id;
            self.next_element_id += 1;
            self.elements.insert(id, element);
            handles.push(ElementHandle {
                id,
                strategy,
                selector: css.clone(),
            });
        }
        Ok(handles)
    }

    async fn act(
        &mut self,
        target: &ElementHandle,
        action: &ElementAction,
    ) -> Result<ActionOutput, DriverError> {
        let element = self.element(target)?;
        debug!(action = action.name(), selector = %target.selector, "acting");

        match action {
            ElementAction::Click => {
                element.click().await.map_err(cmd_err)?;
                Ok(ActionOutput::Done)
            }
            ElementAction::DoubleClick => {
                self.dispatch_event(
                    target,
                    "el.dispatchEvent(new MouseEvent('dblclick', { bubbles: true }));",
                )
                .await?;
                Ok(ActionOutput::Done)
            }
            ElementAction::RightClick => {
                self.dispatch_event(
                    target,
                    "el.dispatchEvent(new MouseEvent('contextmenu', { bubbles: true }));",
                )
                .await?;
                Ok(ActionOutput::Done)
            }
            ElementAction::Hover => {
                self.dispatch_event(
                    target,
                    "el.dispatchEvent(new MouseEvent('mouseover', { bubbles: true }));\n\
                     el.dispatchEvent(new MouseEvent('mouseenter', { bubbles: true }));",
                )
                .await?;
                Ok(ActionOutput::Done)
            }
            ElementAction::Focus => {
                self.dispatch_event(target, "el.focus();").await?;
                Ok(ActionOutput::Done)
            }
            ElementAction::Fill { text } => {
                element.clear().await.map_err(cmd_err)?;
                element.send_keys(text).await.map_err(cmd_err)?;
                Ok(ActionOutput::Done)
            }
            ElementAction::Clear => {
                element.clear().await.map_err(cmd_err)?;
                Ok(ActionOutput::Done)
            }
            ElementAction::Press { key } => {
                element
                    .send_keys(&webdriver_key(key))
                    .await
                    .map_err(cmd_err)?;
                Ok(ActionOutput::Done)
            }
            ElementAction::SelectOption { value } => {
                element.select_by_value(value).await.map_err(cmd_err)?;
                Ok(ActionOutput::Done)
            }
            ElementAction::ReadText => {
                Ok(ActionOutput::Text(element.text().await.map_err(cmd_err)?))
            }
            ElementAction::ReadValue => {
                let value = element.prop("value").await.map_err(cmd_err)?;
                Ok(ActionOutput::Text(value.unwrap_or_default()))
            }
            ElementAction::ReadAttribute { name } => Ok(ActionOutput::Attribute(
                element.attr(name).await.map_err(cmd_err)?,
            )),
            ElementAction::IsVisible => Ok(ActionOutput::Flag(
                element.is_displayed().await.map_err(cmd_err)?,
            )),
            ElementAction::IsEnabled => Ok(ActionOutput::Flag(
                element.is_enabled().await.map_err(cmd_err)?,
            )),
            ElementAction::IsChecked => Ok(ActionOutput::Flag(
                element.is_selected().await.map_err(cmd_err)?,
            )),
        }
    }

    async fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        info!("navigating to {}", url);
        // Handles from the previous page are dead after navigation.
        self.elements.clear();
        let client = self.ready()?;
        client.goto(url).await.map_err(cmd_err)
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, DriverError> {
        let client = self.ready()?;
        client.screenshot().await.map_err(cmd_err)
    }

    async fn network_active_since(&mut self, since: Instant) -> Result<bool, DriverError> {
        let window_ms = Instant::now().saturating_duration_since(since).as_millis() as u64;
        let client = self.ready()?;
        let script = r#"
            const windowMs = arguments[0];
            const cutoff = performance.now() - windowMs;
            if (document.readyState === 'loading') return true;
            return performance
                .getEntriesByType('resource')
                .some((entry) => entry.startTime >= cutoff);
        "#;
        let active = client
            .execute(script, vec![serde_json::json!(window_ms)])
            .await
            .map_err(cmd_err)?
            .as_bool()
            .unwrap_or(true);
        Ok(active)
    }

    async fn animation_active_since(&mut self, _since: Instant) -> Result<bool, DriverError> {
        let client = self.ready()?;
        let script = r#"
            if (!document.getAnimations) return false;
            return document.getAnimations().some((a) => a.playState === 'running');
        "#;
        let active = client
            .execute(script, vec![])
            .await
            .map_err(cmd_err)?
            .as_bool()
            .unwrap_or(false);
        Ok(active)
    }

    async fn start_recording(&mut self) -> Result<(), DriverError> {
        match &self.video_source {
            // The grid records from session start; nothing to switch on.
            Some(_) => {
                self.recording = true;
                Ok(())
            }
            None => Err(DriverError::NotSupported(
                "video recording requires a grid session".into(),
            )),
        }
    }

    async fn stop_recording(&mut self) -> Result<Option<Vec<u8>>, DriverError> {
        if !self.recording {
            return Ok(None);
        }
        self.recording = false;

        let Some(source) = self.video_source.clone() else {
            return Ok(None);
        };

        // The grid finalizes the file asynchronously; give it a moment.
        let mut last_status = None;
        for _ in 0..3 {
            match self.http.get(source.clone()).send().await {
                Ok(response) if response.status().is_success() => {
                    let bytes = response
                        .bytes()
                        .await
                        .map_err(|e| DriverError::Network(e.to_string()))?;
                    return Ok(Some(bytes.to_vec()));
                }
                Ok(response) => last_status = Some(response.status()),
                Err(error) => return Err(DriverError::Network(error.to_string())),
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        warn!(?last_status, "video segment not retrievable");
        Ok(None)
    }

    async fn dom_snapshot(&mut self) -> Result<String, DriverError> {
        let client = self.ready()?;
        client.source().await.map_err(cmd_err)
    }

    async fn reset(&mut self) -> Result<(), DriverError> {
        self.elements.clear();
        let client = self.ready()?;
        client.delete_all_cookies().await.map_err(cmd_err)?;
        client
            .execute(
                "try { localStorage.clear(); sessionStorage.clear(); } catch (e) {}",
                vec![],
            )
            .await
            .map_err(cmd_err)?;
        client.goto("about:blank").await.map_err(cmd_err)
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        self.elements.clear();
        if let Some(client) = self.client.take() {
            client.close().await.map_err(cmd_err)?;
        }
        // Dropping the process handle shuts the local webdriver down.
        self.process = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_css_expansion() {
        assert_eq!(
            strategy_css(StrategyKind::DataAttribute, "login-button"),
            "[data-testid=\"login-button\"]"
        );
        assert_eq!(strategy_css(StrategyKind::Id, "main"), "[id=\"main\"]");
        assert_eq!(
            strategy_css(StrategyKind::AccessibilityRole, "button"),
            "[role=\"button\"]"
        );
        assert_eq!(
            strategy_css(StrategyKind::CssSelector, "form > input"),
            "form > input"
        );
    }

    #[test]
    fn strategy_css_escapes_quotes() {
        assert_eq!(
            strategy_css(StrategyKind::DataAttribute, "say-\"hi\""),
            "[data-testid=\"say-\\\"hi\\\"\"]"
        );
    }

    #[test]
    fn named_keys_map_to_webdriver_codes() {
        assert_eq!(webdriver_key("Enter"), '\u{e007}'.to_string());
        assert_eq!(webdriver_key("Tab"), '\u{e004}'.to_string());
        assert_eq!(webdriver_key("x"), "x");
    }
}
