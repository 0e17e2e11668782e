//! Local webdriver process management and grid session connection.

use async_trait::async_trait;
use fantoccini::ClientBuilder;
use serde_json::{Map, Value, json};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};
use url::Url;

use verity_common::error::ProvisionError;
use verity_common::protocol::{BrowserType, SessionRequest};
use verity_engine::driver::{ContainerHandle, Driver, DriverLauncher};

use crate::driver::WdDriver;

const PORT_BASE: u16 = 9515;
static NEXT_PORT: AtomicU16 = AtomicU16::new(0);

const CHROMEDRIVER_PATHS: &[&str] = &["/usr/bin/chromedriver", "/usr/local/bin/chromedriver"];
const GECKODRIVER_PATHS: &[&str] = &["/usr/bin/geckodriver", "/usr/local/bin/geckodriver"];
const EDGEDRIVER_PATHS: &[&str] = &["/usr/bin/msedgedriver", "/usr/local/bin/msedgedriver"];
const SAFARIDRIVER_PATHS: &[&str] = &["/usr/bin/safaridriver"];

fn driver_binary(browser: BrowserType) -> (&'static str, &'static [&'static str]) {
    match browser {
        BrowserType::Chromium => ("chromedriver", CHROMEDRIVER_PATHS),
        BrowserType::Firefox => ("geckodriver", GECKODRIVER_PATHS),
        BrowserType::Edge => ("msedgedriver", EDGEDRIVER_PATHS),
        BrowserType::Webkit => ("safaridriver", SAFARIDRIVER_PATHS),
    }
}

/// Find a webdriver binary on the system: PATH first, then common paths.
fn find_binary(name: &str, known_paths: &[&str]) -> Option<String> {
    if let Ok(output) = Command::new("which").arg(name).output()
        && output.status.success()
        && let Ok(path) = String::from_utf8(output.stdout)
    {
        let path = path.trim();
        if !path.is_empty() {
            return Some(path.to_string());
        }
    }

    for path in known_paths {
        if std::path::Path::new(path).exists() {
            return Some(path.to_string());
        }
    }

    None
}

/// Handle to a running local webdriver process.
pub struct DriverProcess {
    child: Child,
    port: u16,
}

impl DriverProcess {
    pub fn endpoint(&self) -> String {
        format!("http://localhost:{}", self.port)
    }
}

impl Drop for DriverProcess {
    fn drop(&mut self) {
        info!(port = self.port, "shutting down webdriver process");
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

async fn spawn_driver(binary: &str, port: u16) -> Result<DriverProcess, ProvisionError> {
    info!(binary, port, "launching webdriver");
    let child = Command::new(binary)
        .arg(format!("--port={}", port))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| ProvisionError::Launch(format!("failed to spawn {}: {}", binary, e)))?;

    let process = DriverProcess { child, port };
    let status_url = format!("{}/status", process.endpoint());
    let http = reqwest::Client::new();

    for attempt in 1..=30 {
        sleep(Duration::from_millis(200)).await;
        match http.get(&status_url).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!(attempt, "webdriver ready");
                return Ok(process);
            }
            Ok(_) => warn!(attempt, "webdriver responded but not ready yet"),
            Err(_) => {}
        }
    }

    Err(ProvisionError::Launch(format!(
        "{} did not become ready on port {}",
        binary, port
    )))
}

/// Grid browser names follow the Selenoid convention.
fn grid_browser_name(browser: BrowserType) -> &'static str {
    match browser {
        BrowserType::Chromium => "chrome",
        BrowserType::Firefox => "firefox",
        BrowserType::Edge => "MicrosoftEdge",
        // The provisioner remaps webkit before a grid dispatch; this arm
        // only fires if a caller bypasses it.
        BrowserType::Webkit => "chrome",
    }
}

fn local_capabilities(request: &SessionRequest, headless: bool) -> Map<String, Value> {
    let mut caps = Map::new();
    let mut args: Vec<String> = Vec::new();

    match request.browser {
        BrowserType::Chromium | BrowserType::Edge => {
            if headless {
                args.push("--headless=new".into());
            }
            if let Some((width, height)) = request.resolution.viewport() {
                args.push(format!("--window-size={},{}", width, height));
            }
            caps.insert("goog:chromeOptions".into(), json!({ "args": args }));
        }
        BrowserType::Firefox => {
            if headless {
                args.push("-headless".into());
            }
            if let Some((width, height)) = request.resolution.viewport() {
                args.push("-width".into());
                args.push(width.to_string());
                args.push("-height".into());
                args.push(height.to_string());
            }
            caps.insert("moz:firefoxOptions".into(), json!({ "args": args }));
        }
        BrowserType::Webkit => {}
    }

    caps
}

fn grid_capabilities(request: &SessionRequest, record_video: bool) -> Map<String, Value> {
    let mut caps = Map::new();
    caps.insert(
        "browserName".into(),
        json!(grid_browser_name(request.browser)),
    );
    if request.browser_version != "latest" {
        caps.insert("browserVersion".into(), json!(request.browser_version));
    }

    let mut selenoid = Map::new();
    selenoid.insert("enableVideo".into(), json!(record_video));
    if let Some((width, height)) = request.resolution.viewport() {
        selenoid.insert(
            "screenResolution".into(),
            json!(format!("{}x{}x24", width, height)),
        );
    }
    caps.insert("selenoid:options".into(), Value::Object(selenoid));

    caps
}

/// Launches local browsers and connects to grid containers.
pub struct WdLauncher {
    headless: bool,
    record_video: bool,
}

impl WdLauncher {
    pub fn new(headless: bool, record_video: bool) -> Self {
        Self {
            headless,
            record_video,
        }
    }
}

#[async_trait]
impl DriverLauncher for WdLauncher {
    async fn launch(&self, request: &SessionRequest) -> Result<Box<dyn Driver>, ProvisionError> {
        let (name, known_paths) = driver_binary(request.browser);
        let binary = find_binary(name, known_paths).ok_or_else(|| {
            ProvisionError::Launch(format!("no {} found for {}", name, request.browser))
        })?;

        let port = PORT_BASE + NEXT_PORT.fetch_add(1, Ordering::SeqCst);
        let process = spawn_driver(&binary, port).await?;

        let client = ClientBuilder::native()
            .capabilities(local_capabilities(request, self.headless))
            .connect(&process.endpoint())
            .await
            .map_err(|e| {
                ProvisionError::Launch(format!("webdriver session refused: {}", e))
            })?;

        Ok(Box::new(WdDriver::new(client, Some(process), None)))
    }

    async fn connect(
        &self,
        container: &ContainerHandle,
        request: &SessionRequest,
    ) -> Result<Box<dyn Driver>, ProvisionError> {
        info!(
            container = %container.id,
            endpoint = %container.endpoint,
            browser = %request.browser,
            "connecting to grid container"
        );

        let client = ClientBuilder::native()
            .capabilities(grid_capabilities(request, self.record_video))
            .connect(container.endpoint.as_str())
            .await
            .map_err(|e| ProvisionError::Rejected(format!("grid session refused: {}", e)))?;

        let video_source = if self.record_video {
            match client.session_id().await {
                Ok(Some(session_id)) => video_url(&container.endpoint, &session_id),
                _ => None,
            }
        } else {
            None
        };

        Ok(Box::new(WdDriver::new(client, None, video_source)))
    }
}

/// Selenoid serves recorded sessions under `/video/<session>.mp4` on the
/// grid root, next to the `/wd/hub` prefix.
fn video_url(hub: &Url, session_id: &str) -> Option<Url> {
    let root = hub.as_str().trim_end_matches('/').trim_end_matches("/wd/hub");
    Url::parse(&format!("{}/video/{}.mp4", root, session_id)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use verity_common::protocol::Resolution;

    fn request(browser: BrowserType) -> SessionRequest {
        SessionRequest {
            browser,
            browser_version: "latest".into(),
            resolution: Resolution::Fhd,
            grid_endpoint: None,
        }
    }

    #[test]
    fn chromium_local_capabilities_carry_window_size() {
        let caps = local_capabilities(&request(BrowserType::Chromium), true);
        let args = caps["goog:chromeOptions"]["args"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect::<Vec<_>>();
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--window-size=1920,1080".to_string()));
    }

    #[test]
    fn grid_capabilities_use_selenoid_names() {
        let mut req = request(BrowserType::Chromium);
        req.browser_version = "119.0".into();
        let caps = grid_capabilities(&req, true);
        assert_eq!(caps["browserName"], "chrome");
        assert_eq!(caps["browserVersion"], "119.0");
        assert_eq!(caps["selenoid:options"]["enableVideo"], true);
        assert_eq!(
            caps["selenoid:options"]["screenResolution"],
            "1920x1080x24"
        );
    }

    #[test]
    fn latest_version_is_left_to_the_grid() {
        let caps = grid_capabilities(&request(BrowserType::Firefox), false);
        assert_eq!(caps["browserName"], "firefox");
        assert!(!caps.contains_key("browserVersion"));
    }

    #[test]
    fn video_url_strips_hub_suffix() {
        let hub = Url::parse("http://selenoid:4444/wd/hub").unwrap();
        assert_eq!(
            video_url(&hub, "abc123").unwrap().as_str(),
            "http://selenoid:4444/video/abc123.mp4"
        );
    }

    #[test]
    fn fullscreen_resolution_omits_screen_caps() {
        let mut req = request(BrowserType::Chromium);
        req.resolution = Resolution::Fullscreen;
        let caps = grid_capabilities(&req, false);
        assert!(
            !caps["selenoid:options"]
                .as_object()
                .unwrap()
                .contains_key("screenResolution")
        );
    }
}
