//! Chromium-based automation driver.
//!
//! Uses chromiumoxide (CDP) with stealth-oriented launch arguments so the
//! sessions look as little like automation as headless Chrome can.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::info;

use super::error::ScrapeError;
use super::page::{AutomationDriver, AutomationPage};
use crate::config::AutomationSettings;

/// Common Chrome executable paths to check.
const CHROME_PATHS: &[&str] = &[
    // Linux
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    // macOS
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    // Common install locations
    "/opt/google/chrome/google-chrome",
];

/// Browser-backed driver. One shared browser, one page per session.
pub struct BrowserDriver {
    browser: Arc<Mutex<Browser>>,
    page_timeout: Duration,
}

impl BrowserDriver {
    /// Launch a local browser, or connect to a remote one when
    /// `remote_url` is configured.
    pub async fn launch(settings: &AutomationSettings) -> Result<Self, ScrapeError> {
        let page_timeout = Duration::from_secs(settings.page_timeout_secs);

        if let Some(ref remote_url) = settings.remote_url {
            let browser = Self::connect_remote(remote_url).await?;
            return Ok(Self {
                browser: Arc::new(Mutex::new(browser)),
                page_timeout,
            });
        }

        info!("Launching browser (headless={})", settings.headless);

        let chrome_path = find_chrome()?;
        let mut builder = BrowserConfig::builder().chrome_executable(chrome_path);

        // with_head means NOT headless, confusingly
        if !settings.headless {
            builder = builder.with_head();
        }

        if let Some(ref proxy) = settings.proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }

        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--disable-sync")
            .arg("--disable-translate")
            .arg("--metrics-recording-only")
            .arg("--safebrowsing-disable-auto-update")
            .arg("--no-sandbox") // Often needed for headless in containers
            .arg("--disable-gpu")
            .arg("--disable-software-rasterizer");

        for arg in &settings.chrome_args {
            builder = builder.arg(arg);
        }

        let config = builder
            .build()
            .map_err(|e| ScrapeError::Transient(format!("browser config: {}", e)))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ScrapeError::Transient(format!("browser launch: {}", e)))?;

        tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(Mutex::new(browser)),
            page_timeout,
        })
    }

    /// Connect to a remote Chrome instance via its DevTools endpoint.
    async fn connect_remote(url: &str) -> Result<Browser, ScrapeError> {
        info!("Connecting to remote browser at {}", url);

        let http_url = url
            .replace("ws://", "http://")
            .replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let client = reqwest::Client::new();
        let resp: serde_json::Value = client
            .get(&version_url)
            .send()
            .await
            .map_err(|e| ScrapeError::Transient(format!("remote browser: {}", e)))?
            .json()
            .await
            .map_err(|e| ScrapeError::Transient(format!("remote browser version: {}", e)))?;

        let ws_url = resp
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ScrapeError::Transient("no webSocketDebuggerUrl in response".to_string())
            })?;

        let (browser, mut handler) = Browser::connect(ws_url)
            .await
            .map_err(|e| ScrapeError::Transient(format!("remote browser connect: {}", e)))?;

        tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        Ok(browser)
    }
}

#[async_trait]
impl AutomationDriver for BrowserDriver {
    async fn new_page(&self) -> Result<Box<dyn AutomationPage>, ScrapeError> {
        let browser = self.browser.lock().await;
        let page = tokio::time::timeout(self.page_timeout, browser.new_page("about:blank"))
            .await
            .map_err(|_| ScrapeError::Transient("new page timed out".to_string()))?
            .map_err(|e| ScrapeError::Transient(format!("new page: {}", e)))?;

        Ok(Box::new(BrowserPage {
            page,
            timeout: self.page_timeout,
        }))
    }
}

/// One chromiumoxide page behind the [`AutomationPage`] trait.
pub struct BrowserPage {
    page: Page,
    timeout: Duration,
}

impl BrowserPage {
    async fn bounded<T, F>(&self, what: &str, fut: F) -> Result<T, ScrapeError>
    where
        F: std::future::Future<Output = chromiumoxide::error::Result<T>> + Send,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| ScrapeError::Transient(format!("{} timed out", what)))?
            .map_err(|e| ScrapeError::Transient(format!("{}: {}", what, e)))
    }
}

#[async_trait]
impl AutomationPage for BrowserPage {
    async fn goto(&mut self, url: &str) -> Result<(), ScrapeError> {
        self.bounded("navigation", async {
            self.page.goto(url).await?;
            self.page.wait_for_navigation().await?;
            Ok(())
        })
        .await
    }

    async fn content(&mut self) -> Result<String, ScrapeError> {
        self.bounded("content", self.page.content()).await
    }

    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), ScrapeError> {
        let element = tokio::time::timeout(self.timeout, self.page.find_element(selector))
            .await
            .map_err(|_| ScrapeError::Transient("find element timed out".to_string()))?
            .map_err(|_| ScrapeError::Parse(format!("element not found: {}", selector)))?;

        self.bounded("fill", async {
            element.click().await?;
            element.type_str(value).await?;
            Ok(())
        })
        .await
    }

    async fn click(&mut self, selector: &str) -> Result<(), ScrapeError> {
        let element = tokio::time::timeout(self.timeout, self.page.find_element(selector))
            .await
            .map_err(|_| ScrapeError::Transient("find element timed out".to_string()))?
            .map_err(|_| ScrapeError::Parse(format!("element not found: {}", selector)))?;

        self.bounded("click", async {
            element.click().await?;
            self.page.wait_for_navigation().await?;
            Ok(())
        })
        .await
    }

    async fn current_url(&mut self) -> Result<String, ScrapeError> {
        let url = self.bounded("url", self.page.url()).await?;
        url.ok_or_else(|| ScrapeError::Transient("page has no url".to_string()))
    }

    async fn close(&mut self) {
        let _ = self.page.clone().close().await;
    }
}

/// Find a local Chrome executable.
fn find_chrome() -> Result<std::path::PathBuf, ScrapeError> {
    for path in CHROME_PATHS {
        let p = std::path::Path::new(path);
        if p.exists() {
            info!("Found Chrome at: {}", path);
            return Ok(p.to_path_buf());
        }
    }

    for cmd in &[
        "google-chrome",
        "google-chrome-stable",
        "chromium",
        "chromium-browser",
    ] {
        if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    info!("Found Chrome in PATH: {}", path);
                    return Ok(std::path::PathBuf::from(path));
                }
            }
        }
    }

    Err(ScrapeError::Transient(
        "Chrome/Chromium not found; install it or set automation.remote_url".to_string(),
    ))
}
