//! Chromium-backed implementation of the automation boundary.
//!
//! One shared browser context (authenticated via the opaque session-state
//! blob) hosts every session; each [`SessionId`] maps to an isolated page.
//! Popups are observed by snapshotting the open page targets before a click
//! and polling for a new target afterwards.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::cdp::browser_protocol::target::TargetId;
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{DriverError, ElementId, PageDriver, SessionId};
use crate::config::Config;

/// Poll interval for element and popup waits.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Authenticated session state captured by the login bootstrap. Only the
/// cookie list is consumed; everything else in the blob is ignored as-is.
#[derive(Debug, Deserialize)]
struct StorageState {
    #[serde(default)]
    cookies: Vec<serde_json::Value>,
}

/// One blob cookie in the shape the bootstrap writes.
#[derive(Debug, Clone, Deserialize)]
struct BlobCookie {
    name: String,
    value: String,
    #[serde(default)]
    domain: String,
    #[serde(default)]
    path: Option<String>,
}

/// Production [`PageDriver`] over a headless Chromium instance.
pub struct ChromiumDriver {
    browser: Browser,
    pages: Mutex<HashMap<u64, Page>>,
    elements: Mutex<HashMap<u64, Element>>,
    next_id: AtomicU64,
    cookies: Vec<BlobCookie>,
    http: reqwest::Client,
}

impl ChromiumDriver {
    /// Launches the browser and prepares the shared authenticated context
    /// from the session-state blob.
    ///
    /// # Errors
    ///
    /// [`DriverError::Backend`] when the blob is unreadable or the browser
    /// cannot start.
    pub async fn launch(config: &Config) -> Result<Self, DriverError> {
        let blob = std::fs::read(&config.storage_state_path).map_err(|error| {
            DriverError::Backend(format!(
                "cannot read session-state blob '{}': {error}",
                config.storage_state_path.display()
            ))
        })?;
        let state: StorageState = serde_json::from_slice(&blob).map_err(|error| {
            DriverError::Backend(format!("malformed session-state blob: {error}"))
        })?;
        let cookies: Vec<BlobCookie> = state
            .cookies
            .into_iter()
            .filter_map(|value| serde_json::from_value(value).ok())
            .collect();
        info!(cookies = cookies.len(), "loaded session state");

        let mut builder = BrowserConfig::builder()
            .window_size(1280, 720)
            .args(vec![
                "--disable-blink-features=AutomationControlled",
                "--no-sandbox",
                "--disable-dev-shm-usage",
                "--disable-gpu",
            ]);
        if !config.headless {
            builder = builder.with_head();
        }
        let browser_config = builder.build().map_err(DriverError::Backend)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|error| DriverError::Backend(error.to_string()))?;

        // The handler drives the CDP connection; it runs for the lifetime
        // of the process.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let http = reqwest::Client::builder()
            .build()
            .map_err(|error| DriverError::Backend(error.to_string()))?;

        Ok(Self {
            browser,
            pages: Mutex::new(HashMap::new()),
            elements: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            cookies,
            http,
        })
    }

    fn allocate(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Converts blob cookies into CDP cookie parameters.
    fn cookie_params(&self) -> Vec<CookieParam> {
        self.cookies
            .iter()
            .filter_map(|cookie| {
                CookieParam::builder()
                    .name(cookie.name.clone())
                    .value(cookie.value.clone())
                    .domain(cookie.domain.clone())
                    .path(cookie.path.clone().unwrap_or_else(|| "/".to_string()))
                    .build()
                    .ok()
            })
            .collect()
    }

    /// Cookie header for plain HTTP fetches against `url`, assembled from
    /// blob cookies whose domain marker appears in the address (substring
    /// convention, consistent with the rest of the crate).
    fn cookie_header_for(&self, url: &str) -> Option<String> {
        let pairs: Vec<String> = self
            .cookies
            .iter()
            .filter(|cookie| {
                let domain = cookie.domain.trim_start_matches('.');
                !domain.is_empty() && url.contains(domain)
            })
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect();
        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }

    async fn page(&self, session: SessionId) -> Result<Page, DriverError> {
        self.pages
            .lock()
            .await
            .get(&session.0)
            .cloned()
            .ok_or(DriverError::SessionClosed(session))
    }

    async fn register_page(&self, page: Page) -> SessionId {
        let id = self.allocate();
        self.pages.lock().await.insert(id, page);
        SessionId(id)
    }

    /// Snapshot of the currently open page targets.
    async fn target_snapshot(&self) -> Result<HashSet<TargetId>, DriverError> {
        let pages = self
            .browser
            .pages()
            .await
            .map_err(|error| DriverError::Backend(error.to_string()))?;
        Ok(pages.iter().map(|page| page.target_id().clone()).collect())
    }

    /// Waits for a page target not present in `known` to appear.
    async fn await_new_target(
        &self,
        known: &HashSet<TargetId>,
        session: SessionId,
        timeout: Duration,
    ) -> Result<SessionId, DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            let pages = self
                .browser
                .pages()
                .await
                .map_err(|error| DriverError::Backend(error.to_string()))?;
            if let Some(page) = pages
                .into_iter()
                .find(|page| !known.contains(page.target_id()))
            {
                // Give the popup a moment to commit its navigation.
                let _ = page.wait_for_navigation().await;
                return Ok(self.register_page(page).await);
            }
            if Instant::now() >= deadline {
                return Err(DriverError::PopupTimeout { session, timeout });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl PageDriver for ChromiumDriver {
    async fn open_page(&self, url: &str) -> Result<SessionId, DriverError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|error| DriverError::Backend(error.to_string()))?;

        // Cookies must be in place before the first authenticated request.
        let params = self.cookie_params();
        if !params.is_empty() {
            page.set_cookies(params)
                .await
                .map_err(|error| DriverError::Backend(error.to_string()))?;
        }

        page.goto(url)
            .await
            .map_err(|error| DriverError::Backend(error.to_string()))?;
        let _ = page.wait_for_navigation().await;

        let session = self.register_page(page).await;
        debug!(%session, url, "opened page");
        Ok(session)
    }

    async fn click_and_await_popup(
        &self,
        session: SessionId,
        selector: &str,
        timeout: Duration,
    ) -> Result<SessionId, DriverError> {
        let page = self.page(session).await?;
        let known = self.target_snapshot().await?;

        let element = page
            .find_element(selector)
            .await
            .map_err(|_| DriverError::WaitTimeout {
                selector: selector.to_string(),
                timeout,
            })?;
        element
            .click()
            .await
            .map_err(|error| DriverError::Backend(error.to_string()))?;

        self.await_new_target(&known, session, timeout).await
    }

    async fn click_element_and_await_popup(
        &self,
        session: SessionId,
        element: ElementId,
        timeout: Duration,
    ) -> Result<SessionId, DriverError> {
        let known = self.target_snapshot().await?;
        {
            let elements = self.elements.lock().await;
            let handle = elements
                .get(&element.0)
                .ok_or(DriverError::StaleElement(element))?;
            handle
                .click()
                .await
                .map_err(|error| DriverError::Backend(error.to_string()))?;
        }
        self.await_new_target(&known, session, timeout).await
    }

    async fn wait_for_element(
        &self,
        session: SessionId,
        selector: &str,
        timeout: Duration,
    ) -> Result<Option<ElementId>, DriverError> {
        let page = self.page(session).await?;
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(element) = page.find_element(selector).await {
                let id = self.allocate();
                self.elements.lock().await.insert(id, element);
                return Ok(Some(ElementId(id)));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn read_attribute(
        &self,
        element: ElementId,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        let elements = self.elements.lock().await;
        let handle = elements
            .get(&element.0)
            .ok_or(DriverError::StaleElement(element))?;
        handle
            .attribute(name)
            .await
            .map_err(|error| DriverError::Backend(error.to_string()))
    }

    async fn locate_all(
        &self,
        session: SessionId,
        selector: &str,
    ) -> Result<Vec<ElementId>, DriverError> {
        let page = self.page(session).await?;
        let found = page
            .find_elements(selector)
            .await
            .map_err(|error| DriverError::Backend(error.to_string()))?;

        let mut elements = self.elements.lock().await;
        let mut ids = Vec::with_capacity(found.len());
        for element in found {
            let id = self.allocate();
            elements.insert(id, element);
            ids.push(ElementId(id));
        }
        Ok(ids)
    }

    async fn current_url(&self, session: SessionId) -> Result<String, DriverError> {
        let page = self.page(session).await?;
        let url = page
            .url()
            .await
            .map_err(|error| DriverError::Backend(error.to_string()))?;
        url.ok_or_else(|| DriverError::Backend(format!("{session} has no address")))
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, DriverError> {
        let mut request = self.http.get(url);
        if let Some(header) = self.cookie_header_for(url) {
            request = request.header(reqwest::header::COOKIE, header);
        }
        let response = request.send().await.map_err(|error| DriverError::Fetch {
            url: url.to_string(),
            message: error.to_string(),
        })?;
        if !response.status().is_success() {
            return Err(DriverError::Fetch {
                url: url.to_string(),
                message: format!("status {}", response.status()),
            });
        }
        let bytes = response.bytes().await.map_err(|error| DriverError::Fetch {
            url: url.to_string(),
            message: error.to_string(),
        })?;
        Ok(bytes.to_vec())
    }

    async fn close(&self, session: SessionId) -> Result<(), DriverError> {
        let page = self.pages.lock().await.remove(&session.0);
        if let Some(page) = page {
            if let Err(error) = page.close().await {
                warn!(%session, %error, "page close reported an error");
            }
            debug!(%session, "closed page");
        }
        Ok(())
    }
}

impl std::fmt::Debug for ChromiumDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChromiumDriver")
            .field("cookies", &self.cookies.len())
            .finish_non_exhaustive()
    }
}
