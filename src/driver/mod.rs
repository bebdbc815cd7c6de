//! Narrow boundary over the page-automation environment.
//!
//! The resolution engine never depends on a concrete browser library; it
//! drives everything through the [`PageDriver`] trait using opaque
//! [`SessionId`] / [`ElementId`] handles. A session is one isolated browsing
//! context (a page or tab); a popup is a secondary session opened as a side
//! effect of interacting with another session.
//!
//! [`SessionGuard`] ties every opened session to a guaranteed best-effort
//! close on every exit path (normal, error, or interrupt).
//!
//! # Object Safety
//!
//! The trait uses `async_trait` to support dynamic dispatch via
//! `Arc<dyn PageDriver>`. Rust 2024 native async traits are not object-safe,
//! so `async_trait` is required for this seam.

#[cfg(feature = "browser")]
pub mod chromium;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

/// Opaque handle to one isolated automation session (page/tab).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Opaque handle to a located element within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(pub u64);

/// Error type for automation-environment operations.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// A bounded element wait elapsed without the element appearing.
    #[error("timed out after {timeout:?} waiting for element '{selector}'")]
    WaitTimeout {
        /// The selector that never matched.
        selector: String,
        /// The bounded wait that elapsed.
        timeout: Duration,
    },

    /// A click did not produce the expected popup within the bounded wait.
    #[error("timed out after {timeout:?} waiting for a popup from {session}")]
    PopupTimeout {
        /// The session whose click should have opened a popup.
        session: SessionId,
        /// The bounded wait that elapsed.
        timeout: Duration,
    },

    /// The referenced session is no longer open.
    #[error("{0} is closed or unknown")]
    SessionClosed(SessionId),

    /// The referenced element handle is no longer valid.
    #[error("stale element handle {0:?}")]
    StaleElement(ElementId),

    /// A network fetch of resource bytes failed.
    #[error("failed to fetch bytes from '{url}': {message}")]
    Fetch {
        /// The resource address.
        url: String,
        /// Backend-reported failure detail.
        message: String,
    },

    /// Any other backend failure (navigation, click, protocol).
    #[error("automation backend error: {0}")]
    Backend(String),
}

impl DriverError {
    /// Returns true for bounded-wait expiries, the transient class eligible
    /// for whole-article retry.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::WaitTimeout { .. } | Self::PopupTimeout { .. })
    }
}

/// Capability set the resolution engine consumes from the automation
/// environment. Implementations must be safe to share across concurrent
/// tasks; each task opens its own isolated sessions and never shares a
/// session with another task.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Opens a new isolated session navigated to `url`.
    async fn open_page(&self, url: &str) -> Result<SessionId, DriverError>;

    /// Clicks the first element matching `selector` and waits up to
    /// `timeout` for the resulting popup session.
    async fn click_and_await_popup(
        &self,
        session: SessionId,
        selector: &str,
        timeout: Duration,
    ) -> Result<SessionId, DriverError>;

    /// Clicks a previously located element and waits up to `timeout` for
    /// the resulting popup session.
    async fn click_element_and_await_popup(
        &self,
        session: SessionId,
        element: ElementId,
        timeout: Duration,
    ) -> Result<SessionId, DriverError>;

    /// Waits up to `timeout` for an element matching `selector`. Absence is
    /// not an error: `Ok(None)` means the wait elapsed cleanly.
    async fn wait_for_element(
        &self,
        session: SessionId,
        selector: &str,
        timeout: Duration,
    ) -> Result<Option<ElementId>, DriverError>;

    /// Reads an attribute from a located element.
    async fn read_attribute(
        &self,
        element: ElementId,
        name: &str,
    ) -> Result<Option<String>, DriverError>;

    /// Locates all elements currently matching `selector` (zero or more).
    async fn locate_all(
        &self,
        session: SessionId,
        selector: &str,
    ) -> Result<Vec<ElementId>, DriverError>;

    /// Returns the session's current address.
    async fn current_url(&self, session: SessionId) -> Result<String, DriverError>;

    /// Fetches raw resource bytes through the shared automation context
    /// (so authenticated cookies apply).
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, DriverError>;

    /// Closes a session. Closing an already-closed session is not an error.
    async fn close(&self, session: SessionId) -> Result<(), DriverError>;
}

/// RAII wrapper guaranteeing a session is closed on every exit path.
///
/// Prefer the explicit [`SessionGuard::close`] on normal paths; the `Drop`
/// impl is the backstop for error and interrupt paths, spawning a
/// best-effort close onto the runtime.
pub struct SessionGuard {
    driver: Arc<dyn PageDriver>,
    session: SessionId,
    closed: bool,
}

impl SessionGuard {
    /// Wraps an open session.
    #[must_use]
    pub fn new(driver: Arc<dyn PageDriver>, session: SessionId) -> Self {
        Self {
            driver,
            session,
            closed: false,
        }
    }

    /// Returns the guarded session handle.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.session
    }

    /// Closes the session now. Close failures are logged, not propagated;
    /// a session that failed to close cleanly cannot be recovered anyway.
    pub async fn close(mut self) {
        self.closed = true;
        let session = self.session;
        if let Err(error) = self.driver.close(session).await {
            debug!(%session, %error, "error while closing session");
        }
    }
}

impl fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGuard")
            .field("session", &self.session)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let session = self.session;
        let driver = Arc::clone(&self.driver);
        // Async close from a sync Drop: hand the work to the runtime if
        // one is still running. During runtime shutdown the backend
        // process is torn down with the context, so skipping is safe.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(error) = driver.close(session).await {
                    debug!(%session, %error, "error while closing session from guard");
                }
            });
        }
    }
}
