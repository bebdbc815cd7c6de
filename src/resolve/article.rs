//! Per-article resolution state machine.
//!
//! One resolution drives the automation environment through:
//! open article page → click the primary download control → await its popup
//! → best-effort credential reads → enumerate the popup's download controls
//! → per control: click, await popup, read its address, classify (image
//! targets go through the barcode fallback), close the popup → done.
//!
//! Failure edges: a primary-popup timeout restarts the whole article via
//! [`RetryPolicy`] up to the configured depth; a single control's failure is
//! logged and skipped without aborting its siblings; zero resolved targets
//! is an empty (not failed) outcome.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::retry::{RetryError, RetryPolicy};
use super::{ArticleRef, ResolutionOutcome};
use crate::barcode::{BarcodeResolver, is_image_url};
use crate::config::SiteProfile;
use crate::driver::{DriverError, ElementId, PageDriver, SessionGuard, SessionId};

/// Error type for a terminally failed article resolution.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The primary download control never produced its popup, across all
    /// retry attempts.
    #[error("primary download popup never opened: {0}")]
    PrimaryPopup(#[source] DriverError),

    /// A non-retryable automation failure outside the per-button scope.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// The run was interrupted while this article waited to retry.
    #[error("article resolution interrupted")]
    Interrupted,
}

/// Resolves one article reference into a [`ResolutionOutcome`].
///
/// The resolver is cheap to share: one instance serves all concurrent
/// resolution tasks, each of which opens its own isolated sessions.
pub struct ArticleResolver {
    driver: Arc<dyn PageDriver>,
    barcode: BarcodeResolver,
    profile: SiteProfile,
    retry: RetryPolicy,
    popup_timeout: Duration,
    credential_timeout: Duration,
}

impl ArticleResolver {
    /// Creates a resolver over an automation driver and barcode fallback.
    #[must_use]
    pub fn new(
        driver: Arc<dyn PageDriver>,
        barcode: BarcodeResolver,
        profile: SiteProfile,
        retry: RetryPolicy,
        popup_timeout: Duration,
        credential_timeout: Duration,
    ) -> Self {
        Self {
            driver,
            barcode,
            profile,
            retry,
            popup_timeout,
            credential_timeout,
        }
    }

    /// Resolves one article, restarting from scratch on primary-popup
    /// failures up to the retry depth.
    ///
    /// # Errors
    ///
    /// [`ResolveError`] when the article is a terminal failure; the caller
    /// converts this to a logged outcome and the batch continues.
    pub async fn resolve(
        &self,
        article: &ArticleRef,
        cancel: &CancellationToken,
    ) -> Result<ResolutionOutcome, ResolveError> {
        let result = self
            .retry
            .run(
                cancel,
                |error: &ResolveError| matches!(error, ResolveError::PrimaryPopup(_)),
                |attempt| {
                    debug!(name = %article.name, attempt, "starting resolution attempt");
                    self.resolve_once(article)
                },
            )
            .await;

        match result {
            Ok(outcome) => Ok(outcome),
            Err(RetryError::Operation(error)) => Err(error),
            Err(RetryError::Interrupted) => Err(ResolveError::Interrupted),
        }
    }

    /// One full pass of the state machine. Every session opened here is
    /// guarded, so any early return (including the `?` edges) closes them.
    async fn resolve_once(&self, article: &ArticleRef) -> Result<ResolutionOutcome, ResolveError> {
        let page = SessionGuard::new(
            Arc::clone(&self.driver),
            self.driver.open_page(&article.url).await?,
        );

        // PrimaryTrigger: the download control must open a secondary session.
        let popup = match self
            .driver
            .click_and_await_popup(page.id(), &self.profile.download_control, self.popup_timeout)
            .await
        {
            Ok(session) => SessionGuard::new(Arc::clone(&self.driver), session),
            Err(error) if error.is_timeout() => {
                page.close().await;
                return Err(ResolveError::PrimaryPopup(error));
            }
            Err(error) => {
                page.close().await;
                return Err(ResolveError::Driver(error));
            }
        };

        // The article page is no longer needed once its popup is open.
        page.close().await;

        let download_pwd = self
            .read_credential(popup.id(), &self.profile.download_pwd_input)
            .await;
        let extract_pwd = self
            .read_credential(popup.id(), &self.profile.extract_pwd_input)
            .await;

        // ButtonEnumeration: zero or more secondary download controls.
        let buttons = match self
            .driver
            .locate_all(popup.id(), &self.profile.download_control)
            .await
        {
            Ok(buttons) => buttons,
            Err(error) => {
                popup.close().await;
                return Err(ResolveError::Driver(error));
            }
        };
        debug!(name = %article.name, buttons = buttons.len(), "enumerated download controls");

        let mut targets = Vec::new();
        for (index, button) in buttons.into_iter().enumerate() {
            match self.resolve_button(popup.id(), button).await {
                Ok(url) => targets.push(url),
                Err(error) => {
                    // One control's failure never aborts its siblings.
                    warn!(
                        name = %article.name,
                        button = index + 1,
                        %error,
                        "download control failed; skipping"
                    );
                }
            }
        }

        popup.close().await;

        Ok(ResolutionOutcome {
            targets,
            download_pwd,
            extract_pwd,
        })
    }

    /// Best-effort read of an optional credential input. Absence (or any
    /// read failure) yields an unset value, never an error.
    async fn read_credential(&self, session: SessionId, selector: &str) -> Option<String> {
        let element = match self
            .driver
            .wait_for_element(session, selector, self.credential_timeout)
            .await
        {
            Ok(found) => found?,
            Err(error) => {
                debug!(selector, %error, "credential field wait failed");
                return None;
            }
        };

        match self.driver.read_attribute(element, "value").await {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(error) => {
                debug!(selector, %error, "credential field read failed");
                None
            }
        }
    }

    /// PerButtonClick through Accumulate for one control: click, await its
    /// popup, capture the address (barcode-resolved when it is an image),
    /// and close the popup before the next control runs.
    async fn resolve_button(
        &self,
        session: SessionId,
        button: ElementId,
    ) -> Result<String, DriverError> {
        let popup = SessionGuard::new(
            Arc::clone(&self.driver),
            self.driver
                .click_element_and_await_popup(session, button, self.popup_timeout)
                .await?,
        );

        let result = self.driver.current_url(popup.id()).await;
        popup.close().await;
        let address = result?;

        if !is_image_url(&address) {
            return Ok(address);
        }

        // TargetClassification → BarcodeFallback. Every failure below is
        // soft: the original image address stays as a degraded fallback.
        match self.driver.fetch_bytes(&address).await {
            Ok(bytes) => match self.barcode.resolve(bytes).await {
                Some(decoded) => {
                    info!(decoded = %decoded, "barcode target resolved");
                    Ok(decoded)
                }
                None => {
                    warn!(address = %address, "barcode decode exhausted; keeping image address");
                    Ok(address)
                }
            },
            Err(error) => {
                warn!(address = %address, %error, "image fetch failed; keeping image address");
                Ok(address)
            }
        }
    }
}

impl std::fmt::Debug for ArticleResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArticleResolver")
            .field("popup_timeout", &self.popup_timeout)
            .field("credential_timeout", &self.credential_timeout)
            .finish_non_exhaustive()
    }
}
