//! Run configuration and site interaction selectors.
//!
//! A [`Config`] is built once per run (normally from CLI arguments) and
//! handed to the orchestration layer. The [`SiteProfile`] groups the CSS
//! selectors that drive the destination site's interaction pattern so a
//! selector change never touches the state machine itself.

use std::path::PathBuf;
use std::time::Duration;

/// Default bound on concurrently-active automation sessions.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Default retry depth for a whole-article resolution restart.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default bounded wait for a popup to appear after a click.
pub const DEFAULT_POPUP_TIMEOUT: Duration = Duration::from_secs(40);

/// Default bounded wait for an optional credential field.
pub const DEFAULT_CREDENTIAL_TIMEOUT: Duration = Duration::from_secs(3);

/// Domain marker that routes records into the primary-storage partition
/// and enables credential embedding.
pub const DEFAULT_PRIMARY_DOMAIN: &str = "pan.baidu.com";

/// CSS selectors for the destination site's interaction pattern.
#[derive(Debug, Clone)]
pub struct SiteProfile {
    /// The download control clicked on the article page and on the popup.
    pub download_control: String,
    /// Input element holding the optional download password.
    pub download_pwd_input: String,
    /// Input element holding the optional extraction password.
    pub extract_pwd_input: String,
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            download_control: "span.poi-icon__text:has-text('下载')".to_string(),
            download_pwd_input:
                "div.inn-download-page__content__item__download-pwd input".to_string(),
            extract_pwd_input: "div.inn-download-page__content__item__extract-pwd input"
                .to_string(),
        }
    }
}

/// Per-run configuration consumed by the orchestration layer.
#[derive(Debug, Clone)]
pub struct Config {
    /// Run the automation environment without a visible window.
    pub headless: bool,
    /// Bound on concurrently-active resolution sessions.
    pub max_concurrent: usize,
    /// Retry depth for whole-article restarts on primary popup failure.
    pub max_retries: u32,
    /// Bounded wait for popups to open after a click.
    pub popup_timeout: Duration,
    /// Bounded wait for each optional credential field.
    pub credential_timeout: Duration,
    /// Input batch: JSON array of `{name, url}` article references.
    pub articles_path: PathBuf,
    /// Primary-storage partition store file.
    pub primary_store_path: PathBuf,
    /// Other-domain partition store file.
    pub other_store_path: PathBuf,
    /// Flat export: one download address per line (primary partition).
    pub export_urls_path: PathBuf,
    /// Flat export: one non-empty extraction password per line.
    pub export_pwds_path: PathBuf,
    /// Opaque authenticated session-state blob handed to the automation
    /// environment at context start.
    pub storage_state_path: PathBuf,
    /// Destination domain receiving partition and credential-embedding
    /// treatment. Matched by substring, not full URL parsing.
    pub primary_domain: String,
    /// Destination site selectors.
    pub profile: SiteProfile,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            headless: true,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_retries: DEFAULT_MAX_RETRIES,
            popup_timeout: DEFAULT_POPUP_TIMEOUT,
            credential_timeout: DEFAULT_CREDENTIAL_TIMEOUT,
            articles_path: PathBuf::from("articles.json"),
            primary_store_path: PathBuf::from("data/primary_links.json"),
            other_store_path: PathBuf::from("data/other_links.json"),
            export_urls_path: PathBuf::from("data/primary_urls.txt"),
            export_pwds_path: PathBuf::from("data/extract_pwds.txt"),
            storage_state_path: PathBuf::from("data/storage_state.json"),
            primary_domain: DEFAULT_PRIMARY_DOMAIN.to_string(),
            profile: SiteProfile::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();
        assert!(config.headless);
        assert_eq!(config.max_concurrent, 3);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.primary_domain, "pan.baidu.com");
        assert_eq!(config.popup_timeout, Duration::from_secs(40));
        assert_eq!(config.credential_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_default_profile_selectors_non_empty() {
        let profile = SiteProfile::default();
        assert!(!profile.download_control.is_empty());
        assert!(!profile.download_pwd_input.is_empty());
        assert!(!profile.extract_pwd_input.is_empty());
    }
}
