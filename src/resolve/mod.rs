//! Article resolution: data model, retry policy, state machine, scheduler.
//!
//! An article is one content-listing reference `{name, url}`. Resolving it
//! drives a sequence of automation steps that yields zero or more
//! [`ResolvedLink`] records. The scheduler fans many resolutions out under a
//! bounded concurrency limit, isolating each article's failures from the
//! rest of the batch.

mod article;
mod retry;
mod scheduler;

pub use article::{ArticleResolver, ResolveError};
pub use retry::{RetryError, RetryPolicy};
pub use scheduler::{BatchOutput, BatchScheduler, ResolveStats, filter_new_articles};

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub use crate::config::DEFAULT_MAX_CONCURRENT;

/// Query-parameter convention for embedding a download password into a
/// primary-storage address. Also serves as the "credential already present"
/// marker.
pub const PWD_MARKER: &str = "?pwd=";

/// Suffix appended to disambiguate multi-target records: `{base}_part{i}`.
static PART_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    // Fixed pattern, exercised by the dedup_key tests.
    match Regex::new(r"_part\d+$") {
        Ok(re) => re,
        Err(_) => unreachable!(),
    }
});

/// One input content-listing reference, produced by the external listing
/// crawler and consumed once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRef {
    /// Display name; the dedup key after part-suffix stripping.
    pub name: String,
    /// Article page address.
    pub url: String,
}

/// One resolved download target.
///
/// An article yielding `k` targets produces `k` records; for `k > 1` each
/// name carries a `_part{i}` suffix stripped back off when computing the
/// dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLink {
    /// Record name (possibly part-suffixed).
    pub name: String,
    /// The article page the target came from.
    pub article_url: String,
    /// The resolved download address.
    pub download_url: String,
    /// Download password read from the article's download page, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_pwd: Option<String>,
    /// Extraction password read from the article's download page, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract_pwd: Option<String>,
}

/// Transient per-article result: the ordered raw target addresses plus the
/// credentials shared by all of them. Empty `targets` is a valid soft
/// outcome (the article is logged as empty, not failed).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionOutcome {
    /// Raw target addresses in button order (barcode-resolved where needed).
    pub targets: Vec<String>,
    /// Optional shared download password.
    pub download_pwd: Option<String>,
    /// Optional shared extraction password.
    pub extract_pwd: Option<String>,
}

/// Derives the dedup key for a stored or input name by stripping any
/// part-index suffix, so multi-part results are treated as one logical
/// article across runs.
#[must_use]
pub fn dedup_key(name: &str) -> String {
    PART_SUFFIX.replace(name, "").into_owned()
}

/// Materializes an article's outcome into persistent records.
///
/// Applies the two post-processing rules:
/// - `k > 1` targets get `_part{i}` disambiguated names (1-indexed);
/// - a target on the primary-storage domain that lacks the `?pwd=` marker
///   and has a known download password gets the password appended using the
///   domain's query-parameter convention.
#[must_use]
pub fn build_links(
    article: &ArticleRef,
    outcome: &ResolutionOutcome,
    primary_domain: &str,
) -> Vec<ResolvedLink> {
    let multi = outcome.targets.len() > 1;
    outcome
        .targets
        .iter()
        .enumerate()
        .map(|(index, target)| {
            let name = if multi {
                format!("{}_part{}", article.name, index + 1)
            } else {
                article.name.clone()
            };

            let mut download_url = target.clone();
            if download_url.contains(primary_domain) && !download_url.contains(PWD_MARKER) {
                if let Some(pwd) = &outcome.download_pwd {
                    download_url = format!("{download_url}{PWD_MARKER}{pwd}");
                }
            }

            ResolvedLink {
                name,
                article_url: article.url.clone(),
                download_url,
                download_pwd: outcome.download_pwd.clone(),
                extract_pwd: outcome.extract_pwd.clone(),
            }
        })
        .collect()
}
