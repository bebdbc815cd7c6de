//! End-to-end batch orchestration.
//!
//! One run: load the article batch, filter it against the already-resolved
//! set from both store partitions, fan the remainder out through the
//! scheduler, persist the gathered records, and render the flat export.
//! Stores are only written after the batch fully completes, so an interrupt
//! or failure mid-batch never corrupts persisted state.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::barcode::{BarcodeDecoder, BarcodeResolver};
use crate::config::Config;
use crate::driver::PageDriver;
use crate::resolve::{
    ArticleRef, ArticleResolver, BatchScheduler, RetryPolicy, filter_new_articles,
};
use crate::store::{LinkStore, MergeReport, StoreError};

/// Error type for run-level failures (anything here aborts the whole run;
/// per-article failures never reach this level).
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The article batch file could not be read.
    #[error("cannot read articles file '{path}': {source}")]
    ArticlesIo {
        /// The batch file location.
        path: PathBuf,
        /// The underlying failure.
        #[source]
        source: io::Error,
    },

    /// The article batch file is not a JSON array of `{name, url}`.
    #[error("articles file '{path}' is not a valid article array: {source}")]
    ArticlesJson {
        /// The batch file location.
        path: PathBuf,
        /// The underlying failure.
        #[source]
        source: serde_json::Error,
    },

    /// Store persistence or export failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-run summary of counts for operator reporting.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunSummary {
    /// Articles present in the input batch.
    pub input_total: usize,
    /// Articles skipped because their dedup key was already resolved.
    pub skipped_seen: usize,
    /// Articles that produced at least one record.
    pub resolved: usize,
    /// Articles that completed with zero targets.
    pub empty: usize,
    /// Articles that reached a terminal failure.
    pub failed: usize,
    /// Store merge counts for this run.
    pub merge: MergeReport,
    /// Whether the run was interrupted before dispatching every article.
    pub interrupted: bool,
}

/// Loads the article batch from `path`.
///
/// # Errors
///
/// [`RunError`] when the file is missing, unreadable, or malformed.
pub fn load_articles(path: &Path) -> Result<Vec<ArticleRef>, RunError> {
    let bytes = fs::read(path).map_err(|source| RunError::ArticlesIo {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| RunError::ArticlesJson {
        path: path.to_path_buf(),
        source,
    })
}

/// Executes one full run over the given automation driver and decode
/// primitive.
///
/// # Errors
///
/// [`RunError`] for batch-file and store failures. Per-article failures are
/// logged, counted in the summary, and never abort the run.
pub async fn execute(
    config: &Config,
    driver: Arc<dyn PageDriver>,
    decoder: Arc<dyn BarcodeDecoder>,
    cancel: CancellationToken,
) -> Result<RunSummary, RunError> {
    let articles = load_articles(&config.articles_path)?;
    let input_total = articles.len();
    info!(total = input_total, path = %config.articles_path.display(), "loaded article batch");

    let store = LinkStore::new(
        config.primary_store_path.clone(),
        config.other_store_path.clone(),
        &config.primary_domain,
    );

    let seen = store.load_seen_names();
    let batch = filter_new_articles(articles, &seen);
    let skipped_seen = input_total - batch.len();

    let mut summary = RunSummary {
        input_total,
        skipped_seen,
        ..RunSummary::default()
    };

    if batch.is_empty() {
        info!("all articles already resolved; nothing new to process");
    } else {
        info!(
            new = batch.len(),
            skipped = skipped_seen,
            "processing new articles"
        );

        let resolver = Arc::new(ArticleResolver::new(
            driver,
            BarcodeResolver::new(decoder),
            config.profile.clone(),
            RetryPolicy::with_max_attempts(config.max_retries),
            config.popup_timeout,
            config.credential_timeout,
        ));
        let scheduler = BatchScheduler::new(resolver, config.max_concurrent, &config.primary_domain);

        let output = scheduler.run_batch(batch, &cancel).await;
        summary.resolved = output.stats.resolved();
        summary.empty = output.stats.empty();
        summary.failed = output.stats.failed();
        summary.merge = store.merge_and_persist(&output.links)?;
    }

    store.export_flat(&config.export_urls_path, &config.export_pwds_path)?;
    summary.interrupted = cancel.is_cancelled();

    info!(
        input = summary.input_total,
        skipped = summary.skipped_seen,
        resolved = summary.resolved,
        empty = summary.empty,
        failed = summary.failed,
        added = summary.merge.added(),
        interrupted = summary.interrupted,
        "run complete"
    );

    Ok(summary)
}
