//! Bounded-concurrency scheduler for article resolutions.
//!
//! Runs the filtered batch with at most N concurrently-active automation
//! sessions. Each article's resolution is fully isolated: an error or panic
//! in one never cancels or delays the others, and every outcome (success,
//! empty, failure) is logged with the article's positional index and name.
//!
//! Articles are dispatched in input order but may complete out of order;
//! the accumulated record list reflects completion order. There is no
//! aggregate per-article timeout - only the individual bounded waits inside
//! the state machine (deliberate trade-off).

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::article::ArticleResolver;
use super::{ArticleRef, ResolvedLink, build_links, dedup_key};
use std::collections::HashSet;

/// Counters from a batch run. Atomic so concurrent resolution tasks can
/// update them without extra locking.
#[derive(Debug, Default)]
pub struct ResolveStats {
    resolved: AtomicUsize,
    empty: AtomicUsize,
    failed: AtomicUsize,
    links: AtomicUsize,
}

impl ResolveStats {
    /// Creates a stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Articles that produced at least one record.
    #[must_use]
    pub fn resolved(&self) -> usize {
        self.resolved.load(Ordering::SeqCst)
    }

    /// Articles that completed with zero targets.
    #[must_use]
    pub fn empty(&self) -> usize {
        self.empty.load(Ordering::SeqCst)
    }

    /// Articles that reached a terminal failure.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Total records gathered.
    #[must_use]
    pub fn links(&self) -> usize {
        self.links.load(Ordering::SeqCst)
    }

    /// Articles that reached any terminal state.
    #[must_use]
    pub fn total(&self) -> usize {
        self.resolved() + self.empty() + self.failed()
    }

    fn add_resolved(&self, links: usize) {
        self.resolved.fetch_add(1, Ordering::SeqCst);
        self.links.fetch_add(links, Ordering::SeqCst);
    }

    fn add_empty(&self) {
        self.empty.fetch_add(1, Ordering::SeqCst);
    }

    fn add_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Result of a batch run: gathered records (completion order) plus stats.
#[derive(Debug)]
pub struct BatchOutput {
    /// Records accumulated across all articles, in completion order.
    pub links: Vec<ResolvedLink>,
    /// Terminal-state counters.
    pub stats: ResolveStats,
}

/// Filters the input batch against the already-resolved dedup-key set.
///
/// An article is skipped when its dedup key appears in `seen` (either store
/// partition, part-suffix stripped).
#[must_use]
pub fn filter_new_articles(articles: Vec<ArticleRef>, seen: &HashSet<String>) -> Vec<ArticleRef> {
    articles
        .into_iter()
        .filter(|article| !seen.contains(&dedup_key(&article.name)))
        .collect()
}

/// Fans article resolutions out with a bounded number of concurrently
/// active sessions.
pub struct BatchScheduler {
    resolver: Arc<ArticleResolver>,
    semaphore: Arc<Semaphore>,
    primary_domain: String,
}

impl BatchScheduler {
    /// Creates a scheduler with the given concurrency bound (clamped to at
    /// least 1).
    #[must_use]
    pub fn new(resolver: Arc<ArticleResolver>, max_concurrent: usize, primary_domain: &str) -> Self {
        Self {
            resolver,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            primary_domain: primary_domain.to_string(),
        }
    }

    /// Runs every article to a terminal state and returns the accumulated
    /// records and counters.
    ///
    /// Cancellation stops dispatching new articles; in-flight resolutions
    /// drain and close their sessions before this returns.
    pub async fn run_batch(
        &self,
        articles: Vec<ArticleRef>,
        cancel: &CancellationToken,
    ) -> BatchOutput {
        let total = articles.len();
        let stats = Arc::new(ResolveStats::new());
        let accumulator: Arc<Mutex<Vec<ResolvedLink>>> = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::with_capacity(total);

        info!(total, "starting batch resolution");

        for (index, article) in articles.into_iter().enumerate() {
            // Stop issuing new sessions once cancelled; in-flight tasks
            // keep their permits and finish. Biased: a cancellation that is
            // already set must win even when a permit is ready.
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!(dispatched = index, total, "interrupt: no further articles dispatched");
                    break;
                }
                permit = Arc::clone(&self.semaphore).acquire_owned() => {
                    match permit {
                        Ok(permit) => permit,
                        Err(_) => break, // semaphore closed; shutting down
                    }
                }
            };

            let resolver = Arc::clone(&self.resolver);
            let stats = Arc::clone(&stats);
            let accumulator = Arc::clone(&accumulator);
            let cancel = cancel.clone();
            let primary_domain = self.primary_domain.clone();
            let position = index + 1;

            handles.push(tokio::spawn(async move {
                // Permit is dropped when this task exits (RAII).
                let _permit = permit;

                match resolver.resolve(&article, &cancel).await {
                    Ok(outcome) if outcome.targets.is_empty() => {
                        info!(
                            index = position,
                            total,
                            name = %article.name,
                            "no download targets found"
                        );
                        stats.add_empty();
                    }
                    Ok(outcome) => {
                        let records = build_links(&article, &outcome, &primary_domain);
                        info!(
                            index = position,
                            total,
                            name = %article.name,
                            links = records.len(),
                            "article resolved"
                        );
                        stats.add_resolved(records.len());
                        // Critical section spans only the append, never a
                        // suspension point.
                        let mut links = match accumulator.lock() {
                            Ok(guard) => guard,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        links.extend(records);
                    }
                    Err(error) => {
                        warn!(
                            index = position,
                            total,
                            name = %article.name,
                            %error,
                            "article resolution failed"
                        );
                        stats.add_failed();
                    }
                }
            }));
        }

        debug!(tasks = handles.len(), "waiting for resolutions to finish");
        for handle in handles {
            if let Err(error) = handle.await {
                // A panic inside one resolution is contained here; the
                // batch continues and the article counts as failed.
                warn!(%error, "resolution task panicked");
                stats.add_failed();
            }
        }

        let links = match Arc::try_unwrap(accumulator) {
            Ok(mutex) => match mutex.into_inner() {
                Ok(links) => links,
                Err(poisoned) => poisoned.into_inner(),
            },
            Err(shared) => match shared.lock() {
                Ok(guard) => guard.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            },
        };
        let stats = match Arc::try_unwrap(stats) {
            Ok(stats) => stats,
            Err(shared) => {
                // All tasks joined, so sole ownership is expected; rebuild
                // from the atomic values if anything still holds a clone.
                let rebuilt = ResolveStats::new();
                rebuilt.resolved.store(shared.resolved(), Ordering::SeqCst);
                rebuilt.empty.store(shared.empty(), Ordering::SeqCst);
                rebuilt.failed.store(shared.failed(), Ordering::SeqCst);
                rebuilt.links.store(shared.links(), Ordering::SeqCst);
                rebuilt
            }
        };

        info!(
            resolved = stats.resolved(),
            empty = stats.empty(),
            failed = stats.failed(),
            links = stats.links(),
            "batch resolution complete"
        );

        BatchOutput { links, stats }
    }
}

impl std::fmt::Debug for BatchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScheduler")
            .field("primary_domain", &self.primary_domain)
            .finish_non_exhaustive()
    }
}
