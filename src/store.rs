//! Dedup-aware, append-only link persistence and flat export.
//!
//! Records are partitioned by destination: a record whose `download_url`
//! contains the primary-storage domain marker lands in the primary store
//! file, everything else in the other store file (a total partition). The
//! store is the single source of truth for "already resolved": the
//! suffix-stripped names in both partitions filter the next run's batch.
//!
//! Files are rewritten with one complete merged array per run
//! (read-modify-write; the store is single-writer per run), so a crash
//! before the write leaves the previous state intact.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::resolve::{ResolvedLink, dedup_key};

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// File system failure while reading or writing a store file.
    #[error("store io error on '{path}': {source}")]
    Io {
        /// The affected file.
        path: PathBuf,
        /// The underlying failure.
        #[source]
        source: io::Error,
    },

    /// A store file exists but does not hold a JSON record array.
    #[error("store file '{path}' is not a valid record array: {source}")]
    Json {
        /// The affected file.
        path: PathBuf,
        /// The underlying failure.
        #[source]
        source: serde_json::Error,
    },
}

/// Counts reported by [`LinkStore::merge_and_persist`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Records appended to the primary-storage partition this run.
    pub primary_added: usize,
    /// Primary-storage partition size after the merge.
    pub primary_total: usize,
    /// Records appended to the other partition this run.
    pub other_added: usize,
    /// Other partition size after the merge.
    pub other_total: usize,
}

impl MergeReport {
    /// Total records appended this run.
    #[must_use]
    pub fn added(&self) -> usize {
        self.primary_added + self.other_added
    }
}

/// Append-only record store split across two domain partitions.
#[derive(Debug, Clone)]
pub struct LinkStore {
    primary_path: PathBuf,
    other_path: PathBuf,
    primary_domain: String,
}

impl LinkStore {
    /// Creates a store over the two partition files.
    #[must_use]
    pub fn new(primary_path: PathBuf, other_path: PathBuf, primary_domain: &str) -> Self {
        Self {
            primary_path,
            other_path,
            primary_domain: primary_domain.to_string(),
        }
    }

    /// Derives the already-resolved dedup-key set from both partitions.
    ///
    /// A missing or empty partition file contributes nothing (first-run
    /// behavior); an unreadable file is treated the same way so a fresh
    /// deployment never hard-fails here, but it is logged.
    #[must_use]
    pub fn load_seen_names(&self) -> HashSet<String> {
        let mut seen = HashSet::new();
        for path in [&self.primary_path, &self.other_path] {
            match load_records(path) {
                Ok(records) => {
                    for record in records {
                        seen.insert(dedup_key(&record.name));
                    }
                }
                Err(error) => {
                    warn!(path = %path.display(), %error, "could not read store; treating as empty");
                }
            }
        }
        debug!(seen = seen.len(), "loaded already-resolved names");
        seen
    }

    /// Partitions `new_records` by destination domain, merges each
    /// partition with its persisted records, and rewrites both files.
    ///
    /// # Errors
    ///
    /// [`StoreError`] when a partition file cannot be read or written; no
    /// partial (field-by-field) writes occur.
    pub fn merge_and_persist(&self, new_records: &[ResolvedLink]) -> Result<MergeReport, StoreError> {
        if new_records.is_empty() {
            info!("no new records to persist");
            return Ok(MergeReport::default());
        }

        let (primary, other): (Vec<ResolvedLink>, Vec<ResolvedLink>) = new_records
            .iter()
            .cloned()
            .partition(|record| record.download_url.contains(&self.primary_domain));

        let primary_total = merge_into(&self.primary_path, primary.as_slice())?;
        let other_total = merge_into(&self.other_path, other.as_slice())?;

        let report = MergeReport {
            primary_added: primary.len(),
            primary_total,
            other_added: other.len(),
            other_total,
        };
        info!(
            primary_added = report.primary_added,
            primary_total = report.primary_total,
            other_added = report.other_added,
            other_total = report.other_total,
            "persisted link records"
        );
        Ok(report)
    }

    /// Renders the primary partition as flat plaintext for an external
    /// download manager: one download address per line in `urls_path`, and
    /// the deduplicated non-empty extraction passwords one per line in
    /// `pwds_path` (set order is unspecified).
    ///
    /// Pure projection: never mutates the JSON stores, and re-running it on
    /// unchanged input yields identical output modulo password ordering.
    ///
    /// # Errors
    ///
    /// [`StoreError`] when the partition cannot be read or an export file
    /// cannot be written.
    pub fn export_flat(&self, urls_path: &Path, pwds_path: &Path) -> Result<usize, StoreError> {
        let records = load_records(&self.primary_path)?;

        let mut urls = String::new();
        let mut pwd_set = HashSet::new();
        for record in &records {
            urls.push_str(&record.download_url);
            urls.push('\n');
            if let Some(pwd) = &record.extract_pwd {
                if !pwd.is_empty() {
                    pwd_set.insert(pwd.clone());
                }
            }
        }

        write_text(urls_path, &urls)?;
        let mut pwds = String::new();
        for pwd in &pwd_set {
            pwds.push_str(pwd);
            pwds.push('\n');
        }
        write_text(pwds_path, &pwds)?;

        info!(
            urls = records.len(),
            passwords = pwd_set.len(),
            "exported flat files"
        );
        Ok(records.len())
    }
}

/// Loads a partition file; missing or empty files yield an empty list.
fn load_records(path: &Path) -> Result<Vec<ResolvedLink>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_slice(&bytes).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Appends `new_records` to the persisted partition and rewrites the file
/// with the complete merged array. Returns the merged length.
fn merge_into(path: &Path, new_records: &[ResolvedLink]) -> Result<usize, StoreError> {
    let mut merged = load_records(path)?;
    merged.extend_from_slice(new_records);

    let json = serde_json::to_string_pretty(&merged).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    write_text(path, &json)?;
    Ok(merged.len())
}

/// Writes a text file, creating parent directories as needed.
fn write_text(path: &Path, content: &str) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
    }
    fs::write(path, content).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}
