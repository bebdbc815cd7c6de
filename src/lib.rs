//! Linkharvest Core Library
//!
//! This library resolves a batch of content-listing references (articles)
//! into a deduplicated set of downloadable-resource records by driving a
//! headless page-automation environment through multi-step UI interactions.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`driver`] - Narrow automation-environment boundary (pages, popups, elements)
//! - [`barcode`] - Image classification and the QR fallback decode pipeline
//! - [`resolve`] - Per-article resolution state machine, retry policy, scheduler
//! - [`store`] - Append-only, dedup-aware link persistence and flat export
//! - [`run`] - End-to-end batch orchestration
//! - [`config`] - Run configuration and site selectors

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod barcode;
pub mod config;
pub mod driver;
pub mod resolve;
pub mod run;
pub mod store;

// Re-export commonly used types
pub use barcode::{BarcodeDecoder, BarcodeResolver, RqrrDecoder, is_image_url};
pub use config::{Config, SiteProfile};
pub use driver::{DriverError, ElementId, PageDriver, SessionGuard, SessionId};
pub use resolve::{
    ArticleRef, ArticleResolver, BatchScheduler, DEFAULT_MAX_CONCURRENT, ResolutionOutcome,
    ResolveError, ResolveStats, ResolvedLink, RetryError, RetryPolicy, build_links, dedup_key,
};
pub use run::{RunError, RunSummary};
pub use store::{LinkStore, MergeReport, StoreError};
