//! novel-sync: offline chapter cache and reading progress sync for web novels.
//!
//! The crate has two halves that meet at a small set of traits:
//!
//! - A client-resident chapter cache ([`cache::ChapterStore`]) that keeps
//!   chapter text on disk for offline reading, with per-work enumeration,
//!   byte accounting and atomic bulk eviction. [`cache::ChapterFetcher`]
//!   fills it from a [`content::ContentSource`].
//! - A progress reconciler ([`sync::ProgressReconciler`]) that pushes
//!   reading position to a store of record through a single atomic upsert
//!   per action, merging the set of read chapters instead of overwriting it.
//!
//! The binary also runs the store of record itself: an authenticated
//! HTTP sync API backed by SQLite.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Session tokens for the sync API.
pub mod auth;
/// Offline chapter cache.
pub mod cache;
/// Configuration and CLI.
pub mod config;
/// Content API client.
pub mod content;
/// Progress store of record.
pub mod db;
/// Error types.
pub mod error;
/// HTTP server.
pub mod server;
/// Reading progress reconciliation.
pub mod sync;

#[cfg(test)]
mod tests;

pub use cache::{CacheInfo, CachedChapter, ChapterFetcher, ChapterStore};
pub use config::{Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use server::AppState;
pub use sync::{ProgressReconciler, ProgressRemote};
