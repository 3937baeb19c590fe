//! Core library for the article review workflow.
//!
//! - [`session`] drives the parsing, proofreading and publish steps of one
//!   review and saves decisions whenever a step is left.
//! - [`decisions`] tracks accept / reject / modify verdicts per issue.
//! - [`diff`] produces word-level diffs that are safe for CJK text.
//! - [`optimize`] generates and caches title, SEO and FAQ suggestions.
//! - [`monitor`] turns generation and cache events into cost reports.
//!
//! Persistence goes through one WAL-mode SQLite database opened with
//! [`db::open_db`].

pub mod config;
pub mod db;
pub mod decisions;
pub mod diff;
pub mod error;
pub mod monitor;
pub mod optimize;
pub mod schema;
pub mod session;
pub mod types;
pub mod worklist;

pub use error::{Error, Result};
