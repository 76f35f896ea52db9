//! Chan WebM archiver library.
//!
//! Periodically scans imageboard catalogs for threads carrying video
//! attachments, records threads and posts, and stores each distinct file
//! exactly once, keyed by its content digest.

pub mod api;
pub mod config;
pub mod constants;
pub mod db;
pub mod digest;
pub mod fs_utils;
pub mod harvest;
pub mod reconcile;
