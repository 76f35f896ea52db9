//! Read-only client for the imageboard's JSON API.
//!
//! Two endpoints are used: the board catalog (`/{board}/catalog.json`) and
//! the full thread document (`/{board}/thread/{no}.json`).

mod client;
mod types;

pub use client::{ApiClient, ApiError};
pub use types::{Attachment, CatalogPage, CatalogReply, CatalogThread, ThreadDocument, ThreadPost};
