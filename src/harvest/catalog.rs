//! Catalog scanning: pick threads worth fetching in full.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::api::{ApiClient, ApiError, CatalogPage, CatalogThread};
use crate::config::{CandidateSettings, Config};

/// Heuristic deciding whether a catalog entry may contain target media.
///
/// Intentionally permissive; precision comes later, when only posts that
/// really carry the target extension are resolved.
#[derive(Debug, Clone)]
pub struct CandidateFilter {
    target_extension: String,
    settings: CandidateSettings,
}

impl CandidateFilter {
    #[must_use]
    pub fn new(target_extension: &str, settings: CandidateSettings) -> Self {
        Self {
            target_extension: target_extension.to_lowercase(),
            settings,
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.target_extension, config.candidates.clone())
    }

    /// Whether a thread summary is a candidate for ingestion.
    #[must_use]
    pub fn is_candidate(&self, thread: &CatalogThread) -> bool {
        if self.is_target_ext(thread.ext.as_deref()) {
            return true;
        }
        if self.settings.match_root_keywords && self.has_keyword(thread.com.as_deref()) {
            return true;
        }
        thread.last_replies.iter().any(|reply| {
            (self.settings.match_reply_extension && self.is_target_ext(reply.ext.as_deref()))
                || (self.settings.match_reply_keywords && self.has_keyword(reply.com.as_deref()))
        })
    }

    fn is_target_ext(&self, ext: Option<&str>) -> bool {
        ext.is_some_and(|e| e.eq_ignore_ascii_case(&self.target_extension))
    }

    fn has_keyword(&self, body: Option<&str>) -> bool {
        let Some(body) = body else {
            return false;
        };
        let lowered = body.to_lowercase();
        self.settings
            .keywords
            .iter()
            .any(|k| !k.is_empty() && lowered.contains(k.as_str()))
    }
}

/// Fetches a board catalog and returns candidate thread numbers.
#[derive(Debug, Clone)]
pub struct CatalogScanner {
    api: ApiClient,
    filter: CandidateFilter,
}

impl CatalogScanner {
    #[must_use]
    pub fn new(api: ApiClient, filter: CandidateFilter) -> Self {
        Self { api, filter }
    }

    /// Scan one board.
    ///
    /// A failed catalog fetch is returned as-is; there is no inline retry,
    /// the next scheduled pass retries naturally.
    pub async fn scan(&self, board: &str) -> Result<Vec<u64>, ApiError> {
        let pages = self.api.fetch_catalog(board).await?;
        let candidates = self.select(&pages);
        let total: usize = pages.iter().map(|p| p.threads.len()).sum();
        info!(
            board = %board,
            threads = total,
            candidates = candidates.len(),
            "Catalog scanned"
        );
        Ok(candidates)
    }

    /// Candidate thread numbers in catalog order, without duplicates.
    #[must_use]
    pub fn select(&self, pages: &[CatalogPage]) -> Vec<u64> {
        let mut seen = HashSet::new();
        let mut selected = Vec::new();
        for thread in pages.iter().flat_map(|p| p.threads.iter()) {
            if self.filter.is_candidate(thread) && seen.insert(thread.no) {
                debug!(thread = thread.no, "Candidate thread");
                selected.push(thread.no);
            }
        }
        selected
    }
}
