//! Category-scoped title search and detail enrichment.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::error::BatchError;
use crate::gateway::{FileDetails, MAX_DETAIL_TITLES, SearchHit, WikiGateway};
use crate::model::FileRecord;
use crate::normalize::search_category_name;

pub const DEFAULT_MAX_RESULTS: usize = 5_000;
pub const DEFAULT_MAX_PATTERN_LENGTH: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    pub max_results: usize,
    pub detail_batch_size: usize,
    pub max_pattern_length: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_results: DEFAULT_MAX_RESULTS,
            detail_batch_size: MAX_DETAIL_TITLES,
            max_pattern_length: DEFAULT_MAX_PATTERN_LENGTH,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SearchOutcome {
    pub files: Vec<FileRecord>,
    /// The result cap was reached before the search was exhausted.
    pub truncated: bool,
    pub cancelled: bool,
}

pub struct SearchCoordinator<G> {
    gateway: G,
    options: SearchOptions,
}

impl<G: WikiGateway> SearchCoordinator<G> {
    pub fn new(gateway: G, options: SearchOptions) -> Self {
        Self { gateway, options }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Find files in `category_title` whose title matches `pattern`, then
    /// load their categories, thumbnail and size. No match is an empty
    /// outcome, not an error. An empty pattern lists the whole category.
    pub fn search_files(
        &mut self,
        category_title: &str,
        pattern: &str,
        cancel: &CancellationToken,
    ) -> Result<SearchOutcome, BatchError> {
        let category = search_category_name(category_title);
        if category.is_empty() {
            return Err(BatchError::validation("no category given to search in"));
        }
        let pattern = sanitize_search_pattern(pattern, self.options.max_pattern_length);

        let mut outcome = SearchOutcome::default();
        let hits = self.collect_hits(&category, &pattern, cancel, &mut outcome)?;
        if outcome.cancelled || hits.is_empty() {
            return Ok(outcome);
        }

        let titles = hits.iter().map(|hit| hit.title.clone()).collect::<Vec<_>>();
        let batch_size = self.options.detail_batch_size.clamp(1, MAX_DETAIL_TITLES);
        let mut details: HashMap<String, FileDetails> = HashMap::with_capacity(titles.len());
        for batch in titles.chunks(batch_size) {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }
            for item in self.gateway.get_file_details(batch)? {
                details.insert(item.title.clone(), item);
            }
        }

        for hit in hits {
            match details.remove(&hit.title) {
                Some(item) => outcome.files.push(file_record(hit, item)),
                None if outcome.cancelled => {}
                None => debug!(file = %hit.title, "no details returned; dropping"),
            }
        }

        info!(
            category = %category,
            pattern = %pattern,
            files = outcome.files.len(),
            truncated = outcome.truncated,
            cancelled = outcome.cancelled,
            "search finished"
        );
        Ok(outcome)
    }

    fn collect_hits(
        &mut self,
        category: &str,
        pattern: &str,
        cancel: &CancellationToken,
        outcome: &mut SearchOutcome,
    ) -> Result<Vec<SearchHit>, BatchError> {
        let mut hits = Vec::new();
        let mut seen = HashSet::new();
        let mut continuation: Option<String> = None;

        loop {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }
            let page = self
                .gateway
                .search_in_category(category, pattern, continuation.as_deref())?;
            debug!(hits = page.hits.len(), "search page received");

            for hit in page.hits {
                if hits.len() >= self.options.max_results {
                    outcome.truncated = true;
                    break;
                }
                if seen.insert(hit.title.clone()) {
                    hits.push(hit);
                }
            }

            continuation = page.continuation;
            if outcome.truncated || continuation.is_none() {
                break;
            }
            if hits.len() >= self.options.max_results {
                outcome.truncated = true;
                break;
            }
        }

        Ok(hits)
    }
}

/// Make free text safe to embed in a quoted search term: cut to
/// `max_length` characters, then escape backslashes and double quotes.
pub fn sanitize_search_pattern(pattern: &str, max_length: usize) -> String {
    pattern
        .trim()
        .chars()
        .take(max_length)
        .collect::<String>()
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
}

fn file_record(hit: SearchHit, details: FileDetails) -> FileRecord {
    FileRecord {
        title: hit.title,
        page_id: details.page_id,
        selected: true,
        current_categories: details.categories,
        thumbnail_url: details.thumbnail_url,
        size_bytes: if details.size_bytes > 0 {
            details.size_bytes
        } else {
            hit.size_bytes
        },
    }
}
