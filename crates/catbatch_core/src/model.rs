use std::collections::HashSet;

use serde::Serialize;

use crate::error::BatchError;
use crate::normalize::{category_key, category_title, is_circular_category, normalize_category_name};

pub const SUMMARY_SUFFIX: &str = "(via Category Batch Manager)";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileRecord {
    pub title: String,
    pub page_id: i64,
    pub selected: bool,
    pub current_categories: Vec<String>,
    pub thumbnail_url: Option<String>,
    pub size_bytes: u64,
}

impl FileRecord {
    pub fn new(title: impl Into<String>, current_categories: Vec<String>) -> Self {
        Self {
            title: title.into(),
            page_id: 0,
            selected: true,
            current_categories,
            thumbnail_url: None,
            size_bytes: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CircularPolicy {
    /// Fail validation with [`BatchError::CircularCategory`].
    #[default]
    Reject,
    /// Silently drop the offending add-target.
    Filter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    pub files: Vec<FileRecord>,
    pub categories_to_add: Vec<String>,
    pub categories_to_remove: Vec<String>,
    pub edit_summary: String,
}

impl BatchRequest {
    /// Build a request, dropping blank category entries and collapsing
    /// entries that name the same category (first spelling wins).
    pub fn new(files: Vec<FileRecord>, to_add: &[String], to_remove: &[String]) -> Self {
        let categories_to_add = dedupe_categories(to_add);
        let categories_to_remove = dedupe_categories(to_remove);
        let edit_summary = build_edit_summary(&categories_to_add, &categories_to_remove);
        Self {
            files,
            categories_to_add,
            categories_to_remove,
            edit_summary,
        }
    }

    /// Restrict the request to files flagged `selected`, keeping their order.
    pub fn selected_only(mut self) -> Self {
        self.files.retain(|file| file.selected);
        self
    }

    /// Pre-flight checks run before anything touches the wiki.
    ///
    /// `source_category` is the category page the batch was launched from;
    /// adding it to its own members is rejected or filtered per `policy`.
    pub fn validate(
        mut self,
        source_category: Option<&str>,
        policy: CircularPolicy,
    ) -> Result<Self, BatchError> {
        if self.files.is_empty() {
            return Err(BatchError::validation("no files selected"));
        }

        if let Some(source) = source_category
            && let Some(circular) = self
                .categories_to_add
                .iter()
                .find(|candidate| is_circular_category(source, candidate))
                .cloned()
        {
            match policy {
                CircularPolicy::Reject => {
                    return Err(BatchError::CircularCategory {
                        category: category_title(&circular),
                    });
                }
                CircularPolicy::Filter => {
                    self.categories_to_add
                        .retain(|candidate| !is_circular_category(source, candidate));
                    self.edit_summary =
                        build_edit_summary(&self.categories_to_add, &self.categories_to_remove);
                }
            }
        }

        self.ensure_has_categories()?;
        Ok(self)
    }

    pub(crate) fn ensure_has_categories(&self) -> Result<(), BatchError> {
        if self.categories_to_add.is_empty() && self.categories_to_remove.is_empty() {
            return Err(BatchError::validation("no categories specified"));
        }
        Ok(())
    }
}

/// `Batch category update: +A, B; -C (via Category Batch Manager)`.
pub fn build_edit_summary(to_add: &[String], to_remove: &[String]) -> String {
    let mut parts = Vec::new();
    if !to_add.is_empty() {
        parts.push(format!("+{}", display_names(to_add)));
    }
    if !to_remove.is_empty() {
        parts.push(format!("-{}", display_names(to_remove)));
    }
    format!("Batch category update: {} {SUMMARY_SUFFIX}", parts.join("; "))
}

fn display_names(categories: &[String]) -> String {
    categories
        .iter()
        .map(|category| normalize_category_name(category))
        .collect::<Vec<_>>()
        .join(", ")
}

fn dedupe_categories(categories: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    categories
        .iter()
        .map(|category| category.trim())
        .filter(|category| {
            let key = category_key(category);
            !key.is_empty() && seen.insert(key)
        })
        .map(ToString::to_string)
        .collect()
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileError {
    pub file_title: String,
    pub message: String,
}

/// Running tally of a batch. `processed == successful + skipped + failed`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Default)]
pub struct BatchResult {
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<FileError>,
    pub cancelled: bool,
}

impl BatchResult {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn percent_complete(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        let percent = self.processed.saturating_mul(100) / self.total;
        u8::try_from(percent.min(100)).unwrap_or(100)
    }

    pub(crate) fn record_success(&mut self) {
        self.successful += 1;
        self.processed += 1;
    }

    pub(crate) fn record_skip(&mut self) {
        self.skipped += 1;
        self.processed += 1;
    }

    pub(crate) fn record_failure(&mut self, file_title: &str, message: String) {
        self.failed += 1;
        self.processed += 1;
        self.errors.push(FileError {
            file_title: file_title.to_string(),
            message,
        });
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PreviewItem {
    pub file_title: String,
    pub current_categories: Vec<String>,
    pub new_categories: Vec<String>,
    pub will_change: bool,
}
