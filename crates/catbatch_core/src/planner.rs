//! Dry-run computation of per-file category changes.
//!
//! Works only on the category lists captured at search time; nothing here
//! talks to the wiki. The executor recomputes against fresh page text.

use std::collections::HashSet;

use crate::error::BatchError;
use crate::model::{BatchRequest, FileRecord, PreviewItem};
use crate::normalize::{category_key, display_title};

#[derive(Debug, Clone, Copy, Default)]
pub struct ChangePlanner;

impl ChangePlanner {
    pub fn new() -> Self {
        Self
    }

    pub fn preview_request(&self, request: &BatchRequest) -> Result<Vec<PreviewItem>, BatchError> {
        self.preview(
            &request.files,
            &request.categories_to_add,
            &request.categories_to_remove,
        )
    }

    /// Fails for the whole batch when any file already carries an
    /// add-target. Categories listed in both `to_add` and `to_remove` are
    /// exempt: the request moves them to the end of the list.
    pub fn preview(
        &self,
        files: &[FileRecord],
        to_add: &[String],
        to_remove: &[String],
    ) -> Result<Vec<PreviewItem>, BatchError> {
        let remove_keys = to_remove
            .iter()
            .map(|category| category_key(category))
            .collect::<HashSet<_>>();

        let duplicates = find_duplicates(files, to_add, &remove_keys);
        if !duplicates.is_empty() {
            return Err(BatchError::DuplicateCategory {
                categories: duplicates,
            });
        }

        Ok(files
            .iter()
            .map(|file| plan_file(file, to_add, &remove_keys))
            .collect())
    }
}

fn find_duplicates(
    files: &[FileRecord],
    to_add: &[String],
    remove_keys: &HashSet<String>,
) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for file in files {
        let present = file
            .current_categories
            .iter()
            .map(|category| category_key(category))
            .collect::<HashSet<_>>();
        for category in to_add {
            let key = category_key(category);
            if present.contains(&key) && !remove_keys.contains(&key) && seen.insert(key) {
                duplicates.push(category.trim().to_string());
            }
        }
    }
    duplicates
}

fn plan_file(file: &FileRecord, to_add: &[String], remove_keys: &HashSet<String>) -> PreviewItem {
    let mut new_categories = file
        .current_categories
        .iter()
        .filter(|category| !remove_keys.contains(&category_key(category)))
        .cloned()
        .collect::<Vec<_>>();

    for category in to_add {
        let key = category_key(category);
        let present = new_categories
            .iter()
            .any(|existing| category_key(existing) == key);
        if !present {
            new_categories.push(display_title(category));
        }
    }

    PreviewItem {
        file_title: file.title.clone(),
        will_change: new_categories != file.current_categories,
        current_categories: file.current_categories.clone(),
        new_categories,
    }
}

#[cfg(test)]
mod tests {
    use super::ChangePlanner;
    use crate::error::BatchError;
    use crate::model::{BatchRequest, FileRecord};
    use crate::wikitext::apply_category_changes;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    fn file(title: &str, categories: &[&str]) -> FileRecord {
        FileRecord::new(title, strings(categories))
    }

    #[test]
    fn remove_then_add() {
        let files = vec![file("File:1.png", &["Category:A", "Category:B"])];
        let preview = ChangePlanner::new()
            .preview(&files, &strings(&["C"]), &strings(&["A"]))
            .expect("preview");
        assert_eq!(preview.len(), 1);
        assert_eq!(preview[0].new_categories, strings(&["Category:B", "Category:C"]));
        assert!(preview[0].will_change);
    }

    #[test]
    fn duplicate_add_fails_whole_batch() {
        let files = vec![
            file("File:1.png", &["Category:B"]),
            file("File:2.png", &["Category:A"]),
        ];
        let error = ChangePlanner::new()
            .preview(&files, &strings(&["A", "C"]), &[])
            .expect_err("duplicate");
        assert_eq!(
            error,
            BatchError::DuplicateCategory {
                categories: strings(&["A"])
            }
        );
        assert!(error.to_string().contains("A"));
    }

    #[test]
    fn duplicate_error_lists_every_offender_once() {
        let files = vec![
            file("File:1.png", &["Category:A", "Category:B_b"]),
            file("File:2.png", &["Category:A"]),
        ];
        let error = ChangePlanner::new()
            .preview(&files, &strings(&["a", "B b", "C"]), &[])
            .expect_err("duplicate");
        assert_eq!(
            error.to_string(),
            "categories already present on selected files: a, B b"
        );
    }

    #[test]
    fn repeated_inner_whitespace_counts_as_duplicate() {
        let files = vec![file("File:1.png", &["Category:Foo Bar"])];
        let error = ChangePlanner::new()
            .preview(&files, &strings(&["Foo  Bar"]), &[])
            .expect_err("duplicate");
        assert_eq!(
            error,
            BatchError::DuplicateCategory {
                categories: strings(&["Foo  Bar"])
            }
        );

        let preview = ChangePlanner::new()
            .preview(&files, &[], &strings(&["Foo  Bar"]))
            .expect("preview");
        assert!(preview[0].new_categories.is_empty());
        assert!(preview[0].will_change);
    }

    #[test]
    fn preview_matches_editor_on_spacing_variants() {
        let text = "desc\n[[Category:Foo   Bar]]\n";
        let files = vec![file("File:1.png", &["Category:Foo   Bar"])];
        let to_remove = strings(&["foo_bar"]);
        let preview = ChangePlanner::new()
            .preview(&files, &[], &to_remove)
            .expect("preview");
        let edited = apply_category_changes(text, &[], &to_remove);
        assert_eq!(preview[0].will_change, edited != text);
        assert_eq!(edited, "desc\n");
    }

    #[test]
    fn added_entries_keep_caller_spelling() {
        let files = vec![file("File:1.png", &["Category:A"])];
        let preview = ChangePlanner::new()
            .preview(&files, &strings(&["category:Our_World_in_Data"]), &[])
            .expect("preview");
        assert_eq!(
            preview[0].new_categories,
            strings(&["Category:A", "Category:Our_World_in_Data"])
        );
    }

    #[test]
    fn removing_absent_category_is_a_no_op() {
        let files = vec![file("File:1.png", &["Category:A"])];
        let preview = ChangePlanner::new()
            .preview(&files, &[], &strings(&["Z"]))
            .expect("preview");
        assert_eq!(preview[0].new_categories, strings(&["Category:A"]));
        assert!(!preview[0].will_change);
    }

    #[test]
    fn remove_and_readd_moves_category_to_end() {
        let files = vec![file("File:1.png", &["Category:A", "Category:B"])];
        let preview = ChangePlanner::new()
            .preview(&files, &strings(&["A"]), &strings(&["A"]))
            .expect("preview");
        assert_eq!(preview[0].new_categories, strings(&["Category:B", "Category:A"]));
        assert!(preview[0].will_change);

        let files = vec![file("File:2.png", &["Category:B", "Category:A"])];
        let preview = ChangePlanner::new()
            .preview(&files, &strings(&["A"]), &strings(&["A"]))
            .expect("preview");
        assert!(!preview[0].will_change);
    }

    #[test]
    fn preview_is_deterministic_and_per_file() {
        let request = BatchRequest::new(
            vec![
                file("File:1.png", &["Category:Old"]),
                file("File:2.png", &[]),
            ],
            &strings(&["New"]),
            &strings(&["Old"]),
        );
        let planner = ChangePlanner::new();
        let first = planner.preview_request(&request).expect("first");
        let second = planner.preview_request(&request).expect("second");
        assert_eq!(first, second);
        assert_eq!(first[0].new_categories, strings(&["Category:New"]));
        assert_eq!(first[1].new_categories, strings(&["Category:New"]));
        assert_eq!(first[1].file_title, "File:2.png");
    }
}
