//! Category name canonicalization.
//!
//! MediaWiki treats `Category:Foo_bar`, `category:Foo bar` and `Foo bar` as
//! references to the same category page. The helpers here produce the
//! comparison-only form; display and storage always keep the prefixed
//! `Category:Name` spelling.

pub const CATEGORY_PREFIX: &str = "Category:";

/// Strip an optional case-insensitive `Category:` prefix, fold underscores
/// to spaces and trim. Empty input yields an empty string.
pub fn normalize_category_name(value: &str) -> String {
    let value = value.trim_start();
    let without_prefix = strip_category_prefix(value).unwrap_or(value);
    without_prefix.replace('_', " ").trim().to_string()
}

/// Case-folded comparison key. Two references name the same category iff
/// their keys are equal. Runs of internal whitespace compare as one space.
pub fn category_key(value: &str) -> String {
    normalize_category_name(value)
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn same_category(left: &str, right: &str) -> bool {
    let left = category_key(left);
    !left.is_empty() && left == category_key(right)
}

/// True when `candidate` names the category page `source_category` itself.
pub fn is_circular_category(source_category: &str, candidate: &str) -> bool {
    same_category(source_category, candidate)
}

/// Prefixed display form, `Category:<name>`, regardless of how the caller
/// spelled the prefix. Empty names yield an empty string.
pub fn category_title(value: &str) -> String {
    let name = normalize_category_name(value);
    if name.is_empty() {
        String::new()
    } else {
        format!("{CATEGORY_PREFIX}{name}")
    }
}

/// The caller's spelling with the prefix written exactly as `Category:`.
/// Underscores and inner spacing are kept; blank names yield "".
pub fn display_title(value: &str) -> String {
    let trimmed = value.trim();
    let name = strip_category_prefix(trimmed).unwrap_or(trimmed).trim();
    if category_key(name).is_empty() {
        String::new()
    } else {
        format!("{CATEGORY_PREFIX}{name}")
    }
}

/// Category name in the syntax the search backend expects (`Foo_bar`).
pub fn search_category_name(value: &str) -> String {
    normalize_category_name(value).replace(' ', "_")
}

fn strip_category_prefix(value: &str) -> Option<&str> {
    let head = value.get(..CATEGORY_PREFIX.len())?;
    if head.eq_ignore_ascii_case(CATEGORY_PREFIX) {
        value.get(CATEGORY_PREFIX.len()..)
    } else {
        None
    }
}
