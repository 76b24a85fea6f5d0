//! Category tag editing on raw page source.
//!
//! Only `[[Category:Name]]` / `[[Category:Name|Sort key]]` markup is ever
//! touched; every other byte of the page is carried through unchanged.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use crate::normalize::{CATEGORY_PREFIX, category_key, category_title};

static CATEGORY_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[\[\s*category\s*:([^\]|]*)(?:\|([^\]]*))?\]\]")
        .expect("invalid category tag regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryTag {
    /// Trimmed name as written, without the prefix.
    pub name: String,
    pub sort_key: Option<String>,
    pub span: Range<usize>,
}

impl CategoryTag {
    pub fn title(&self) -> String {
        format!("{CATEGORY_PREFIX}{}", self.name)
    }
}

/// Every well-formed category tag in document order.
pub fn category_tags(text: &str) -> Vec<CategoryTag> {
    CATEGORY_TAG
        .captures_iter(text)
        .filter_map(|captures| {
            let whole = captures.get(0)?;
            let name = captures.get(1)?.as_str().trim();
            if name.is_empty() {
                return None;
            }
            Some(CategoryTag {
                name: name.to_string(),
                sort_key: captures.get(2).map(|value| value.as_str().to_string()),
                span: whole.range(),
            })
        })
        .collect()
}

/// Category titles (`Category:Name`) in document order.
pub fn extract_categories(text: &str) -> Vec<String> {
    category_tags(text).iter().map(CategoryTag::title).collect()
}

pub fn has_category(text: &str, category: &str) -> bool {
    let wanted = category_key(category);
    if wanted.is_empty() {
        return false;
    }
    category_tags(text)
        .iter()
        .any(|tag| category_key(&tag.name) == wanted)
}

/// Insert `[[Category:<name>]]` without checking for an existing tag; callers
/// guard with [`has_category`].
///
/// When the page already ends in a category tag the new tag goes on its own
/// line right after the last one. Otherwise it is appended after the trimmed
/// text, followed by a newline.
pub fn add_category(text: &str, category: &str) -> String {
    let title = category_title(category);
    if title.is_empty() {
        return text.to_string();
    }
    let tag = format!("[[{title}]]");

    if let Some(last) = CATEGORY_TAG.find_iter(text).last() {
        let (head, tail) = text.split_at(last.end());
        if tail.trim().is_empty() {
            return format!("{head}\n{tag}{tail}");
        }
    }

    let trimmed = text.trim_end();
    if trimmed.is_empty() {
        format!("{tag}\n")
    } else {
        format!("{trimmed}\n{tag}\n")
    }
}

/// Remove every tag naming `category`, together with its sort key and one
/// following line break. Returns the input unchanged when nothing matches.
pub fn remove_category(text: &str, category: &str) -> String {
    let wanted = category_key(category);
    if wanted.is_empty() {
        return text.to_string();
    }

    let removals = category_tags(text)
        .into_iter()
        .filter(|tag| category_key(&tag.name) == wanted)
        .map(|tag| {
            let rest = &text[tag.span.end..];
            let newline = if rest.starts_with("\r\n") {
                2
            } else if rest.starts_with('\n') {
                1
            } else {
                0
            };
            tag.span.start..tag.span.end + newline
        })
        .collect::<Vec<_>>();
    if removals.is_empty() {
        return text.to_string();
    }

    let mut output = String::with_capacity(text.len());
    let mut cursor = 0;
    for range in removals {
        output.push_str(&text[cursor..range.start]);
        cursor = range.end;
    }
    output.push_str(&text[cursor..]);
    output
}

/// Remove every `to_remove` entry, then add each `to_add` entry not already
/// present. Order of the two phases is fixed.
pub fn apply_category_changes(text: &str, to_add: &[String], to_remove: &[String]) -> String {
    let mut output = text.to_string();
    for category in to_remove {
        output = remove_category(&output, category);
    }
    for category in to_add {
        if !has_category(&output, category) {
            output = add_category(&output, category);
        }
    }
    output
}
