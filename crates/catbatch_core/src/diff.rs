use similar::{ChangeTag, TextDiff};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDiff {
    pub title: String,
    pub unified: String,
    pub additions: usize,
    pub removals: usize,
}

impl ContentDiff {
    pub fn is_empty(&self) -> bool {
        self.additions == 0 && self.removals == 0
    }
}

/// Unified diff of a page's text before and after a category transform.
pub fn render_content_diff(title: &str, before: &str, after: &str) -> ContentDiff {
    let text_diff = TextDiff::from_lines(before, after);

    let mut additions = 0;
    let mut removals = 0;
    for change in text_diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => additions += 1,
            ChangeTag::Delete => removals += 1,
            ChangeTag::Equal => {}
        }
    }

    let unified = if additions == 0 && removals == 0 {
        String::new()
    } else {
        text_diff
            .unified_diff()
            .context_radius(3)
            .header(&format!("a/{title}"), &format!("b/{title}"))
            .to_string()
    };

    ContentDiff {
        title: title.to_string(),
        unified,
        additions,
        removals,
    }
}
