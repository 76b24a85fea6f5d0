use std::collections::BTreeMap;

use crate::error::GatewayError;
use crate::gateway::{EditAck, FileDetails, SearchPage, WikiGateway};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEdit {
    pub title: String,
    pub text: String,
    pub summary: String,
}

/// Scripted in-memory wiki for pipeline tests.
#[derive(Debug, Default)]
pub struct MockGateway {
    pub pages: BTreeMap<String, String>,
    pub read_failures: BTreeMap<String, GatewayError>,
    pub edit_failures: BTreeMap<String, GatewayError>,
    pub session_failure: Option<GatewayError>,
    /// Page `n` is served for continuation token `n` (none => page 0).
    pub search_pages: Vec<SearchPage>,
    pub details: BTreeMap<String, FileDetails>,
    pub edits: Vec<RecordedEdit>,
    pub reads: Vec<String>,
    pub search_calls: Vec<(String, String, Option<String>)>,
    pub detail_calls: Vec<Vec<String>>,
    pub session_calls: usize,
    pub request_count: usize,
}

impl MockGateway {
    pub fn with_pages(pages: &[(&str, &str)]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(title, text)| (title.to_string(), text.to_string()))
                .collect(),
            ..Self::default()
        }
    }
}

impl WikiGateway for MockGateway {
    fn ensure_session(&mut self) -> Result<(), GatewayError> {
        self.session_calls += 1;
        match &self.session_failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn get_page_content(&mut self, title: &str) -> Result<String, GatewayError> {
        self.request_count += 1;
        self.reads.push(title.to_string());
        if let Some(error) = self.read_failures.get(title) {
            return Err(error.clone());
        }
        self.pages
            .get(title)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(title.to_string()))
    }

    fn edit_page(
        &mut self,
        title: &str,
        new_text: &str,
        summary: &str,
    ) -> Result<EditAck, GatewayError> {
        self.request_count += 1;
        if let Some(error) = self.edit_failures.get(title) {
            return Err(error.clone());
        }
        self.pages.insert(title.to_string(), new_text.to_string());
        self.edits.push(RecordedEdit {
            title: title.to_string(),
            text: new_text.to_string(),
            summary: summary.to_string(),
        });
        Ok(EditAck {
            title: title.to_string(),
            new_revision_id: Some(i64::try_from(self.edits.len()).unwrap_or_default()),
            no_change: false,
        })
    }

    fn search_in_category(
        &mut self,
        category: &str,
        pattern: &str,
        continuation: Option<&str>,
    ) -> Result<SearchPage, GatewayError> {
        self.request_count += 1;
        self.search_calls.push((
            category.to_string(),
            pattern.to_string(),
            continuation.map(ToString::to_string),
        ));
        let index = match continuation {
            Some(token) => token
                .parse::<usize>()
                .map_err(|error| GatewayError::Decode(error.to_string()))?,
            None => 0,
        };
        Ok(self.search_pages.get(index).cloned().unwrap_or_default())
    }

    fn get_file_details(&mut self, titles: &[String]) -> Result<Vec<FileDetails>, GatewayError> {
        self.request_count += 1;
        self.detail_calls.push(titles.to_vec());
        Ok(titles
            .iter()
            .filter_map(|title| self.details.get(title).cloned())
            .collect())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}
