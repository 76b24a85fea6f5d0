use serde::Serialize;

use crate::error::GatewayError;

pub const MAX_DETAIL_TITLES: usize = 50;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub page_id: i64,
    pub size_bytes: u64,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    pub hits: Vec<SearchHit>,
    /// Opaque token for the next page; `None` once results are exhausted.
    pub continuation: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileDetails {
    pub title: String,
    pub page_id: i64,
    pub categories: Vec<String>,
    pub thumbnail_url: Option<String>,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditAck {
    pub title: String,
    pub new_revision_id: Option<i64>,
    pub no_change: bool,
}

/// Everything the pipeline needs from the wiki. Implementations own
/// transport, authentication and tokens.
pub trait WikiGateway {
    /// Establish whatever session edits require. Called once before a batch
    /// touches any file.
    fn ensure_session(&mut self) -> Result<(), GatewayError> {
        Ok(())
    }

    fn get_page_content(&mut self, title: &str) -> Result<String, GatewayError>;

    fn edit_page(
        &mut self,
        title: &str,
        new_text: &str,
        summary: &str,
    ) -> Result<EditAck, GatewayError>;

    /// One page of title-pattern matches inside `category` (underscored
    /// form). `pattern` is already escaped for the search syntax.
    fn search_in_category(
        &mut self,
        category: &str,
        pattern: &str,
        continuation: Option<&str>,
    ) -> Result<SearchPage, GatewayError>;

    /// Details for at most [`MAX_DETAIL_TITLES`] titles. Missing pages are
    /// omitted from the result.
    fn get_file_details(&mut self, titles: &[String]) -> Result<Vec<FileDetails>, GatewayError>;

    fn request_count(&self) -> usize;
}

impl<G: WikiGateway + ?Sized> WikiGateway for &mut G {
    fn ensure_session(&mut self) -> Result<(), GatewayError> {
        (**self).ensure_session()
    }

    fn get_page_content(&mut self, title: &str) -> Result<String, GatewayError> {
        (**self).get_page_content(title)
    }

    fn edit_page(
        &mut self,
        title: &str,
        new_text: &str,
        summary: &str,
    ) -> Result<EditAck, GatewayError> {
        (**self).edit_page(title, new_text, summary)
    }

    fn search_in_category(
        &mut self,
        category: &str,
        pattern: &str,
        continuation: Option<&str>,
    ) -> Result<SearchPage, GatewayError> {
        (**self).search_in_category(category, pattern, continuation)
    }

    fn get_file_details(&mut self, titles: &[String]) -> Result<Vec<FileDetails>, GatewayError> {
        (**self).get_file_details(titles)
    }

    fn request_count(&self) -> usize {
        (**self).request_count()
    }
}
