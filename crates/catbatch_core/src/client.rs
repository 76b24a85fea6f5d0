use std::collections::BTreeMap;
use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::CatbatchConfig;
use crate::error::GatewayError;
use crate::gateway::{EditAck, FileDetails, MAX_DETAIL_TITLES, SearchHit, SearchPage, WikiGateway};

pub const NS_FILE: i32 = 6;
const SEARCH_PAGE_SIZE: usize = 500;
const THUMBNAIL_WIDTH: u32 = 120;

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_config(config: &CatbatchConfig) -> Self {
        Self {
            api_url: config.api_url(),
            user_agent: config.user_agent(),
            timeout_ms: env_value_u64("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_value_u64("WIKI_RATE_LIMIT_READ", 300),
            max_retries: env_value_usize("WIKI_HTTP_RETRIES", 2),
            retry_delay_ms: env_value_u64("WIKI_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Bot-password credentials from WIKI_BOT_USER / WIKI_BOT_PASS, if both
    /// are set and non-empty.
    pub fn from_env() -> Option<Self> {
        let username = env::var("WIKI_BOT_USER").ok()?;
        let password = env::var("WIKI_BOT_PASS").ok()?;
        if username.trim().is_empty() || password.trim().is_empty() {
            return None;
        }
        Some(Self {
            username: username.trim().to_string(),
            password: password.trim().to_string(),
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    credentials: Option<Credentials>,
    logged_in: bool,
    last_request_at: Option<Instant>,
    request_count: usize,
    csrf_token: Option<String>,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            credentials: None,
            logged_in: false,
            last_request_at: None,
            request_count: 0,
            csrf_token: None,
        })
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn api_url(&self) -> &str {
        &self.config.api_url
    }

    fn request_json_get(&mut self, params: &[(&str, String)]) -> Result<Value, GatewayError> {
        let base_url = Url::parse(&self.config.api_url).map_err(|error| {
            GatewayError::Network(format!("invalid API URL {}: {error}", self.config.api_url))
        })?;
        let pairs = request_pairs(params);

        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit();
            let response = self
                .client
                .get(base_url.clone())
                .header("User-Agent", self.config.user_agent.clone())
                .query(&pairs)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.config.max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        return Err(GatewayError::Network(format!(
                            "MediaWiki API request failed with HTTP {status}"
                        )));
                    }
                    let payload: Value = response
                        .json()
                        .map_err(|error| GatewayError::Decode(error.to_string()))?;
                    return self.check_api_error(payload);
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(GatewayError::Network(error.to_string()));
                }
            }
        }

        Err(GatewayError::Network(
            "MediaWiki API request exhausted retry budget".to_string(),
        ))
    }

    // Writes and logins go out exactly once.
    fn request_json_post(&mut self, params: &[(&str, String)]) -> Result<Value, GatewayError> {
        let pairs = request_pairs(params);
        self.apply_rate_limit();
        let response = self
            .client
            .post(&self.config.api_url)
            .header("User-Agent", self.config.user_agent.clone())
            .form(&pairs)
            .send()
            .map_err(|error| GatewayError::Network(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Network(format!(
                "MediaWiki API request failed with HTTP {status}"
            )));
        }
        let payload: Value = response
            .json()
            .map_err(|error| GatewayError::Decode(error.to_string()))?;
        self.check_api_error(payload)
    }

    fn check_api_error(&mut self, payload: Value) -> Result<Value, GatewayError> {
        let Some(error) = payload.get("error") else {
            return Ok(payload);
        };
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        if code == "badtoken" {
            self.csrf_token = None;
        }
        Err(map_api_error(code, info))
    }

    fn apply_rate_limit(&mut self) {
        let delay = Duration::from_millis(self.config.rate_limit_read_ms);
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        sleep(Duration::from_millis(base.saturating_add(jitter)));
    }

    fn login(&mut self, credentials: &Credentials) -> Result<(), GatewayError> {
        let token_response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
            ("type", "login".to_string()),
        ])?;
        let token_payload: TokenQueryResponse = decode(token_response, "login token")?;
        let login_token = token_payload
            .query
            .tokens
            .and_then(|tokens| tokens.logintoken)
            .ok_or_else(|| GatewayError::Decode("no login token in response".to_string()))?;

        let login_response = self.request_json_post(&[
            ("action", "login".to_string()),
            ("lgname", credentials.username.clone()),
            ("lgpassword", credentials.password.clone()),
            ("lgtoken", login_token),
        ])?;
        let login_payload: LoginResponse = decode(login_response, "login")?;
        match login_payload.login.result.as_deref() {
            Some("Success") => {
                self.logged_in = true;
                self.csrf_token = None;
                Ok(())
            }
            other => Err(GatewayError::Permission(format!(
                "login failed for {}: {}",
                credentials.username,
                login_payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string())
            ))),
        }
    }

    fn ensure_csrf_token(&mut self) -> Result<String, GatewayError> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
        ])?;
        let parsed: TokenQueryResponse = decode(response, "csrf token")?;
        let token = parsed
            .query
            .tokens
            .and_then(|tokens| tokens.csrftoken)
            .ok_or_else(|| GatewayError::Decode("no csrf token in response".to_string()))?;
        self.csrf_token = Some(token.clone());
        Ok(token)
    }
}

impl WikiGateway for MediaWikiClient {
    fn ensure_session(&mut self) -> Result<(), GatewayError> {
        if !self.logged_in
            && let Some(credentials) = self.credentials.clone()
        {
            self.login(&credentials)?;
        }
        self.ensure_csrf_token().map(|_| ())
    }

    fn get_page_content(&mut self, title: &str) -> Result<String, GatewayError> {
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("titles", title.to_string()),
            ("prop", "revisions".to_string()),
            ("rvprop", "content".to_string()),
            ("rvslots", "main".to_string()),
        ])?;
        parse_page_content(title, response)
    }

    fn edit_page(
        &mut self,
        title: &str,
        new_text: &str,
        summary: &str,
    ) -> Result<EditAck, GatewayError> {
        let token = self.ensure_csrf_token()?;
        let params = edit_params(title, new_text, summary, self.logged_in, token);
        let response = self.request_json_post(&params)?;
        let ack = parse_edit_ack(title, response)?;
        debug!(file = %title, revision = ?ack.new_revision_id, "edit saved");
        Ok(ack)
    }

    fn search_in_category(
        &mut self,
        category: &str,
        pattern: &str,
        continuation: Option<&str>,
    ) -> Result<SearchPage, GatewayError> {
        let mut params = vec![
            ("action", "query".to_string()),
            ("list", "search".to_string()),
            ("srsearch", search_expression(category, pattern)),
            ("srnamespace", NS_FILE.to_string()),
            ("srprop", "size|timestamp".to_string()),
            ("srlimit", SEARCH_PAGE_SIZE.to_string()),
        ];
        if let Some(offset) = continuation {
            params.push(("sroffset", offset.to_string()));
        }
        let response = self.request_json_get(&params)?;
        parse_search_page(response)
    }

    fn get_file_details(&mut self, titles: &[String]) -> Result<Vec<FileDetails>, GatewayError> {
        if titles.len() > MAX_DETAIL_TITLES {
            return Err(GatewayError::Api {
                code: "toomanyvalues".to_string(),
                info: format!(
                    "{} titles requested, at most {MAX_DETAIL_TITLES} allowed",
                    titles.len()
                ),
            });
        }
        let mut details = DetailAccumulator::default();
        let mut continue_params: Vec<(String, String)> = Vec::new();

        loop {
            let response = {
                let mut params = vec![
                    ("action", "query".to_string()),
                    ("titles", titles.join("|")),
                    ("prop", "categories|imageinfo".to_string()),
                    ("cllimit", "max".to_string()),
                    ("iiprop", "url|size".to_string()),
                    ("iiurlwidth", THUMBNAIL_WIDTH.to_string()),
                ];
                for (key, value) in &continue_params {
                    params.push((key.as_str(), value.clone()));
                }
                self.request_json_get(&params)?
            };

            let parsed: QueryResponse = decode(response, "file details")?;
            for page in parsed.query.pages {
                details.merge(page);
            }
            match parsed.continuation {
                Some(continuation) if !continuation.is_empty() => {
                    continue_params = continuation_params(&continuation);
                }
                _ => break,
            }
        }

        Ok(details.into_details())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

/// `incategory:"Cat_name" intitle:"pattern"`; both arguments must already be
/// normalized and escaped.
pub fn search_expression(category: &str, pattern: &str) -> String {
    if pattern.is_empty() {
        format!("incategory:\"{category}\"")
    } else {
        format!("incategory:\"{category}\" intitle:\"{pattern}\"")
    }
}

pub fn map_api_error(code: &str, info: &str) -> GatewayError {
    match code {
        "missingtitle" | "nosuchpageid" | "invalidtitle" => GatewayError::NotFound(info.to_string()),
        "editconflict" => GatewayError::EditConflict(info.to_string()),
        "permissiondenied" | "protectedpage" | "cascadeprotected" | "protectednamespace"
        | "blocked" | "autoblocked" | "badtoken" | "notloggedin" | "assertuserfailed"
        | "assertbotfailed" | "readonly" | "writeapidenied" => {
            GatewayError::Permission(format!("{code}: {info}"))
        }
        _ => GatewayError::Api {
            code: code.to_string(),
            info: info.to_string(),
        },
    }
}

// `text` goes out even when empty: removing the only tag can blank a page.
fn edit_params(
    title: &str,
    new_text: &str,
    summary: &str,
    logged_in: bool,
    token: String,
) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("action", "edit".to_string()),
        ("title", title.to_string()),
        ("text", new_text.to_string()),
        ("summary", summary.to_string()),
        ("nocreate", "1".to_string()),
        ("watchlist", "nochange".to_string()),
    ];
    if logged_in {
        params.push(("assert", "user".to_string()));
    }
    params.push(("token", token));
    params
}

fn parse_page_content(title: &str, response: Value) -> Result<String, GatewayError> {
    let parsed: QueryResponse = decode(response, "page content")?;
    let page = parsed
        .query
        .pages
        .into_iter()
        .next()
        .ok_or_else(|| GatewayError::NotFound(title.to_string()))?;
    if page.missing.unwrap_or(false) || page.invalid.unwrap_or(false) {
        return Err(GatewayError::NotFound(title.to_string()));
    }
    page.revisions
        .into_iter()
        .next()
        .and_then(|revision| revision.slots)
        .and_then(|slots| slots.main)
        .and_then(|slot| slot.content)
        .ok_or_else(|| GatewayError::Decode(format!("no main-slot content for {title}")))
}

fn parse_edit_ack(title: &str, response: Value) -> Result<EditAck, GatewayError> {
    let parsed: EditResponse = decode(response, "edit")?;
    let edit = parsed
        .edit
        .ok_or_else(|| GatewayError::Decode("missing edit payload in API response".to_string()))?;
    if edit.result.as_deref() != Some("Success") {
        return Err(GatewayError::Api {
            code: "editfailed".to_string(),
            info: format!(
                "edit of {title} returned {}",
                edit.result.unwrap_or_else(|| "no result".to_string())
            ),
        });
    }
    Ok(EditAck {
        title: edit.title.unwrap_or_else(|| title.to_string()),
        new_revision_id: edit.newrevid,
        no_change: edit.nochange.unwrap_or(false),
    })
}

fn parse_search_page(response: Value) -> Result<SearchPage, GatewayError> {
    let parsed: QueryResponse = decode(response, "search")?;
    let hits = parsed
        .query
        .search
        .into_iter()
        .map(|item| SearchHit {
            title: item.title,
            page_id: item.pageid,
            size_bytes: item.size.unwrap_or(0),
            timestamp: item.timestamp,
        })
        .collect();
    let continuation = parsed
        .continuation
        .and_then(|mut continuation| continuation.remove("sroffset"))
        .map(|offset| value_to_param(&offset));
    Ok(SearchPage { hits, continuation })
}

#[derive(Default)]
struct DetailAccumulator {
    order: Vec<String>,
    by_title: BTreeMap<String, FileDetails>,
}

impl DetailAccumulator {
    fn merge(&mut self, page: PageQueryItem) {
        if page.missing.unwrap_or(false) || page.invalid.unwrap_or(false) {
            return;
        }
        let entry = self.by_title.entry(page.title.clone()).or_insert_with(|| {
            self.order.push(page.title.clone());
            FileDetails {
                title: page.title.clone(),
                page_id: page.pageid.unwrap_or(0),
                categories: Vec::new(),
                thumbnail_url: None,
                size_bytes: 0,
            }
        });
        for category in page.categories {
            if !entry.categories.contains(&category.title) {
                entry.categories.push(category.title);
            }
        }
        if let Some(info) = page.imageinfo.into_iter().next() {
            if entry.thumbnail_url.is_none() {
                entry.thumbnail_url = info.thumburl.or(info.url);
            }
            if let Some(size) = info.size {
                entry.size_bytes = size;
            }
        }
    }

    fn into_details(mut self) -> Vec<FileDetails> {
        self.order
            .iter()
            .filter_map(|title| self.by_title.remove(title))
            .collect()
    }
}

fn continuation_params(continuation: &BTreeMap<String, Value>) -> Vec<(String, String)> {
    continuation
        .iter()
        .map(|(key, value)| (key.clone(), value_to_param(value)))
        .collect()
}

fn value_to_param(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn request_pairs(params: &[(&str, String)]) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len() + 2);
    pairs.push(("format".to_string(), "json".to_string()));
    pairs.push(("formatversion".to_string(), "2".to_string()));
    for (key, value) in params {
        pairs.push(((*key).to_string(), value.clone()));
    }
    pairs
}

fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T, GatewayError> {
    serde_json::from_value(value)
        .map_err(|error| GatewayError::Decode(format!("{what} response: {error}")))
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
    #[serde(rename = "continue")]
    continuation: Option<BTreeMap<String, Value>>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    pages: Vec<PageQueryItem>,
    #[serde(default)]
    search: Vec<SearchQueryItem>,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    pageid: Option<i64>,
    title: String,
    missing: Option<bool>,
    invalid: Option<bool>,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
    #[serde(default)]
    categories: Vec<CategoryQueryItem>,
    #[serde(default)]
    imageinfo: Vec<ImageInfoItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CategoryQueryItem {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ImageInfoItem {
    size: Option<u64>,
    url: Option<String>,
    thumburl: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchQueryItem {
    title: String,
    pageid: i64,
    size: Option<u64>,
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct EditPayload {
    result: Option<String>,
    title: Option<String>,
    newrevid: Option<i64>,
    nochange: Option<bool>,
}
