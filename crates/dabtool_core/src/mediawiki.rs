use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::DabtoolConfig;
use crate::wikitext::normalize_title;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleRevision {
    pub title: String,
    pub revision_id: i64,
    pub timestamp: String,
    pub content: String,
}

/// Pages returned for a set of requested titles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageBatch {
    pub pages: Vec<ArticleRevision>,
    /// Requested title to the title it redirects to, both normalized.
    pub redirects: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageEdit<'a> {
    pub title: &'a str,
    pub content: &'a str,
    pub summary: &'a str,
    /// Timestamp of the revision the edit was based on; lets the wiki detect
    /// edit conflicts.
    pub base_timestamp: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    pub title: String,
    pub new_revision_id: Option<i64>,
    pub new_timestamp: Option<String>,
    pub no_change: bool,
}

pub trait WikiReadApi {
    fn fetch_article(&mut self, title: &str) -> Result<ArticleRevision>;
    fn fetch_pages(&mut self, titles: &[String]) -> Result<PageBatch>;
    /// Titles linked from `title` that are disambiguation pages, including
    /// redirects that resolve to one.
    fn disambiguation_links(&mut self, title: &str) -> Result<BTreeSet<String>>;
    fn request_count(&self) -> usize;
}

pub trait WikiWriteApi: WikiReadApi {
    fn login(&mut self, username: &str, password: &str) -> Result<()>;
    fn edit_page(&mut self, edit: &PageEdit<'_>) -> Result<EditOutcome>;
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub disambiguation_templates: Vec<String>,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_config(config: &DabtoolConfig) -> Self {
        Self {
            api_url: config.api_url(),
            user_agent: config.user_agent(),
            disambiguation_templates: config.disambiguation_templates(),
            timeout_ms: env_value_u64("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_value_u64("WIKI_RATE_LIMIT_READ", 100),
            rate_limit_write_ms: env_value_u64("WIKI_RATE_LIMIT_WRITE", 1_000),
            max_retries: env_value_usize("WIKI_HTTP_RETRIES", 2),
            max_write_retries: env_value_usize("WIKI_HTTP_WRITE_RETRIES", 1),
            retry_delay_ms: env_value_u64("WIKI_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
    csrf_token: Option<String>,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
            csrf_token: None,
        })
    }

    fn get(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let url = Url::parse(&self.config.api_url)
            .with_context(|| format!("invalid WIKI_API_URL: {}", self.config.api_url))?;
        let pairs = api_pairs(params);
        let retries = self.config.max_retries;
        self.send(retries, false, |client| client.get(url.clone()).query(&pairs))
    }

    fn post(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let url = self.config.api_url.clone();
        let pairs = api_pairs(params);
        let retries = self.config.max_write_retries;
        self.send(retries, true, |client| client.post(url.as_str()).form(&pairs))
    }

    /// Send the request built by `build`, retrying transient failures up to
    /// `retries` times.
    fn send<F>(&mut self, retries: usize, is_write: bool, build: F) -> Result<Value>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut attempt = 0usize;
        loop {
            self.throttle(is_write);
            match build(&self.client).send() {
                Ok(response) if response.status().is_success() => {
                    let payload: Value = response
                        .json()
                        .context("failed to decode MediaWiki API JSON response")?;
                    return check_api_error(payload);
                }
                Ok(response) => {
                    let status = response.status();
                    if attempt >= retries || !is_retryable_status(status) {
                        bail!("MediaWiki API request failed with HTTP {status}");
                    }
                    debug!(%status, attempt, "retrying MediaWiki request");
                }
                Err(error) => {
                    if attempt >= retries || !is_retryable_error(&error) {
                        return Err(error).context("failed to call MediaWiki API");
                    }
                    debug!(%error, attempt, "retrying MediaWiki request");
                }
            }
            sleep(retry_delay(self.config.retry_delay_ms, attempt, is_write));
            attempt += 1;
        }
    }

    fn throttle(&mut self, is_write: bool) {
        let interval = Duration::from_millis(if is_write {
            self.config.rate_limit_write_ms
        } else {
            self.config.rate_limit_read_ms
        });
        if let Some(wait) = self
            .last_request_at
            .and_then(|last| interval.checked_sub(last.elapsed()))
        {
            sleep(wait);
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    /// Fetch a `login` or `csrf` token.
    fn token(&mut self, kind: &str) -> Result<String> {
        let response = self.get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
            ("type", kind.to_string()),
        ])?;
        let parsed: TokenQueryResponse = serde_json::from_value(response)
            .with_context(|| format!("failed to decode {kind} token response"))?;
        parsed
            .query
            .tokens
            .get(&format!("{kind}token"))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki {kind} token"))
    }

    fn csrf_token(&mut self) -> Result<String> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let token = self.token("csrf")?;
        self.csrf_token = Some(token.clone());
        Ok(token)
    }
}

impl WikiReadApi for MediaWikiClient {
    fn fetch_article(&mut self, title: &str) -> Result<ArticleRevision> {
        self.fetch_pages(&[title.to_string()])?
            .pages
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("article not found on wiki: {title}"))
    }

    fn fetch_pages(&mut self, titles: &[String]) -> Result<PageBatch> {
        let mut batch = PageBatch::default();
        for chunk in titles.chunks(50) {
            let response = self.get(&[
                ("action", "query".to_string()),
                ("titles", chunk.join("|")),
                ("redirects", "1".to_string()),
                ("prop", "revisions".to_string()),
                ("rvprop", "content|timestamp|ids".to_string()),
                ("rvslots", "main".to_string()),
            ])?;
            let parsed: RevisionQueryResponse = serde_json::from_value(response)
                .context("failed to decode page content API response")?;
            batch.absorb(parsed.query);
        }
        Ok(batch)
    }

    fn disambiguation_links(&mut self, title: &str) -> Result<BTreeSet<String>> {
        let templates = self.config.disambiguation_templates.join("|");
        let mut collected = DisambiguationLinks::default();
        let mut continuation: BTreeMap<String, String> = BTreeMap::new();

        loop {
            let mut params: Vec<(&str, String)> = vec![
                ("action", "query".to_string()),
                ("titles", title.to_string()),
                ("generator", "links".to_string()),
                ("gpllimit", "max".to_string()),
                ("gplnamespace", "0".to_string()),
                ("redirects", "1".to_string()),
                ("prop", "templates".to_string()),
                ("tllimit", "max".to_string()),
                ("tlnamespace", "10".to_string()),
                ("tltemplates", templates.clone()),
            ];
            for (key, value) in &continuation {
                params.push((key.as_str(), value.clone()));
            }
            let response = self.get(&params)?;
            drop(params);
            let parsed: LinkQueryResponse = serde_json::from_value(response)
                .context("failed to decode article links API response")?;
            collected.absorb(parsed.query);

            match parsed.continuation {
                Some(next) => {
                    continuation = continuation_params(next);
                    debug!(title, ?continuation, "continuing link query");
                }
                None => break,
            }
        }

        Ok(collected.finish())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

impl WikiWriteApi for MediaWikiClient {
    fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let login_token = self.token("login")?;
        let response = self.post(&[
            ("action", "login".to_string()),
            ("lgname", username.to_string()),
            ("lgpassword", password.to_string()),
            ("lgtoken", login_token),
        ])?;
        let parsed: LoginResponse =
            serde_json::from_value(response).context("failed to decode login response")?;
        if parsed.login.result.as_deref() != Some("Success") {
            bail!(
                "MediaWiki login failed: {}",
                parsed
                    .login
                    .reason
                    .or(parsed.login.result)
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }
        // tokens are bound to the session cookie
        self.csrf_token = None;
        Ok(())
    }

    fn edit_page(&mut self, edit: &PageEdit<'_>) -> Result<EditOutcome> {
        let token = self.csrf_token()?;
        let mut params = vec![
            ("action", "edit".to_string()),
            ("title", edit.title.to_string()),
            ("text", edit.content.to_string()),
            ("summary", edit.summary.to_string()),
            ("nocreate", "1".to_string()),
        ];
        if let Some(timestamp) = edit.base_timestamp {
            params.push(("basetimestamp", timestamp.to_string()));
        }
        // token goes last so truncated POST bodies fail token validation
        params.push(("token", token));

        let response = self.post(&params)?;
        let edit_payload: EditResponse =
            serde_json::from_value(response).context("failed to decode edit response")?;
        edit_outcome(edit.title, edit_payload)
    }
}

/// Read WIKI_BOT_USER / WIKI_BOT_PASS for a bot-password login.
pub fn credentials_from_env() -> Result<(String, String)> {
    let username = env::var("WIKI_BOT_USER")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("WIKI_BOT_USER is required to save edits"))?;
    let password = env::var("WIKI_BOT_PASS")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("WIKI_BOT_PASS is required to save edits"))?;
    Ok((username.trim().to_string(), password.trim().to_string()))
}

#[derive(Debug, Default)]
struct DisambiguationLinks {
    titles: BTreeSet<String>,
    redirects: BTreeMap<String, BTreeSet<String>>,
}

impl DisambiguationLinks {
    fn absorb(&mut self, payload: LinkQueryPayload) {
        for redirect in payload.redirects {
            self.redirects
                .entry(normalize_title(&redirect.to))
                .or_default()
                .insert(normalize_title(&redirect.from));
        }
        for page in payload.pages {
            // a page may show up once per continuation batch; only some
            // batches carry its templates
            if page.templates.is_empty() || page.title.ends_with(" (disambiguation)") {
                continue;
            }
            self.titles.insert(normalize_title(&page.title));
        }
    }

    fn finish(self) -> BTreeSet<String> {
        let mut titles = self.titles;
        let sources = titles
            .iter()
            .filter_map(|title| self.redirects.get(title))
            .flatten()
            .cloned()
            .collect::<Vec<_>>();
        titles.extend(sources);
        titles
    }
}

impl PageBatch {
    fn absorb(&mut self, payload: RevisionQueryPayload) {
        for redirect in payload.redirects {
            self.redirects
                .insert(normalize_title(&redirect.from), normalize_title(&redirect.to));
        }
        for page in payload.pages {
            if page.missing.unwrap_or(false) {
                continue;
            }
            let Some(revision) = page.revisions.into_iter().next() else {
                continue;
            };
            let Some(content) = revision.slots.and_then(|slots| slots.main).map(|slot| slot.content)
            else {
                continue;
            };
            self.pages.push(ArticleRevision {
                title: page.title,
                revision_id: revision.revid,
                timestamp: revision.timestamp,
                content,
            });
        }
    }

    /// Requested titles that resolved to `title` through a redirect.
    pub fn redirects_to<'a>(&'a self, title: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.redirects
            .iter()
            .filter(move |(_, target)| target.as_str() == title)
            .map(|(source, _)| source.as_str())
    }
}

fn edit_outcome(title: &str, payload: EditResponse) -> Result<EditOutcome> {
    let edit = payload
        .edit
        .ok_or_else(|| anyhow::anyhow!("missing edit payload in API response"))?;
    if edit.result.as_deref() != Some("Success") {
        bail!(
            "MediaWiki edit failed for {}: {}",
            title,
            edit.info
                .or(edit.result)
                .unwrap_or_else(|| "unknown".to_string())
        );
    }
    Ok(EditOutcome {
        title: edit.title.unwrap_or_else(|| title.to_string()),
        new_revision_id: edit.newrevid,
        new_timestamp: edit.newtimestamp,
        no_change: edit.nochange.unwrap_or(false),
    })
}

fn continuation_params(next: Map<String, Value>) -> BTreeMap<String, String> {
    next.into_iter()
        .filter_map(|(key, value)| match value {
            Value::String(text) => Some((key, text)),
            Value::Number(number) => Some((key, number.to_string())),
            _ => None,
        })
        .collect()
}

fn api_pairs(params: &[(&str, String)]) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len() + 2);
    pairs.push(("format".to_string(), "json".to_string()));
    pairs.push(("formatversion".to_string(), "2".to_string()));
    for (key, value) in params {
        if !value.is_empty() {
            pairs.push(((*key).to_string(), value.clone()));
        }
    }
    pairs
}

fn check_api_error(payload: Value) -> Result<Value> {
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        bail!("MediaWiki API error [{code}]: {info}");
    }
    Ok(payload)
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

/// Exponential backoff with up to 100ms of jitter; writes back off twice as
/// long.
fn retry_delay(base_ms: u64, attempt: usize, is_write: bool) -> Duration {
    let factor = 1u64 << attempt.min(10);
    let scale = if is_write { 2 } else { 1 };
    let jitter = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|now| u64::from(now.subsec_millis() % 100))
        .unwrap_or(0);
    Duration::from_millis(
        base_ms
            .saturating_mul(factor)
            .saturating_mul(scale)
            .saturating_add(jitter),
    )
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
struct RevisionQueryResponse {
    #[serde(default)]
    query: RevisionQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct RevisionQueryPayload {
    #[serde(default)]
    pages: Vec<PageQueryItem>,
    #[serde(default)]
    redirects: Vec<RedirectItem>,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    title: String,
    missing: Option<bool>,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    revid: i64,
    timestamp: String,
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct LinkQueryResponse {
    #[serde(default)]
    query: LinkQueryPayload,
    #[serde(default, rename = "continue")]
    continuation: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize, Default)]
struct LinkQueryPayload {
    #[serde(default)]
    pages: Vec<LinkedPageItem>,
    #[serde(default)]
    redirects: Vec<RedirectItem>,
}

#[derive(Debug, Deserialize)]
struct LinkedPageItem {
    title: String,
    #[serde(default)]
    templates: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RedirectItem {
    from: String,
    to: String,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    #[serde(default)]
    tokens: BTreeMap<String, String>,
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
    info: Option<String>,
    title: Option<String>,
    newrevid: Option<i64>,
    newtimestamp: Option<String>,
    nochange: Option<bool>,
}
