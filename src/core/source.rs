//! Content source integration.
//!
//! Documents come from a Confluence-style REST API keyed by space and
//! optional page id. Page bodies arrive in storage format (XHTML) and are
//! flattened to markdown-ish text before summarization.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;

use crate::config::SourceConfig;
use crate::error::{DigestError, Result};

const PAGE_EXPAND: &str = "body.storage,version,space,history";
const PAGE_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub id: String,
    pub title: String,
    pub scope_key: String,
    pub revision: Option<u64>,
    pub created_at: Option<String>,
    pub modified_at: Option<String>,
    pub author: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    /// Raw page body as delivered by the source
    pub content: String,
    pub metadata: DocumentMetadata,
}

/// Provider of versioned documents
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fetch one page (optionally with its children) or every page of a space
    async fn fetch(
        &self,
        scope_key: &str,
        page_id: Option<&str>,
        include_children: bool,
    ) -> Result<Vec<SourceDocument>>;
}

#[derive(Debug, Deserialize)]
struct PageResponse {
    id: String,
    title: String,
    #[serde(default)]
    space: Option<SpaceRef>,
    #[serde(default)]
    version: Option<VersionRef>,
    #[serde(default)]
    history: Option<HistoryRef>,
    #[serde(default)]
    body: Option<BodyRef>,
}

#[derive(Debug, Deserialize)]
struct SpaceRef {
    key: String,
}

#[derive(Debug, Deserialize)]
struct VersionRef {
    number: u64,
    #[serde(default)]
    when: Option<String>,
    #[serde(default)]
    by: Option<UserRef>,
}

#[derive(Debug, Deserialize)]
struct UserRef {
    #[serde(rename = "displayName", default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryRef {
    #[serde(rename = "createdDate", default)]
    created_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BodyRef {
    #[serde(default)]
    storage: Option<StorageRef>,
}

#[derive(Debug, Deserialize)]
struct StorageRef {
    value: String,
}

#[derive(Debug, Deserialize)]
struct PageList {
    results: Vec<PageResponse>,
}

/// Confluence Cloud REST client
pub struct ConfluenceSource {
    config: SourceConfig,
    client: reqwest::Client,
}

impl ConfluenceSource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        if config.api_token.is_none() {
            return Err(DigestError::Config(
                "Confluence API token not set".to_string(),
            ));
        }

        Ok(Self {
            config: config.clone(),
            client: reqwest::Client::new(),
        })
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn to_document(&self, page: PageResponse, fallback_scope: &str) -> SourceDocument {
        let scope_key = page
            .space
            .map(|s| s.key)
            .unwrap_or_else(|| fallback_scope.to_string());
        let url = format!("{}/wiki/spaces/{}/pages/{}", self.base(), scope_key, page.id);
        let (revision, modified_at, author) = match page.version {
            Some(v) => (Some(v.number), v.when, v.by.and_then(|u| u.display_name)),
            None => (None, None, None),
        };

        SourceDocument {
            content: page
                .body
                .and_then(|b| b.storage)
                .map(|s| s.value)
                .unwrap_or_default(),
            metadata: DocumentMetadata {
                id: page.id,
                title: page.title,
                scope_key,
                revision,
                created_at: page.history.and_then(|h| h.created_date),
                modified_at,
                author,
                url,
            },
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .basic_auth(&self.config.username, self.config.api_token.as_deref())
            .query(query)
            .send()
            .await
            .map_err(|e| DigestError::Fetch(format!("request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(DigestError::Fetch(format!(
                "Confluence API error {}: {}",
                status, error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| DigestError::Fetch(format!("Failed to parse Confluence response: {}", e)))
    }

    async fn get_all(&self, url: &str, mut query: Vec<(&str, String)>) -> Result<Vec<PageResponse>> {
        let mut pages = Vec::new();
        query.push(("limit", PAGE_LIMIT.to_string()));
        loop {
            let mut paged = query.clone();
            paged.push(("start", pages.len().to_string()));
            let batch: PageList = self.get_json(url, &paged).await?;
            let count = batch.results.len();
            pages.extend(batch.results);
            if count < PAGE_LIMIT {
                break;
            }
        }
        Ok(pages)
    }
}

#[async_trait]
impl ContentSource for ConfluenceSource {
    async fn fetch(
        &self,
        scope_key: &str,
        page_id: Option<&str>,
        include_children: bool,
    ) -> Result<Vec<SourceDocument>> {
        let expand = ("expand", PAGE_EXPAND.to_string());
        let mut pages = Vec::new();

        match page_id {
            Some(id) => {
                let url = format!("{}/wiki/rest/api/content/{}", self.base(), id);
                pages.push(self.get_json::<PageResponse>(&url, &[expand.clone()]).await?);

                if include_children {
                    let url = format!("{}/wiki/rest/api/content/{}/child/page", self.base(), id);
                    pages.extend(self.get_all(&url, vec![expand]).await?);
                }
            }
            None => {
                let url = format!("{}/wiki/rest/api/content", self.base());
                let query = vec![
                    ("spaceKey", scope_key.to_string()),
                    ("type", "page".to_string()),
                    expand,
                ];
                pages.extend(self.get_all(&url, query).await?);
            }
        }

        Ok(pages
            .into_iter()
            .map(|page| self.to_document(page, scope_key))
            .collect())
    }
}

struct StoragePatterns {
    heading: Regex,
    breaks: Regex,
    list_item: Regex,
    tags: Regex,
    blank_runs: Regex,
}

fn storage_patterns() -> &'static StoragePatterns {
    static PATTERNS: OnceLock<StoragePatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| StoragePatterns {
        heading: Regex::new(r"(?i)<h([1-6])[^>]*>").expect("heading pattern is valid"),
        breaks: Regex::new(r"(?i)<br\s*/?>|</(p|h[1-6]|li|tr|div|pre|blockquote)>")
            .expect("break pattern is valid"),
        list_item: Regex::new(r"(?i)<li[^>]*>").expect("list pattern is valid"),
        tags: Regex::new(r"<[^>]+>").expect("tag pattern is valid"),
        blank_runs: Regex::new(r"\n{3,}").expect("blank line pattern is valid"),
    })
}

/// Flatten storage-format markup into plain text, keeping headings and
/// list items in markdown form.
pub fn storage_to_text(storage: &str) -> String {
    let StoragePatterns {
        heading,
        breaks,
        list_item,
        tags,
        blank_runs,
    } = storage_patterns();

    let text = heading.replace_all(storage, |caps: &regex::Captures| {
        let level: usize = caps[1].parse().unwrap_or(2);
        format!("\n{} ", "#".repeat(level))
    });
    let text = breaks.replace_all(&text, "\n");
    let text = list_item.replace_all(&text, "- ");
    let text = tags.replace_all(&text, "");

    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    let text: Vec<&str> = text.lines().map(str::trim_end).collect();
    blank_runs.replace_all(text.join("\n").trim(), "\n\n").into_owned()
}
