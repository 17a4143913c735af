//! Catalog source: paged, keyword-sorted queries against the arXiv export
//! API, normalized into [`Paper`] records.
//!
//! The export endpoint speaks Atom; entries are deserialized with quick-xml
//! and normalized here: short id with the version suffix stripped, URL
//! rewritten to the canonical `abs/<id>` form, authors comma-joined, dates
//! reduced to calendar days.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::TopicList;
use crate::dag::{encode, Operator};
use crate::error::{PipelineError, Result};
use crate::model::{canonical_id, Paper};
use crate::retry::{with_retry, RetryPolicy};

const ARXIV_EXPORT_URL: &str = "http://export.arxiv.org/api/query";
const ARXIV_ABS_URL: &str = "http://arxiv.org/abs/";

/// How many times an empty result set is re-queried when
/// `retry_when_empty` is on.
const EMPTY_RETRY_CAP: u32 = 10;

/// Fetches one page of papers for a topic expression.
#[derive(Debug)]
pub struct ArxivSource {
    client: reqwest::Client,
    endpoint: String,
    query: String,
    search_offset: usize,
    search_limit: usize,
    retry_when_empty: bool,
}

impl ArxivSource {
    pub fn new(topic: &TopicList, search_offset: usize, search_limit: usize) -> Result<Self> {
        if topic.is_empty() {
            return Err(PipelineError::config("arxiv_topic_list is empty"));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("paperflow/0.1")
            .build()?;
        Ok(Self {
            client,
            endpoint: ARXIV_EXPORT_URL.to_string(),
            query: build_query(topic),
            search_offset,
            search_limit,
            retry_when_empty: false,
        })
    }

    /// Point the source at a different endpoint (tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Re-query when the catalog returns nothing, up to a bounded cap.
    pub fn retry_when_empty(mut self, retry: bool) -> Self {
        self.retry_when_empty = retry;
        self
    }

    async fn fetch_once(&self) -> Result<Vec<Paper>> {
        let max_results = (self.search_offset + self.search_limit).to_string();
        let response = with_retry(RetryPolicy::catalog(), "catalog query", || {
            self.client
                .get(&self.endpoint)
                .query(&[
                    ("search_query", self.query.as_str()),
                    ("start", "0"),
                    ("max_results", max_results.as_str()),
                    ("sortBy", "submittedDate"),
                    ("sortOrder", "descending"),
                ])
                .send()
        })
        .await?;

        if !response.status().is_success() {
            return Err(PipelineError::Catalog(format!(
                "export API returned {}",
                response.status()
            )));
        }

        let body = response.text().await?;
        let papers = parse_feed(&body)?;
        Ok(apply_window(papers, self.search_offset, self.search_limit))
    }
}

#[async_trait]
impl Operator for ArxivSource {
    fn name(&self) -> &str {
        "ArxivSource"
    }

    async fn process(&self, _input: Value) -> Result<Value> {
        info!(
            "querying catalog: query='{}', offset={}, limit={}",
            self.query, self.search_offset, self.search_limit
        );

        let mut papers = self.fetch_once().await?;
        if papers.is_empty() && self.retry_when_empty {
            for attempt in 1..=EMPTY_RETRY_CAP {
                warn!("catalog returned no papers, retry {attempt}/{EMPTY_RETRY_CAP}");
                papers = self.fetch_once().await?;
                if !papers.is_empty() {
                    break;
                }
            }
        }

        info!("catalog returned {} papers", papers.len());
        encode(&papers)
    }
}

/// Normalize a topic expression into a catalog query string.
///
/// Lists are quoted and OR-joined; a single phrase is quoted unless it
/// already carries an explicit ` OR `.
fn build_query(topic: &TopicList) -> String {
    match topic {
        TopicList::Many(topics) => topics
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR "),
        TopicList::One(topic) => {
            if topic.contains(" OR ") {
                topic.clone()
            } else {
                format!("\"{topic}\"")
            }
        }
    }
}

/// Skip `offset` entries, keep at most `limit`.
fn apply_window(papers: Vec<Paper>, offset: usize, limit: usize) -> Vec<Paper> {
    papers.into_iter().skip(offset).take(limit).collect()
}

// ---------------------------------------------------------------------------
// Atom feed deserialization
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(rename = "entry", default)]
    entries: Vec<FeedEntry>,
}

#[derive(Debug, Deserialize)]
struct FeedEntry {
    id: String,
    title: String,
    summary: String,
    published: String,
    updated: String,
    #[serde(rename = "author", default)]
    authors: Vec<FeedAuthor>,
    #[serde(rename = "arxiv:primary_category", default)]
    primary_category: Option<FeedCategory>,
    #[serde(rename = "category", default)]
    categories: Vec<FeedCategory>,
}

#[derive(Debug, Deserialize)]
struct FeedAuthor {
    name: String,
}

#[derive(Debug, Deserialize)]
struct FeedCategory {
    #[serde(rename = "@term")]
    term: String,
}

/// Parse an Atom document into normalized papers, preserving feed order.
fn parse_feed(xml: &str) -> Result<Vec<Paper>> {
    let feed: Feed = quick_xml::de::from_str(xml)
        .map_err(|e| PipelineError::Catalog(format!("cannot parse catalog feed: {e}")))?;
    feed.entries.into_iter().map(normalize_entry).collect()
}

fn normalize_entry(entry: FeedEntry) -> Result<Paper> {
    // http://arxiv.org/abs/2108.09112v1 -> 2108.09112
    let short_id = entry.id.rsplit('/').next().unwrap_or(&entry.id);
    let id = canonical_id(short_id);

    let category = entry
        .primary_category
        .map(|c| c.term)
        .or_else(|| entry.categories.into_iter().next().map(|c| c.term))
        .unwrap_or_default();

    Ok(Paper {
        url: format!("{ARXIV_ABS_URL}{id}"),
        id,
        title: collapse_whitespace(&entry.title),
        abstract_text: collapse_whitespace(&entry.summary),
        authors: entry
            .authors
            .iter()
            .map(|a| a.name.trim())
            .collect::<Vec<_>>()
            .join(", "),
        category,
        publish_date: parse_date(&entry.published)?,
        update_date: parse_date(&entry.updated)?,
    })
}

/// Atom timestamps are RFC 3339; only the calendar day is kept.
fn parse_date(timestamp: &str) -> Result<chrono::NaiveDate> {
    let day = timestamp.get(..10).unwrap_or(timestamp);
    chrono::NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map_err(|e| PipelineError::Catalog(format!("bad timestamp '{timestamp}': {e}")))
}

/// Feed titles and abstracts wrap lines; fold all runs of whitespace.
fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
