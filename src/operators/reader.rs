//! Paper download and text extraction.
//!
//! For each paper: rewrite the `abs` URL to its `pdf` form, download into
//! the cache directory unless already present, then extract text through a
//! cascade of parsers. Per-paper failures degrade to an empty text so one
//! broken PDF never aborts a batch.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use super::expect_list;
use crate::dag::{decode, encode, Operator};
use crate::error::{PipelineError, Result};
use crate::model::Paper;
use crate::retry::{with_retry, RetryPolicy};

/// Download timeout for one PDF.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Downloads and extracts the body text of each paper.
pub struct PaperReader {
    client: reqwest::Client,
    cache_dir: PathBuf,
    semaphore: Arc<Semaphore>,
}

impl PaperReader {
    pub fn new(cache_dir: impl AsRef<Path>, max_workers: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .connect_timeout(Duration::from_secs(10))
            .user_agent("paperflow/0.1")
            .build()?;
        Ok(Self {
            client,
            cache_dir: cache_dir.as_ref().to_path_buf(),
            semaphore: Arc::new(Semaphore::new(max_workers.max(1))),
        })
    }

    fn cache_path(&self, paper: &Paper) -> PathBuf {
        self.cache_dir.join(format!("{}.pdf", paper.id))
    }

    /// Download into the cache unless a cached copy exists, then return the
    /// PDF bytes.
    async fn fetch_pdf(&self, paper: &Paper) -> Result<Vec<u8>> {
        let path = self.cache_path(paper);
        if path.exists() {
            debug!("cache hit for {}", paper.id);
            return Ok(tokio::fs::read(&path).await?);
        }

        let url = pdf_url(&paper.url);
        info!("downloading {} from {url}", paper.id);
        let bytes = with_retry(RetryPolicy::download(), "pdf download", || async {
            let response = self.client.get(&url).send().await?.error_for_status()?;
            let expected = response.content_length();
            let bytes = response.bytes().await?;
            if let Some(expected) = expected {
                if bytes.len() as u64 != expected {
                    return Err(PipelineError::Execution(format!(
                        "truncated download for {}: {} of {expected} bytes",
                        paper.id,
                        bytes.len()
                    )));
                }
            }
            Ok::<_, PipelineError>(bytes.to_vec())
        })
        .await?;

        // Land the cache file atomically so a crash cannot leave a
        // truncated PDF for the next run to trust.
        let tmp = path.with_extension("pdf.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(bytes)
    }

    async fn read_one(&self, paper: Paper) -> (Paper, String) {
        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => return (paper, String::new()),
        };

        let bytes = match self.fetch_pdf(&paper).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("failed to fetch paper {}: {e}", paper.id);
                return (paper, String::new());
            }
        };

        let id = paper.id.clone();
        let text = tokio::task::spawn_blocking(move || extract_text(&bytes))
            .await
            .unwrap_or_default();
        if text.is_empty() {
            error!("no text extracted from paper {id}");
        }
        (paper, text)
    }
}

#[async_trait]
impl Operator for PaperReader {
    fn name(&self) -> &str {
        "PaperReader"
    }

    async fn setup(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        Ok(())
    }

    async fn process(&self, input: Value) -> Result<Value> {
        let papers: Vec<Paper> = decode(Value::Array(expect_list(input)?))?;
        info!("reading {} papers", papers.len());

        let tasks = papers.into_iter().map(|paper| self.read_one(paper));
        let results: Vec<(Paper, String)> = join_all(tasks).await;
        encode(&results)
    }
}

/// `http://arxiv.org/abs/<id>` -> `http://arxiv.org/pdf/<id>`.
fn pdf_url(abs_url: &str) -> String {
    abs_url.replacen("/abs/", "/pdf/", 1)
}

/// Extraction cascade: whole-document parse, then per-page parse, then a
/// raw printable-text scan as last resort. The first stage that yields a
/// non-empty string wins; total failure is the empty string.
fn extract_text(bytes: &[u8]) -> String {
    if let Some(text) = whole_document_text(bytes) {
        return text;
    }
    if let Some(text) = per_page_text(bytes) {
        return text;
    }
    scan_printable_runs(bytes)
}

/// Primary parser: one pass over the whole document.
fn whole_document_text(bytes: &[u8]) -> Option<String> {
    let parsed = catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes)));
    match parsed {
        Ok(Ok(text)) if !text.trim().is_empty() => return Some(text),
        Ok(Ok(_)) => debug!("whole-document parse produced empty text"),
        Ok(Err(e)) => debug!("whole-document parse failed: {e}"),
        Err(_) => debug!("whole-document parse panicked"),
    }
    None
}

/// First fallback: page-at-a-time parse. A document that one broken object
/// spoils in a single pass can still yield text from its intact pages.
fn per_page_text(bytes: &[u8]) -> Option<String> {
    let parsed = catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    }));
    match parsed {
        Ok(Ok(pages)) => {
            let text = pages.join("\n");
            if !text.trim().is_empty() {
                return Some(text);
            }
            debug!("per-page parse produced empty text");
        }
        Ok(Err(e)) => debug!("per-page parse failed: {e}"),
        Err(_) => debug!("per-page parse panicked"),
    }
    None
}

/// Last-resort extraction: pull runs of printable ASCII out of the raw
/// bytes. Yields nothing useful for compressed streams, which is fine;
/// it only exists so a malformed-but-textual body still produces content.
fn scan_printable_runs(bytes: &[u8]) -> String {
    const MIN_RUN: usize = 4;
    let mut runs: Vec<String> = Vec::new();
    let mut current = String::new();
    for &b in bytes {
        if (b' '..=b'~').contains(&b) {
            current.push(b as char);
        } else if current.trim().len() >= MIN_RUN {
            runs.push(std::mem::take(&mut current).trim().to_string());
        } else {
            current.clear();
        }
    }
    if current.trim().len() >= MIN_RUN {
        runs.push(current.trim().to_string());
    }
    runs.join(" ")
}
