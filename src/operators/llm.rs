//! Chat-completion access and the two LLM operators.
//!
//! [`ChatCompletion`] abstracts the endpoint so tests can substitute a
//! scripted implementation; [`LlmClient`] is the production impl speaking
//! the OpenAI-compatible chat API. Both operators gate concurrency with a
//! semaphore sized from `llm.max_concurrent_requests`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tracing::{debug, info};

use super::expect_list;
use crate::config::LlmConfig;
use crate::dag::{decode, encode, Operator};
use crate::error::{PipelineError, Result};
use crate::model::{Paper, PaperWithSummary};

/// Request timeout for a single chat call.
const CHAT_TIMEOUT: Duration = Duration::from_secs(120);

/// An asynchronous text-in/text-out chat service.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

/// OpenAI-compatible chat-completions client.
pub struct LlmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            return Err(PipelineError::config("llm.base_url is required"));
        }
        let client = reqwest::Client::builder()
            .timeout(CHAT_TIMEOUT)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model_name.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl ChatCompletion for LlmClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": self.model,
                "messages": [
                    { "role": "system", "content": system_prompt },
                    { "role": "user", "content": user_prompt }
                ],
                "temperature": self.temperature,
                "max_tokens": self.max_tokens,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Llm(format!("chat endpoint returned {status}: {body}")));
        }

        let body: Value = response.json().await?;
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| PipelineError::Llm("malformed chat completion response".into()))
    }
}

/// Generates one summary per `(paper, text)` pair.
///
/// Output is a `PaperWithSummary` list aligned with the input. A failed
/// chat call aborts the run; an unreadable paper arrives here with empty
/// text and is summarized from whatever the prompt carries.
pub struct LlmSummarizer {
    chat: Arc<dyn ChatCompletion>,
    semaphore: Arc<Semaphore>,
    language: String,
}

impl LlmSummarizer {
    pub fn new(chat: Arc<dyn ChatCompletion>, max_concurrent_requests: usize, language: impl Into<String>) -> Self {
        Self {
            chat,
            semaphore: Arc::new(Semaphore::new(max_concurrent_requests.max(1))),
            language: language.into(),
        }
    }

    async fn summarize(&self, text: &str) -> Result<String> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| PipelineError::Execution("summarizer semaphore closed".into()))?;
        self.chat
            .complete(
                "You are a professional academic paper analyst.",
                &format!("Introduce this paper in {}: {text}", self.language),
            )
            .await
    }
}

#[async_trait]
impl Operator for LlmSummarizer {
    fn name(&self) -> &str {
        "LlmSummarizer"
    }

    async fn process(&self, input: Value) -> Result<Value> {
        let pairs: Vec<(Paper, String)> = decode(Value::Array(expect_list(input)?))?;
        info!("summarizing {} papers", pairs.len());

        let tasks = pairs.iter().map(|(_, text)| self.summarize(text));
        let summaries: Vec<String> = join_all(tasks).await.into_iter().collect::<Result<_>>()?;

        let out: Vec<PaperWithSummary> = pairs
            .into_iter()
            .zip(summaries)
            .map(|((paper, _), summary)| PaperWithSummary::new(paper, summary))
            .collect();
        encode(&out)
    }
}

/// Asks the model whether each abstract fits the target topic.
///
/// Output is `[(paper, filtered)]` where `filtered = true` means reject.
/// A reply containing `NO` rejects the paper.
pub struct AbstractLlmFilter {
    chat: Arc<dyn ChatCompletion>,
    semaphore: Arc<Semaphore>,
    target_topic: String,
}

impl AbstractLlmFilter {
    pub fn new(chat: Arc<dyn ChatCompletion>, max_concurrent_requests: usize, target_topic: impl Into<String>) -> Self {
        Self {
            chat,
            semaphore: Arc::new(Semaphore::new(max_concurrent_requests.max(1))),
            target_topic: target_topic.into(),
        }
    }

    async fn judge(&self, paper: &Paper) -> Result<bool> {
        let prompt = format!(
            "Decide whether the following paper belongs to the field the user cares about.\n\
             Answer YES if it does, NO otherwise.\n\
             The field the user cares about: {}\n\
             The paper's abstract: {}\n",
            self.target_topic, paper.abstract_text
        );
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| PipelineError::Execution("filter semaphore closed".into()))?;
        let reply = self
            .chat
            .complete(
                "You are a paper triage expert who judges from the abstract whether a paper belongs to the user's field of interest.",
                &prompt,
            )
            .await?;

        let filtered = reply_rejects(&reply);
        debug!(
            "paper '{}' {}",
            paper.title,
            if filtered { "filtered out" } else { "kept" }
        );
        Ok(filtered)
    }
}

/// A reply containing `NO` means "filter this paper out".
fn reply_rejects(reply: &str) -> bool {
    reply.contains("NO")
}

#[async_trait]
impl Operator for AbstractLlmFilter {
    fn name(&self) -> &str {
        "AbstractLlmFilter"
    }

    async fn process(&self, input: Value) -> Result<Value> {
        let items = expect_list(input)?;
        let papers: Vec<Paper> = decode(Value::Array(items))?;
        info!("filtering {} papers against topic '{}'", papers.len(), self.target_topic);

        let tasks = papers.iter().map(|paper| self.judge(paper));
        let verdicts: Vec<bool> = join_all(tasks).await.into_iter().collect::<Result<_>>()?;

        let out: Vec<(Paper, bool)> = papers.into_iter().zip(verdicts).collect();
        encode(&out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted chat backend: replies based on the prompt text.
    struct ScriptedChat {
        calls: AtomicUsize,
        reply_for: Box<dyn Fn(&str) -> String + Send + Sync>,
    }

    impl ScriptedChat {
        fn replying(reply_for: impl Fn(&str) -> String + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                reply_for: Box::new(reply_for),
            })
        }
    }

    #[async_trait]
    impl ChatCompletion for ScriptedChat {
        async fn complete(&self, _system: &str, user: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((self.reply_for)(user))
        }
    }

    fn paper(id: &str, abstract_text: &str) -> Paper {
        Paper {
            id: id.into(),
            title: format!("Paper {id}"),
            url: format!("http://arxiv.org/abs/{id}"),
            abstract_text: abstract_text.into(),
            authors: "A. Author".into(),
            category: "cs.CL".into(),
            publish_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            update_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        }
    }

    #[test]
    fn reply_polarity() {
        assert!(reply_rejects("NO"));
        assert!(reply_rejects("The answer is NO."));
        assert!(!reply_rejects("YES"));
        // case-sensitive on purpose: lowercase "no" does not reject
        assert!(!reply_rejects("no"));
    }

    #[tokio::test]
    async fn summarizer_aligns_output_with_input() {
        let chat = ScriptedChat::replying(|user| format!("summary of [{user}]"));
        let summarizer = LlmSummarizer::new(chat.clone(), 2, "English");

        let input = encode(&vec![
            (paper("1", "a"), "text one".to_string()),
            (paper("2", "b"), "text two".to_string()),
        ])
        .unwrap();

        let out: Vec<PaperWithSummary> = decode(summarizer.process(input).await.unwrap()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id(), "1");
        assert!(out[0].summary.contains("text one"));
        assert_eq!(out[1].id(), "2");
        assert!(out[1].summary.contains("text two"));
        assert_eq!(chat.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn filter_marks_rejections() {
        let chat = ScriptedChat::replying(|user| {
            if user.contains("about cats") {
                "YES".to_string()
            } else {
                "NO".to_string()
            }
        });
        let filter = AbstractLlmFilter::new(chat, 4, "felines");

        let input = encode(&vec![paper("1", "about cats"), paper("2", "about dogs")]).unwrap();
        let out: Vec<(Paper, bool)> = decode(filter.process(input).await.unwrap()).unwrap();

        assert_eq!(out.len(), 2);
        assert!(!out[0].1, "on-topic paper should be kept");
        assert!(out[1].1, "off-topic paper should be rejected");
    }

    #[tokio::test]
    async fn empty_input_makes_no_calls() {
        let chat = ScriptedChat::replying(|_| "YES".to_string());
        let filter = AbstractLlmFilter::new(chat.clone(), 1, "anything");
        let out = filter.process(json!([])).await.unwrap();
        assert_eq!(out, json!([]));
        assert_eq!(chat.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn client_requires_base_url() {
        let config = LlmConfig::default();
        assert!(LlmClient::new(&config).is_err());
    }
}
