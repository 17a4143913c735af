//! The three pipeline assemblies: filter, summarize, push.
//!
//! Each builder wires standard operators into a [`DagPipeline`] against the
//! layout under `storage.base_path`:
//!
//! ```text
//! <base_path>/
//!   filtered_papers/filtered_papers.json    id -> paper (null = rejected)
//!   paper_summaries/paper_summaries.json    id -> paper with summary
//!   paper_caches/<id>.pdf                   raw PDF cache
//!   state/pending_states/<ns>_states.json   per-stage finished ids
//! ```
//!
//! Stage namespaces: `arxiv_llm_filter` (filter), `arxiv` (summarize),
//! `push` (push). Every pipeline starts with a `FilterFinishedIds` on its
//! namespace and ends with a `MarkIdsAsFinished`, which is what makes
//! re-running them against a growing catalog safe.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::config::AppConfig;
use crate::dag::{DagPipeline, Operator};
use crate::error::{PipelineError, Result};
use crate::operators::{
    field_id, AbstractLlmFilter, ArxivSource, ChatCompletion, CustomProcessor, FeishuPusher,
    FilterFinishedIds, IdExtractor, KvReader, KvWriter, Limit, LlmSummarizer, MarkIdsAsFinished,
    PaperReader,
};

/// State namespace of the LLM filter stage.
pub const NS_LLM_FILTER: &str = "arxiv_llm_filter";
/// State namespace of the summarize stage.
pub const NS_SUMMARIZE: &str = "arxiv";
/// State namespace of the push stage.
pub const NS_PUSH: &str = "push";

const KV_FILTERED: &str = "filtered_papers";
const KV_SUMMARIES: &str = "paper_summaries";

fn state_dir(config: &AppConfig) -> PathBuf {
    Path::new(&config.storage.base_path).join("state")
}

fn kv_dir(config: &AppConfig, namespace: &str) -> PathBuf {
    Path::new(&config.storage.base_path).join(namespace)
}

/// Id extractor for `[paper, flag]` tuple payloads.
fn tuple_paper_id() -> IdExtractor {
    Arc::new(|item| {
        item.get(0)
            .and_then(|paper| paper.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| PipelineError::data("tuple item has no paper id"))
    })
}

/// Filter pipeline: judge every new paper against the target topic once.
///
/// Rejected papers are recorded as `null` in the filtered KV so the
/// decision itself is remembered; both outcomes are marked finished.
pub fn build_filter_pipeline(
    config: &AppConfig,
    chat: Arc<dyn ChatCompletion>,
) -> Result<DagPipeline> {
    if config.llm_filter_topic.is_empty() {
        return Err(PipelineError::config("llm_filter_topic is required for the filter pipeline"));
    }

    let mut dag = DagPipeline::new();

    dag.add_operator(
        "arxiv_source",
        Arc::new(ArxivSource::new(
            &config.arxiv_topic_list,
            config.arxiv_search_offset,
            config.arxiv_search_limit,
        )?),
        &[],
    )?;

    dag.add_operator(
        "filter_finished_ids",
        Arc::new(
            FilterFinishedIds::new(state_dir(config), NS_LLM_FILTER)
                .with_id_extractor(field_id("id")),
        ),
        &["arxiv_source"],
    )?;

    dag.add_operator(
        "llm_filter",
        Arc::new(AbstractLlmFilter::new(
            chat,
            config.llm.max_concurrent_requests,
            config.llm_filter_topic.as_str(),
        )),
        &["filter_finished_ids"],
    )?;

    dag.add_operator(
        "save_filtered_papers",
        Arc::new(KvWriter::new(
            kv_dir(config, KV_FILTERED),
            KV_FILTERED,
            Arc::new(|item: &Value| {
                let paper = item
                    .get(0)
                    .ok_or_else(|| PipelineError::data("expected (paper, filtered) tuple"))?;
                let rejected = item.get(1).and_then(Value::as_bool).unwrap_or(false);
                let id = paper
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| PipelineError::data("paper has no id"))?
                    .to_string();
                Ok((id, if rejected { Value::Null } else { paper.clone() }))
            }),
        )),
        &["llm_filter"],
    )?;

    dag.add_operator(
        "mark_filtered_papers",
        Arc::new(
            MarkIdsAsFinished::new(state_dir(config), NS_LLM_FILTER)
                .with_id_extractor(tuple_paper_id()),
        ),
        &["save_filtered_papers"],
    )?;

    Ok(dag)
}

/// Summarize pipeline: read bodies and generate summaries for one batch.
///
/// The head is either the catalog source or the filtered-papers KV,
/// depending on `enable_llm_filter`. Papers whose summary came back empty
/// are dropped before the writer so they stay pending and retry next run.
pub fn build_summarize_pipeline(
    config: &AppConfig,
    chat: Arc<dyn ChatCompletion>,
) -> Result<DagPipeline> {
    let mut dag = DagPipeline::new();

    let source: Arc<dyn Operator> = if config.enable_llm_filter {
        Arc::new(KvReader::new(kv_dir(config, KV_FILTERED), KV_FILTERED))
    } else {
        Arc::new(ArxivSource::new(
            &config.arxiv_topic_list,
            config.arxiv_search_offset,
            config.arxiv_search_limit,
        )?)
    };
    dag.add_operator("paper_source", source, &[])?;

    dag.add_operator(
        "filter_finished_ids",
        Arc::new(
            FilterFinishedIds::new(state_dir(config), NS_SUMMARIZE)
                .with_id_extractor(field_id("id")),
        ),
        &["paper_source"],
    )?;

    dag.add_operator(
        "limit_batch",
        Arc::new(Limit::new(config.process_batch_size)),
        &["filter_finished_ids"],
    )?;

    dag.add_operator(
        "paper_reader",
        Arc::new(PaperReader::new(
            kv_dir(config, "paper_caches"),
            config.paper_reader_max_workers,
        )?),
        &["limit_batch"],
    )?;

    dag.add_operator(
        "paper_summarizer",
        Arc::new(LlmSummarizer::new(
            chat,
            config.llm.max_concurrent_requests,
            config.llm.summary_language.as_str(),
        )),
        &["paper_reader"],
    )?;

    dag.add_operator(
        "drop_empty_summaries",
        Arc::new(CustomProcessor::new("drop_empty_summaries", |items| {
            Ok(items
                .into_iter()
                .filter(|item| {
                    item.get("summary")
                        .and_then(Value::as_str)
                        .is_some_and(|s| !s.trim().is_empty())
                })
                .collect())
        })),
        &["paper_summarizer"],
    )?;

    dag.add_operator(
        "save_paper_summaries",
        Arc::new(KvWriter::new(
            kv_dir(config, KV_SUMMARIES),
            KV_SUMMARIES,
            Arc::new(|item: &Value| {
                let id = item
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| PipelineError::data("summary item has no id"))?
                    .to_string();
                Ok((id, item.clone()))
            }),
        )),
        &["drop_empty_summaries"],
    )?;

    dag.add_operator(
        "mark_processed_papers",
        Arc::new(
            MarkIdsAsFinished::new(state_dir(config), NS_SUMMARIZE)
                .with_id_extractor(field_id("id")),
        ),
        &["save_paper_summaries"],
    )?;

    Ok(dag)
}

/// Push pipeline: deliver unpushed summaries as cards, oldest first.
pub fn build_push_pipeline(config: &AppConfig) -> Result<DagPipeline> {
    if config.feishu_webhook_url.is_empty() {
        return Err(PipelineError::config("feishu_webhook_url is required for the push pipeline"));
    }

    let mut dag = DagPipeline::new();

    dag.add_operator(
        "read_paper_summaries",
        Arc::new(KvReader::new(kv_dir(config, KV_SUMMARIES), KV_SUMMARIES)),
        &[],
    )?;

    dag.add_operator(
        "filter_pushed_papers",
        Arc::new(
            FilterFinishedIds::new(state_dir(config), NS_PUSH).with_id_extractor(field_id("id")),
        ),
        &["read_paper_summaries"],
    )?;

    dag.add_operator(
        "sort_by_update_date",
        Arc::new(CustomProcessor::new("sort_by_update_date", |mut items| {
            items.sort_by(|a, b| {
                let date = |v: &Value| {
                    v.get("update_date")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                };
                date(a).cmp(&date(b))
            });
            Ok(items)
        })),
        &["filter_pushed_papers"],
    )?;

    dag.add_operator(
        "push_paper_summaries",
        Arc::new(FeishuPusher::new(config.feishu_webhook_url.as_str(), Arc::new(card_of))?),
        &["sort_by_update_date"],
    )?;

    dag.add_operator(
        "keep_succeeded",
        Arc::new(CustomProcessor::new("keep_succeeded", |items| {
            Ok(items
                .into_iter()
                .filter(|item| item.get(1).and_then(Value::as_bool) == Some(true))
                .filter_map(|item| item.get(0).cloned())
                .collect())
        })),
        &["push_paper_summaries"],
    )?;

    dag.add_operator(
        "mark_pushed_papers",
        Arc::new(
            MarkIdsAsFinished::new(state_dir(config), NS_PUSH).with_id_extractor(field_id("id")),
        ),
        &["keep_succeeded"],
    )?;

    Ok(dag)
}

/// Render a summarized paper as a card title and body.
fn card_of(item: &Value) -> Result<(String, String)> {
    let get = |field: &str| item.get(field).and_then(Value::as_str).unwrap_or_default();
    let content = format!(
        "**{}**\n**Updated**: {}\n\n👤 {}\n\n💡 AI summary: {}\n\n---\n📎 [Original paper]({})",
        get("title"),
        get("update_date"),
        get("authors"),
        get("summary"),
        get("url"),
    );
    Ok(("📄 New paper digest".to_string(), content))
}

/// How one pipeline run went, for CLI reporting.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunSummary {
    pub rounds: usize,
    pub processed: usize,
}

fn list_len(results: &std::collections::HashMap<String, Value>, name: &str) -> usize {
    results
        .get(name)
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0)
}

/// Run the filter pipeline once; returns how many papers were judged.
pub async fn run_filter(config: &AppConfig, chat: Arc<dyn ChatCompletion>) -> Result<RunSummary> {
    let mut dag = build_filter_pipeline(config, chat)?;
    let results = dag.execute(None).await?;
    Ok(RunSummary {
        rounds: 1,
        processed: list_len(&results, "mark_filtered_papers"),
    })
}

/// Drain the summarize backlog in batches.
///
/// Stops when a round has nothing left to process, or when a round makes
/// no progress (every paper in the batch failed), so a permanently broken
/// paper cannot spin the loop.
pub async fn run_summarize(config: &AppConfig, chat: Arc<dyn ChatCompletion>) -> Result<RunSummary> {
    let mut dag = build_summarize_pipeline(config, chat)?;
    let mut summary = RunSummary::default();

    loop {
        let results = dag.execute(None).await?;
        let batch = list_len(&results, "limit_batch");
        let marked = list_len(&results, "mark_processed_papers");
        summary.rounds += 1;
        summary.processed += marked;

        info!("summarize round {}: batch={batch}, finished={marked}", summary.rounds);
        if batch == 0 || marked == 0 {
            break;
        }
    }

    Ok(summary)
}

/// Run the push pipeline once; returns how many cards were delivered.
pub async fn run_push(config: &AppConfig) -> Result<RunSummary> {
    let mut dag = build_push_pipeline(config)?;
    let results = dag.execute(None).await?;
    Ok(RunSummary {
        rounds: 1,
        processed: list_len(&results, "mark_pushed_papers"),
    })
}
