//! End-to-end pipeline tests over temporary storage.
//!
//! These assemble the same operator chains the workflow builders produce,
//! with a scripted chat backend in place of the real endpoint and a stub
//! source in place of the catalog, then prove the properties that matter
//! across runs: at-most-once side effects, resume after partial failure,
//! and the KV bus between pipelines.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use paperflow::dag::DagPipeline;
use paperflow::operators::{
    field_id, AbstractLlmFilter, ChatCompletion, CustomProcessor, FilterFinishedIds, KvReader,
    KvWriter, Limit, LlmSummarizer, MarkIdsAsFinished,
};
use paperflow::{PipelineError, Result, StateStore};

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

fn paper(id: &str, abstract_text: &str, update_date: &str) -> Value {
    json!({
        "id": id,
        "title": format!("Paper {id}"),
        "url": format!("http://arxiv.org/abs/{id}"),
        "abstract": abstract_text,
        "authors": "A. Author",
        "category": "cs.CL",
        "publish_date": update_date,
        "update_date": update_date,
    })
}

/// Source stand-in: ignores its input and emits a fixed list.
fn stub_source(items: Vec<Value>) -> CustomProcessor {
    CustomProcessor::new("stub_source", move |_| Ok(items.clone()))
}

/// Chat backend that counts calls and rejects abstracts mentioning dogs.
struct CountingChat {
    calls: AtomicUsize,
}

impl CountingChat {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatCompletion for CountingChat {
    async fn complete(&self, _system: &str, user: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if user.contains("dogs") {
            Ok("NO".to_string())
        } else if user.contains("Introduce this paper") {
            Ok(format!("summary: {}", &user[..user.len().min(40)]))
        } else {
            Ok("YES".to_string())
        }
    }
}

/// The filter chain as `workflow::build_filter_pipeline` wires it, with a
/// stub source.
fn filter_chain(
    base: &std::path::Path,
    chat: Arc<dyn ChatCompletion>,
    papers: Vec<Value>,
) -> DagPipeline {
    let state = base.join("state");
    let kv = base.join("filtered_papers");

    let mut dag = DagPipeline::new();
    dag.add_operator("source", Arc::new(stub_source(papers)), &[]).unwrap();
    dag.add_operator(
        "filter_finished",
        Arc::new(FilterFinishedIds::new(&state, "arxiv_llm_filter").with_id_extractor(field_id("id"))),
        &["source"],
    )
    .unwrap();
    dag.add_operator(
        "llm_filter",
        Arc::new(AbstractLlmFilter::new(chat, 4, "felines")),
        &["filter_finished"],
    )
    .unwrap();
    dag.add_operator(
        "save",
        Arc::new(KvWriter::new(
            &kv,
            "filtered_papers",
            Arc::new(|item: &Value| {
                let paper = item.get(0).ok_or_else(|| PipelineError::data("no paper"))?;
                let rejected = item.get(1).and_then(Value::as_bool).unwrap_or(false);
                let id = paper["id"].as_str().unwrap_or_default().to_string();
                Ok((id, if rejected { Value::Null } else { paper.clone() }))
            }),
        )),
        &["llm_filter"],
    )
    .unwrap();
    dag.add_operator(
        "mark",
        Arc::new(
            MarkIdsAsFinished::new(&state, "arxiv_llm_filter").with_id_extractor(Arc::new(
                |item: &Value| {
                    item.get(0)
                        .and_then(|p| p.get("id"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .ok_or_else(|| PipelineError::data("no paper id"))
                },
            )),
        ),
        &["save"],
    )
    .unwrap();
    dag
}

// ---------------------------------------------------------------------------
// plain linear run
// ---------------------------------------------------------------------------

#[tokio::test]
async fn linear_source_limit_sink_run() {
    let papers = vec![
        paper("2400.0000a", "p1", "2024-01-01"),
        paper("2400.0000b", "p2", "2024-01-02"),
        paper("2400.0000c", "p3", "2024-01-03"),
        paper("2400.0000d", "p4", "2024-01-04"),
    ];

    let mut dag = DagPipeline::new();
    dag.add_operator("source", Arc::new(stub_source(papers)), &[]).unwrap();
    dag.add_operator("limit", Arc::new(Limit::new(2)), &["source"]).unwrap();
    dag.add_operator("sink", Arc::new(CustomProcessor::new("sink", Ok)), &["limit"])
        .unwrap();

    let results = dag.execute(None).await.unwrap();
    assert_eq!(results.len(), 3, "every node's output is in the result map");
    assert_eq!(results["source"].as_array().unwrap().len(), 4);

    let sunk: Vec<&str> = results["sink"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["id"].as_str().unwrap())
        .collect();
    assert_eq!(sunk, vec!["2400.0000a", "2400.0000b"]);
}

// ---------------------------------------------------------------------------
// at-most-once across runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn filter_pipeline_judges_each_paper_at_most_once() {
    let dir = tempfile::tempdir().unwrap();
    let chat = CountingChat::new();
    let papers = vec![
        paper("2400.00001", "all about cats", "2024-01-01"),
        paper("2400.00002", "all about dogs", "2024-01-02"),
        paper("2400.00003", "more cats", "2024-01-03"),
    ];

    let mut dag = filter_chain(dir.path(), chat.clone(), papers.clone());

    // First run judges all three papers.
    let results = dag.execute(None).await.unwrap();
    assert_eq!(chat.calls(), 3);
    assert_eq!(results["mark"].as_array().unwrap().len(), 3);

    // Second run over the same catalog: zero LLM calls, nothing re-marked.
    let results = dag.execute(None).await.unwrap();
    assert_eq!(chat.calls(), 3, "finished papers must not be re-judged");
    assert_eq!(results["mark"].as_array().unwrap().len(), 0);

    // A new paper appearing upstream costs exactly one more call.
    let mut grown = papers;
    grown.push(paper("2400.00004", "cats again", "2024-01-04"));
    let mut dag = filter_chain(dir.path(), chat.clone(), grown);
    dag.execute(None).await.unwrap();
    assert_eq!(chat.calls(), 4);
}

#[tokio::test]
async fn filter_pipeline_records_rejections_as_null() {
    let dir = tempfile::tempdir().unwrap();
    let chat = CountingChat::new();
    let papers = vec![
        paper("2400.00001", "all about cats", "2024-01-01"),
        paper("2400.00002", "all about dogs", "2024-01-02"),
    ];

    filter_chain(dir.path(), chat, papers)
        .execute(None)
        .await
        .unwrap();

    let kv = paperflow::KvStore::new(dir.path().join("filtered_papers"), "filtered_papers");
    let entries = kv.read().unwrap();
    assert_eq!(entries.len(), 2);
    assert!(!entries["2400.00001"].value.is_null(), "kept paper stores its record");
    assert!(entries["2400.00002"].value.is_null(), "rejected paper stores null");

    // The KV bus drops the rejected entry on the reading side.
    let reader = KvReader::new(dir.path().join("filtered_papers"), "filtered_papers");
    let out = paperflow::dag::decode::<Vec<Value>>(
        paperflow::Operator::process(&reader, Value::Null).await.unwrap(),
    )
    .unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0]["id"], "2400.00001");
}

// ---------------------------------------------------------------------------
// summarize chain: batching, empty-summary retry, drain loop conditions
// ---------------------------------------------------------------------------

fn summarize_chain(
    base: &std::path::Path,
    chat: Arc<dyn ChatCompletion>,
    papers: Vec<Value>,
    batch: usize,
) -> DagPipeline {
    let state = base.join("state");

    let mut dag = DagPipeline::new();
    dag.add_operator("source", Arc::new(stub_source(papers)), &[]).unwrap();
    dag.add_operator(
        "filter_finished",
        Arc::new(FilterFinishedIds::new(&state, "arxiv").with_id_extractor(field_id("id"))),
        &["source"],
    )
    .unwrap();
    dag.add_operator("limit", Arc::new(Limit::new(batch)), &["filter_finished"]).unwrap();
    // Reader stand-in: every paper "extracts" to its abstract text.
    dag.add_operator(
        "reader",
        Arc::new(CustomProcessor::new("reader", |items| {
            Ok(items
                .into_iter()
                .map(|p| {
                    let text = p["abstract"].as_str().unwrap_or_default().to_string();
                    json!([p, text])
                })
                .collect())
        })),
        &["limit"],
    )
    .unwrap();
    dag.add_operator(
        "summarizer",
        Arc::new(LlmSummarizer::new(chat, 2, "English")),
        &["reader"],
    )
    .unwrap();
    dag.add_operator(
        "drop_empty",
        Arc::new(CustomProcessor::new("drop_empty", |items| {
            Ok(items
                .into_iter()
                .filter(|item| {
                    item.get("summary")
                        .and_then(Value::as_str)
                        .is_some_and(|s| !s.trim().is_empty())
                })
                .collect())
        })),
        &["summarizer"],
    )
    .unwrap();
    dag.add_operator(
        "save",
        Arc::new(KvWriter::new(
            base.join("paper_summaries"),
            "paper_summaries",
            Arc::new(|item: &Value| {
                Ok((item["id"].as_str().unwrap_or_default().to_string(), item.clone()))
            }),
        )),
        &["drop_empty"],
    )
    .unwrap();
    dag.add_operator(
        "mark",
        Arc::new(MarkIdsAsFinished::new(&state, "arxiv").with_id_extractor(field_id("id"))),
        &["save"],
    )
    .unwrap();
    dag
}

#[tokio::test]
async fn summarize_chain_drains_backlog_in_batches() {
    let dir = tempfile::tempdir().unwrap();
    let chat = CountingChat::new();
    let papers: Vec<Value> = (1..=5)
        .map(|i| paper(&format!("2400.0000{i}"), "cats", "2024-01-01"))
        .collect();

    let mut dag = summarize_chain(dir.path(), chat.clone(), papers, 2);

    // Round 1: batch of 2.
    let results = dag.execute(None).await.unwrap();
    assert_eq!(results["limit"].as_array().unwrap().len(), 2);
    assert_eq!(results["mark"].as_array().unwrap().len(), 2);

    // Rounds 2 and 3 drain the rest.
    let results = dag.execute(None).await.unwrap();
    assert_eq!(results["mark"].as_array().unwrap().len(), 2);
    let results = dag.execute(None).await.unwrap();
    assert_eq!(results["mark"].as_array().unwrap().len(), 1);

    // Backlog empty: the loop's stop condition.
    let results = dag.execute(None).await.unwrap();
    assert_eq!(results["limit"].as_array().unwrap().len(), 0);
    assert_eq!(chat.calls(), 5);

    // Everything ended up on the KV bus exactly once.
    let kv = paperflow::KvStore::new(dir.path().join("paper_summaries"), "paper_summaries");
    assert_eq!(kv.read().unwrap().len(), 5);
}

/// Chat that returns empty summaries for one specific paper.
struct HolePunchChat;

#[async_trait]
impl ChatCompletion for HolePunchChat {
    async fn complete(&self, _system: &str, user: &str) -> Result<String> {
        if user.contains("broken") {
            Ok(String::new())
        } else {
            Ok("fine summary".to_string())
        }
    }
}

#[tokio::test]
async fn empty_summary_stays_pending_for_next_run() {
    let dir = tempfile::tempdir().unwrap();
    let papers = vec![
        paper("2400.00001", "fine paper", "2024-01-01"),
        paper("2400.00002", "broken paper", "2024-01-02"),
    ];

    let mut dag = summarize_chain(dir.path(), Arc::new(HolePunchChat), papers, 10);
    let results = dag.execute(None).await.unwrap();

    // Only the good paper is marked; the broken one retries next round.
    assert_eq!(results["mark"].as_array().unwrap().len(), 1);
    let state = StateStore::new(dir.path().join("state"), "arxiv");
    assert!(state.is_finished("2400.00001").unwrap());
    assert!(!state.is_finished("2400.00002").unwrap());

    // Next round re-offers only the broken paper: the no-progress stop
    // condition for the drain loop.
    let results = dag.execute(None).await.unwrap();
    assert_eq!(results["limit"].as_array().unwrap().len(), 1);
    assert_eq!(results["mark"].as_array().unwrap().len(), 0);
}

// ---------------------------------------------------------------------------
// push chain: partial failure and retry of only the failed item
// ---------------------------------------------------------------------------

fn push_chain(base: &std::path::Path, papers: Vec<Value>, fail_id: &str) -> DagPipeline {
    let state = base.join("state");
    let fail_id = fail_id.to_string();

    let mut dag = DagPipeline::new();
    dag.add_operator("source", Arc::new(stub_source(papers)), &[]).unwrap();
    dag.add_operator(
        "filter_pushed",
        Arc::new(FilterFinishedIds::new(&state, "push").with_id_extractor(field_id("id"))),
        &["source"],
    )
    .unwrap();
    dag.add_operator(
        "sort",
        Arc::new(CustomProcessor::new("sort_by_update_date", |mut items| {
            items.sort_by_key(|v| v["update_date"].as_str().unwrap_or_default().to_string());
            Ok(items)
        })),
        &["filter_pushed"],
    )
    .unwrap();
    // Pusher stand-in: one item fails, the rest succeed.
    dag.add_operator(
        "pusher",
        Arc::new(CustomProcessor::new("pusher", move |items| {
            Ok(items
                .into_iter()
                .map(|item| {
                    let ok = item["id"].as_str() != Some(fail_id.as_str());
                    json!([item, ok])
                })
                .collect())
        })),
        &["sort"],
    )
    .unwrap();
    dag.add_operator(
        "keep_succeeded",
        Arc::new(CustomProcessor::new("keep_succeeded", |items| {
            Ok(items
                .into_iter()
                .filter(|item| item.get(1).and_then(Value::as_bool) == Some(true))
                .filter_map(|item| item.get(0).cloned())
                .collect())
        })),
        &["pusher"],
    )
    .unwrap();
    dag.add_operator(
        "mark",
        Arc::new(MarkIdsAsFinished::new(&state, "push").with_id_extractor(field_id("id"))),
        &["keep_succeeded"],
    )
    .unwrap();
    dag
}

#[tokio::test]
async fn push_partial_failure_retries_only_the_failed_item() {
    let dir = tempfile::tempdir().unwrap();
    let papers = vec![
        paper("2400.00001", "a", "2024-01-01"),
        paper("2400.00002", "b", "2024-01-02"),
        paper("2400.00003", "c", "2024-01-03"),
    ];

    let mut dag = push_chain(dir.path(), papers.clone(), "2400.00002");
    let results = dag.execute(None).await.unwrap();

    // Only the two successes reach the mark stage.
    let marked: Vec<&str> = results["mark"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["id"].as_str().unwrap())
        .collect();
    assert_eq!(marked, vec!["2400.00001", "2400.00003"]);

    // The rerun offers only the failed item for another attempt.
    let results = dag.execute(None).await.unwrap();
    let offered: Vec<&str> = results["filter_pushed"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["id"].as_str().unwrap())
        .collect();
    assert_eq!(offered, vec!["2400.00002"]);
}

#[tokio::test]
async fn push_chain_sorts_oldest_first() {
    let dir = tempfile::tempdir().unwrap();
    let papers = vec![
        paper("2400.00003", "c", "2024-03-01"),
        paper("2400.00001", "a", "2024-01-01"),
        paper("2400.00002", "b", "2024-02-01"),
    ];

    let mut dag = push_chain(dir.path(), papers, "none");
    let results = dag.execute(None).await.unwrap();

    let order: Vec<&str> = results["sort"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["id"].as_str().unwrap())
        .collect();
    assert_eq!(order, vec!["2400.00001", "2400.00002", "2400.00003"]);
}

// ---------------------------------------------------------------------------
// KV bus between pipelines
// ---------------------------------------------------------------------------

#[tokio::test]
async fn kv_bus_carries_items_between_pipelines() {
    let dir = tempfile::tempdir().unwrap();
    let chat = CountingChat::new();

    // Stage 1 writes judged papers to the bus.
    filter_chain(
        dir.path(),
        chat,
        vec![
            paper("2400.00001", "cats", "2024-01-01"),
            paper("2400.00002", "dogs", "2024-01-02"),
        ],
    )
    .execute(None)
    .await
    .unwrap();

    // Stage 2, in a separate DAG, reads the survivors off the bus.
    let mut dag = DagPipeline::new();
    dag.add_operator(
        "read",
        Arc::new(KvReader::new(dir.path().join("filtered_papers"), "filtered_papers")),
        &[],
    )
    .unwrap();
    let results = dag.execute(None).await.unwrap();

    let ids: Vec<&str> = results["read"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["2400.00001"]);
}
