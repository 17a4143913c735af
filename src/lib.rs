//! # paperflow
//!
//! Resumable DAG pipelines for research-paper digests.
//!
//! ## Overview
//!
//! paperflow runs recurring content-processing workflows against a live,
//! growing catalog: fetch paper metadata, filter by topical relevance with
//! an LLM, download and extract PDF bodies, generate summaries, and push
//! digests to a chat webhook. Runs may crash or be re-invoked at any time;
//! every expensive action happens at most once per (item, stage) pair.
//!
//! The crate is built from four pieces:
//!
//! - [`dag`] - the operator contract and a layered, concurrently-executing
//!   DAG engine
//! - [`store`] - durable KV and pending/finished state stores that carry
//!   progress across runs
//! - [`operators`] - the standard operator library (source, reader, LLM
//!   processors, webhook sink, store wrappers, transforms)
//! - [`workflow`] - the three pipeline assemblies (`filter`, `summarize`,
//!   `push`)
//!
//! ## Resumability
//!
//! Each stage owns a state namespace. A `FilterFinishedIds` operator at the
//! head of a stage drops items the stage already finished; a
//! `MarkIdsAsFinished` at the tail records success only after the stage's
//! side effect landed. A crash in between leaves items pending, and the
//! next run picks them up again.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use paperflow::{AppConfig, LlmClient, workflow};
//!
//! let config = AppConfig::from_yaml_file("config.yaml")?;
//! let chat = Arc::new(LlmClient::new(&config.llm)?);
//! let summary = workflow::run_summarize(&config, chat).await?;
//! println!("processed {} papers in {} rounds", summary.processed, summary.rounds);
//! # Ok::<(), paperflow::PipelineError>(())
//! ```

pub mod config;
pub mod dag;
pub mod error;
pub mod model;
pub mod operators;
pub mod retry;
pub mod store;
pub mod workflow;

pub use config::{AppConfig, LlmConfig, StorageConfig, TopicList};
pub use dag::{DagPipeline, Operator, OperatorStatus};
pub use error::{PipelineError, Result};
pub use model::{canonical_id, Paper, PaperWithSummary};
pub use operators::{ChatCompletion, LlmClient};
pub use retry::{with_retry, RetryPolicy};
pub use store::{IdState, KvStore, StateStore};
