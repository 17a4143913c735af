//! Operator contract and DAG execution engine.
//!
//! A pipeline is a set of named operators with declared dependencies. The
//! engine computes a layered execution order up front (recomputed on every
//! `add_operator`, so graph mistakes surface at construction time), then
//! runs each layer's operators concurrently and threads results from
//! dependencies to dependents.
//!
//! Operators exchange `serde_json::Value` payloads. Typed data crosses an
//! operator boundary through the [`encode`]/[`decode`] helpers, which keeps
//! the engine fully generic over what flows through it.
//!
//! ## Input threading
//!
//! - zero dependencies: the `initial` value passed to `execute` (null when
//!   absent);
//! - one dependency: that dependency's result;
//! - multiple dependencies: a JSON array of the dependency results, in the
//!   order the dependencies were declared in `add_operator`.
//!
//! ## Failure
//!
//! The first operator error in a layer aborts the run: operators already
//! launched in that layer run to completion, later layers never start, and
//! every operator that was set up gets its `cleanup` called.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::{PipelineError, Result};

/// The unit of work scheduled by the engine.
///
/// `process` must be safe to run concurrently with other operators'
/// `process`; any non-idempotent side effect must be guarded through the
/// state store. `setup` runs once per execution before the first layer and
/// must be idempotent; `cleanup` releases whatever `setup` acquired.
#[async_trait]
pub trait Operator: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn setup(&self) -> Result<()> {
        Ok(())
    }

    async fn process(&self, input: Value) -> Result<Value>;

    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

/// Serialize a typed payload onto the operator wire.
pub fn encode<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Deserialize a typed payload off the operator wire.
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| PipelineError::data(format!("unexpected payload shape: {e}")))
}

/// Execution state of a node within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// A named operator plus its wiring and per-run state.
pub struct OperatorNode {
    pub name: String,
    pub operator: Arc<dyn Operator>,
    /// Declaration order fixes multi-dependency fan-in order.
    pub dependencies: Vec<String>,
    pub status: OperatorStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl OperatorNode {
    fn reset(&mut self) {
        self.status = OperatorStatus::Pending;
        self.result = None;
        self.error = None;
    }
}

/// Result key for the initial value, when one is provided to `execute`.
pub const INITIAL_KEY: &str = "initial";

/// A run-scoped DAG of operators.
#[derive(Default)]
pub struct DagPipeline {
    nodes: HashMap<String, OperatorNode>,
    /// Names in `add_operator` order; keeps layering deterministic.
    insertion_order: Vec<String>,
    /// Layers of names; every layer only depends on earlier layers.
    execution_order: Vec<Vec<String>>,
}

impl DagPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named operator with its dependencies.
    ///
    /// Rejects duplicate names and dependencies that have not been added
    /// yet; because dependencies must pre-exist, the public API cannot
    /// build a cyclic graph. The layered order is recomputed on every call
    /// so construction errors surface here, not at `execute`.
    pub fn add_operator(
        &mut self,
        name: impl Into<String>,
        operator: Arc<dyn Operator>,
        dependencies: &[&str],
    ) -> Result<()> {
        let name = name.into();
        if self.nodes.contains_key(&name) {
            return Err(PipelineError::DuplicateOperator(name));
        }
        for dep in dependencies {
            if !self.nodes.contains_key(*dep) {
                return Err(PipelineError::UnknownDependency {
                    name,
                    dependency: (*dep).to_string(),
                });
            }
        }

        self.insertion_order.push(name.clone());
        self.nodes.insert(
            name.clone(),
            OperatorNode {
                name,
                operator,
                dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
                status: OperatorStatus::Pending,
                result: None,
                error: None,
            },
        );

        self.execution_order = self.compute_execution_order()?;
        Ok(())
    }

    /// Number of operators in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Kahn-style layering: peel off the set of nodes whose dependencies
    /// are all already layered. An empty peel with nodes remaining means a
    /// cycle.
    fn compute_execution_order(&self) -> Result<Vec<Vec<String>>> {
        let mut remaining: HashSet<&str> =
            self.insertion_order.iter().map(String::as_str).collect();
        let mut order = Vec::new();

        while !remaining.is_empty() {
            let layer: Vec<String> = self
                .insertion_order
                .iter()
                .filter(|name| remaining.contains(name.as_str()))
                .filter(|name| {
                    self.nodes[name.as_str()]
                        .dependencies
                        .iter()
                        .all(|dep| !remaining.contains(dep.as_str()))
                })
                .cloned()
                .collect();

            if layer.is_empty() {
                return Err(PipelineError::CircularDependency);
            }
            for name in &layer {
                remaining.remove(name.as_str());
            }
            order.push(layer);
        }

        Ok(order)
    }

    /// Execute the pipeline to completion.
    ///
    /// Returns every node's result keyed by name, plus [`INITIAL_KEY`] when
    /// an initial value was given. Each call starts from a clean slate, so
    /// a pipeline can be executed repeatedly (the summarize loop relies on
    /// this).
    pub async fn execute(&mut self, initial: Option<Value>) -> Result<HashMap<String, Value>> {
        for node in self.nodes.values_mut() {
            node.reset();
        }

        let results: Arc<DashMap<String, Value>> = Arc::new(DashMap::new());
        if let Some(ref value) = initial {
            results.insert(INITIAL_KEY.to_string(), value.clone());
        }

        if let Err(e) = self.setup_all().await {
            self.cleanup_all().await;
            return Err(e);
        }

        let outcome = self.run_layers(&initial, &results).await;

        // Teardown happens whether the run succeeded or not.
        self.cleanup_all().await;

        outcome?;

        Ok(Arc::try_unwrap(results)
            .unwrap_or_else(|arc| (*arc).clone())
            .into_iter()
            .collect())
    }

    async fn setup_all(&self) -> Result<()> {
        for name in &self.insertion_order {
            self.nodes[name].operator.setup().await?;
        }
        Ok(())
    }

    async fn cleanup_all(&self) {
        for name in &self.insertion_order {
            if let Err(e) = self.nodes[name].operator.cleanup().await {
                warn!("cleanup of operator '{name}' failed: {e}");
            }
        }
    }

    async fn run_layers(
        &mut self,
        initial: &Option<Value>,
        results: &Arc<DashMap<String, Value>>,
    ) -> Result<()> {
        let order = self.execution_order.clone();
        for (index, layer) in order.iter().enumerate() {
            debug!("executing layer {index}: {layer:?}");

            let mut tasks = Vec::with_capacity(layer.len());
            for name in layer {
                let node = self
                    .nodes
                    .get_mut(name)
                    .expect("layered node exists in graph");
                node.status = OperatorStatus::Running;

                let input = gather_input(&node.dependencies, initial, results);
                let operator = Arc::clone(&node.operator);
                let task_name = name.clone();
                let store = Arc::clone(results);
                tasks.push(async move {
                    debug!("running '{task_name}' ({})", operator.name());
                    let output = operator.process(input).await;
                    if let Ok(ref value) = output {
                        store.insert(task_name.clone(), value.clone());
                    }
                    (task_name, output)
                });
            }

            let mut first_error = None;
            for (name, output) in join_all(tasks).await {
                let node = self.nodes.get_mut(&name).expect("node exists");
                match output {
                    Ok(value) => {
                        node.status = OperatorStatus::Completed;
                        node.result = Some(value);
                    }
                    Err(e) => {
                        error!("operator '{name}' failed: {e}");
                        node.status = OperatorStatus::Failed;
                        node.error = Some(e.to_string());
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                }
            }

            if let Some(e) = first_error {
                return Err(e);
            }
        }

        info!("pipeline completed: {} operators", self.nodes.len());
        Ok(())
    }

    /// Status of a node, for inspection after a run.
    pub fn status(&self, name: &str) -> Option<OperatorStatus> {
        self.nodes.get(name).map(|n| n.status)
    }
}

/// Resolve an operator's input from its dependencies' results.
fn gather_input(
    dependencies: &[String],
    initial: &Option<Value>,
    results: &DashMap<String, Value>,
) -> Value {
    let fetch = |dep: &String| {
        results
            .get(dep)
            .map(|entry| entry.value().clone())
            .unwrap_or(Value::Null)
    };
    match dependencies {
        [] => initial.clone().unwrap_or(Value::Null),
        [only] => fetch(only),
        many => Value::Array(many.iter().map(fetch).collect()),
    }
}
