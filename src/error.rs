//! Unified error type for the paperflow library.
//!
//! One `thiserror` enum covers every layer: graph construction, stores,
//! catalog access, LLM calls, and payload decoding. The binary wraps these
//! with `anyhow` context at the edge; the library itself stays typed.

use thiserror::Error;

/// Top-level error type for pipelines, stores, and operators.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// An operator with this name was already added to the pipeline.
    #[error("operator with name '{0}' already exists")]
    DuplicateOperator(String),

    /// A declared dependency was never added.
    #[error("dependency '{dependency}' of operator '{name}' does not exist")]
    UnknownDependency { name: String, dependency: String },

    /// The operator graph cannot be layered.
    #[error("circular dependency detected in pipeline")]
    CircularDependency,

    /// Configuration is missing or invalid.
    #[error("config error: {0}")]
    Config(String),

    /// The paper catalog returned something we cannot use.
    #[error("catalog error: {0}")]
    Catalog(String),

    /// A chat-completion call failed after retries.
    #[error("llm error: {0}")]
    Llm(String),

    /// An operator payload did not have the expected shape.
    #[error("payload error: {0}")]
    Data(String),

    /// An operator failed in a way that aborts the run.
    #[error("execution error: {0}")]
    Execution(String),

    /// HTTP transport failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Filesystem failure (stores, PDF cache).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML config parse failure.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl PipelineError {
    /// Shorthand for a payload-shape error.
    pub fn data(msg: impl Into<String>) -> Self {
        PipelineError::Data(msg.into())
    }

    /// Shorthand for a config error.
    pub fn config(msg: impl Into<String>) -> Self {
        PipelineError::Config(msg.into())
    }
}

/// Library-wide result alias.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_operator_message() {
        let err = PipelineError::DuplicateOperator("source".into());
        assert_eq!(err.to_string(), "operator with name 'source' already exists");
    }

    #[test]
    fn unknown_dependency_message() {
        let err = PipelineError::UnknownDependency {
            name: "sink".into(),
            dependency: "missing".into(),
        };
        assert!(err.to_string().contains("'missing'"));
        assert!(err.to_string().contains("'sink'"));
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: PipelineError = io.into();
        assert!(matches!(err, PipelineError::Io(_)));
    }
}
