mod case;
mod runner;
mod source;

pub use case::{CaseCheck, ConformanceCase, ExpectedError, CONFORMANCE_SCHEMA_V1};
pub use runner::{assert_case, run_case, Observed};
pub use source::{discover_cases, read_case};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum YdToolError {
    #[error("Failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse case {path}: {source}")]
    ParseCase {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Invalid case schema version \"{found}\", expected \"{expected}\".")]
    InvalidSchemaVersion { expected: String, found: String },
    #[error("No .json cases under {path}.")]
    CasesEmpty { path: PathBuf },
    #[error("Engine error: {0}")]
    Engine(#[from] yd_core::YaadeError),
    #[error("Mismatch in {field}. expected={expected} actual={actual}")]
    Mismatch {
        field: String,
        expected: String,
        actual: String,
    },
    #[error("Failed to serialize value for diff: {0}")]
    Serialize(serde_json::Error),
}
