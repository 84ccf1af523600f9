// Error types and error handling module
// This file defines the error type shared by the sink adapters, the metric
// registration step and configuration validation
//
// Numan Thabit 2025 Nov

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metric registration failed for {metric}: {reason}")]
    Registration { metric: String, reason: String },
    #[error("label arity mismatch for {metric}: expected {expected}, got {actual}")]
    Arity {
        metric: String,
        expected: usize,
        actual: usize,
    },
    #[error("sink rejected observation for {metric}: {reason}")]
    Rejected { metric: String, reason: String },
    #[error("sink unavailable: {0}")]
    Unavailable(String),
    #[error("the storage driver [{0}] is not supported")]
    UnsupportedDriver(String),
    #[error("invalid buckets for {name}: {reason}")]
    InvalidBuckets { name: String, reason: String },
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<config::ConfigError> for MetricsError {
    fn from(err: config::ConfigError) -> Self {
        MetricsError::Config(err.to_string())
    }
}
