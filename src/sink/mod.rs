// Metrics sink module
// The consumer contract the pipeline reports through, plus the storage
// adapter factory that picks an implementation by driver name
//
// Numan Thabit 2025 Nov

pub mod prometheus;

pub use self::prometheus::PrometheusSink;

use crate::errors::MetricsError;
use std::sync::Arc;

/// Everything needed to get or register one metric family
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDescriptor {
    pub name: String,
    pub help: String,
    pub label_names: Vec<String>,
    /// `None` keeps the sink's default buckets (histograms only)
    pub buckets: Option<Vec<f64>>,
    /// Whether the sink's namespace prefix applies
    pub namespaced: bool,
}

impl MetricDescriptor {
    pub fn new(name: &str, help: &str, label_names: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            label_names: label_names.iter().map(|l| l.to_string()).collect(),
            buckets: None,
            namespaced: true,
        }
    }

    pub fn with_buckets(mut self, buckets: Option<Vec<f64>>) -> Self {
        self.buckets = buckets;
        self
    }

    /// Register under the bare name, without the namespace prefix.
    pub fn without_namespace(mut self) -> Self {
        self.namespaced = false;
        self
    }

    pub fn arity(&self) -> usize {
        self.label_names.len()
    }
}

pub trait MetricsSink: Send + Sync {
    fn histogram(
        &self,
        desc: &MetricDescriptor,
    ) -> Result<Arc<dyn HistogramHandle>, MetricsError>;
    fn counter(&self, desc: &MetricDescriptor) -> Result<Arc<dyn CounterHandle>, MetricsError>;
}

pub trait HistogramHandle: Send + Sync {
    fn name(&self) -> &str;
    /// `labels` must have exactly the arity declared at registration.
    fn observe(&self, value: f64, labels: &[String]) -> Result<(), MetricsError>;
}

pub trait CounterHandle: Send + Sync {
    fn name(&self) -> &str;
    fn increment(&self, labels: &[String]) -> Result<(), MetricsError>;
}

pub fn check_arity(metric: &str, expected: usize, labels: &[String]) -> Result<(), MetricsError> {
    if labels.len() == expected {
        Ok(())
    } else {
        Err(MetricsError::Arity {
            metric: metric.to_string(),
            expected,
            actual: labels.len(),
        })
    }
}

/// Storage adapter factory. Shared-memory and networked stores are not
/// available in-process, so anything but `memory` fails at startup.
pub fn make_sink(driver: &str, namespace: &str) -> Result<Arc<PrometheusSink>, MetricsError> {
    match driver.trim().to_ascii_lowercase().as_str() {
        "memory" | "in_memory" => Ok(Arc::new(PrometheusSink::new(namespace))),
        other => Err(MetricsError::UnsupportedDriver(other.to_string())),
    }
}
