// Prometheus sink adapter
// Implements the sink contract on top of a `prometheus::Registry`, caching
// metric families so repeated registration returns the same handle
//
// Numan Thabit 2025 Nov

use super::{check_arity, CounterHandle, HistogramHandle, MetricDescriptor, MetricsSink};
use crate::errors::MetricsError;
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

pub struct PrometheusSink {
    namespace: String,
    registry: Registry,
    histograms: RwLock<HashMap<String, Arc<PrometheusHistogram>>>,
    counters: RwLock<HashMap<String, Arc<PrometheusCounter>>>,
}

impl PrometheusSink {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            registry: Registry::new(),
            histograms: RwLock::new(HashMap::new()),
            counters: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encode this sink's families in the text exposition format.
    pub fn render(&self) -> Result<String, MetricsError> {
        encode_text(&self.registry.gather())
    }

    fn full_name(&self, desc: &MetricDescriptor) -> String {
        if desc.namespaced && !self.namespace.is_empty() {
            format!("{}_{}", self.namespace, desc.name)
        } else {
            desc.name.clone()
        }
    }

    fn registration_error(metric: &str, reason: impl ToString) -> MetricsError {
        MetricsError::Registration {
            metric: metric.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub fn encode_text(families: &[prometheus::proto::MetricFamily]) -> Result<String, MetricsError> {
    let mut buf = Vec::new();
    TextEncoder::new()
        .encode(families, &mut buf)
        .map_err(|e| MetricsError::Unavailable(format!("encode metrics: {e}")))?;
    String::from_utf8(buf).map_err(|e| MetricsError::Unavailable(format!("encode metrics: {e}")))
}

impl MetricsSink for PrometheusSink {
    fn histogram(
        &self,
        desc: &MetricDescriptor,
    ) -> Result<Arc<dyn HistogramHandle>, MetricsError> {
        let full = self.full_name(desc);
        let mut histograms = self.histograms.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = histograms.get(&full) {
            if existing.label_names != desc.label_names {
                return Err(Self::registration_error(
                    &full,
                    "already registered with different label names",
                ));
            }
            return Ok(existing.clone());
        }

        let mut opts = HistogramOpts::new(full.clone(), desc.help.clone());
        if let Some(buckets) = &desc.buckets {
            opts = opts.buckets(buckets.clone());
        }
        let names: Vec<&str> = desc.label_names.iter().map(String::as_str).collect();
        let vec = HistogramVec::new(opts, &names).map_err(|e| Self::registration_error(&full, e))?;
        self.registry
            .register(Box::new(vec.clone()))
            .map_err(|e| Self::registration_error(&full, e))?;

        let handle = Arc::new(PrometheusHistogram {
            name: full.clone(),
            label_names: desc.label_names.clone(),
            vec,
        });
        histograms.insert(full, handle.clone());
        Ok(handle)
    }

    fn counter(&self, desc: &MetricDescriptor) -> Result<Arc<dyn CounterHandle>, MetricsError> {
        let full = self.full_name(desc);
        let mut counters = self.counters.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = counters.get(&full) {
            if existing.label_names != desc.label_names {
                return Err(Self::registration_error(
                    &full,
                    "already registered with different label names",
                ));
            }
            return Ok(existing.clone());
        }

        let names: Vec<&str> = desc.label_names.iter().map(String::as_str).collect();
        let vec = CounterVec::new(Opts::new(full.clone(), desc.help.clone()), &names)
            .map_err(|e| Self::registration_error(&full, e))?;
        self.registry
            .register(Box::new(vec.clone()))
            .map_err(|e| Self::registration_error(&full, e))?;

        let handle = Arc::new(PrometheusCounter {
            name: full.clone(),
            label_names: desc.label_names.clone(),
            vec,
        });
        counters.insert(full, handle.clone());
        Ok(handle)
    }
}

pub struct PrometheusHistogram {
    name: String,
    label_names: Vec<String>,
    vec: HistogramVec,
}

impl HistogramHandle for PrometheusHistogram {
    fn name(&self) -> &str {
        &self.name
    }

    fn observe(&self, value: f64, labels: &[String]) -> Result<(), MetricsError> {
        check_arity(&self.name, self.label_names.len(), labels)?;
        if !value.is_finite() || value < 0.0 {
            return Err(MetricsError::Rejected {
                metric: self.name.clone(),
                reason: format!("observation {value} is not a finite non-negative number"),
            });
        }
        let values: Vec<&str> = labels.iter().map(String::as_str).collect();
        let histogram = self
            .vec
            .get_metric_with_label_values(&values)
            .map_err(|e| MetricsError::Rejected {
                metric: self.name.clone(),
                reason: e.to_string(),
            })?;
        histogram.observe(value);
        Ok(())
    }
}

pub struct PrometheusCounter {
    name: String,
    label_names: Vec<String>,
    vec: CounterVec,
}

impl CounterHandle for PrometheusCounter {
    fn name(&self) -> &str {
        &self.name
    }

    fn increment(&self, labels: &[String]) -> Result<(), MetricsError> {
        check_arity(&self.name, self.label_names.len(), labels)?;
        let values: Vec<&str> = labels.iter().map(String::as_str).collect();
        let counter = self
            .vec
            .get_metric_with_label_values(&values)
            .map_err(|e| MetricsError::Rejected {
                metric: self.name.clone(),
                reason: e.to_string(),
            })?;
        counter.inc();
        Ok(())
    }
}
