// Instrument registry
// Registers the five metric families once at startup and maps composed
// label sets onto them at drain time
//
// Numan Thabit 2025 Nov

use crate::config::AppConfig;
use crate::errors::MetricsError;
use crate::event::{BufferedObservation, EventKind, Instrument, RawEvent};
use crate::flusher::EventResolver;
use crate::labels::{LabelComposer, MetricRole};
use crate::sink::{CounterHandle, HistogramHandle, MetricDescriptor, MetricsSink};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

pub const SQL_QUERY_DURATION: &str = "sql_query_duration_seconds";
pub const HTTP_CLIENT_DURATION: &str = "http_client_request_duration_seconds";
pub const RESPONSE_TIME: &str = "response_time_seconds";
pub const EXECUTION_COUNT: &str = "execution_count";
pub const EXECUTION_LATENCY: &str = "execution_latency_seconds";

pub const EXECUTION_BUCKETS: [f64; 22] = [
    0.0, 0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 1.5, 2.0, 2.5, 5.0, 7.5,
    10.0, 20.0, 30.0, 40.0, 50.0, 60.0,
];

pub struct Instruments {
    composer: LabelComposer,
    sql_duration: Arc<dyn HistogramHandle>,
    outbound_duration: Arc<dyn HistogramHandle>,
    response_time: Arc<dyn HistogramHandle>,
    execution_count: Arc<dyn CounterHandle>,
    execution_latency: Arc<dyn HistogramHandle>,
}

impl Instruments {
    /// Get or register every family. Fails on a conflicting registration,
    /// which is a startup error.
    pub fn register(sink: &dyn MetricsSink, cfg: &AppConfig) -> Result<Self, MetricsError> {
        let composer = LabelComposer::from_config(cfg);
        let describe = |role: MetricRole, name: &str, help: &str| {
            MetricDescriptor::new(name, help, &composer.label_names(role))
        };

        let sql_duration = sink.histogram(
            &describe(
                MetricRole::SqlDuration,
                SQL_QUERY_DURATION,
                "SQL query duration in seconds",
            )
            .with_buckets(cfg.sql_buckets.clone()),
        )?;
        let outbound_duration = sink.histogram(
            &describe(
                MetricRole::OutboundDuration,
                HTTP_CLIENT_DURATION,
                "outbound HTTP request duration in seconds",
            )
            .with_buckets(cfg.http_client_buckets.clone()),
        )?;
        let response_time = sink.histogram(
            &describe(
                MetricRole::ResponseTime,
                RESPONSE_TIME,
                "inbound request response time in seconds",
            )
            .with_buckets(cfg.routes_buckets.clone()),
        )?;
        let execution_count = sink.counter(
            &describe(
                MetricRole::ExecutionCount,
                EXECUTION_COUNT,
                "handled requests per component and operation",
            )
            .without_namespace(),
        )?;
        let execution_latency = sink.histogram(
            &describe(
                MetricRole::ExecutionLatency,
                EXECUTION_LATENCY,
                "handler latency per component and operation",
            )
            .with_buckets(Some(EXECUTION_BUCKETS.to_vec()))
            .without_namespace(),
        )?;

        Ok(Self {
            composer,
            sql_duration,
            outbound_duration,
            response_time,
            execution_count,
            execution_latency,
        })
    }

    pub fn composer(&self) -> &LabelComposer {
        &self.composer
    }

    fn instrument(&self, role: MetricRole) -> Instrument {
        match role {
            MetricRole::SqlDuration => Instrument::Histogram(self.sql_duration.clone()),
            MetricRole::OutboundDuration => Instrument::Histogram(self.outbound_duration.clone()),
            MetricRole::ResponseTime => Instrument::Histogram(self.response_time.clone()),
            MetricRole::ExecutionCount => Instrument::Counter(self.execution_count.clone()),
            MetricRole::ExecutionLatency => Instrument::Histogram(self.execution_latency.clone()),
        }
    }

    /// Outbound labels are cheap, so outbound calls are composed on the hot
    /// path and buffered ready to deliver.
    pub fn outbound_observation(
        &self,
        method: &str,
        host: &str,
        status: u16,
        elapsed: Duration,
    ) -> BufferedObservation {
        BufferedObservation {
            kind: EventKind::OutboundCallCompleted,
            instrument: self.instrument(MetricRole::OutboundDuration),
            labels: LabelComposer::outbound(method, host, status),
            value: elapsed.as_secs_f64(),
            captured_at: SystemTime::now(),
        }
    }
}

impl EventResolver for Instruments {
    fn resolve(&self, event: &RawEvent) -> Vec<BufferedObservation> {
        let kind = event.kind();
        let seconds = event.duration_seconds();
        self.composer
            .compose(event)
            .into_iter()
            .map(|(role, labels)| BufferedObservation {
                kind,
                instrument: self.instrument(role),
                labels,
                value: match role {
                    MetricRole::ExecutionCount => 1.0,
                    _ => seconds,
                },
                captured_at: event.captured_at,
            })
            .collect()
    }
}
