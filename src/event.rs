// Event and observation types
// Raw events captured on the hot path and the observations they turn into
// once labels are composed
//
// Numan Thabit 2025 Nov

use crate::errors::MetricsError;
use crate::route::MatchedRoute;
use crate::sink::{CounterHandle, HistogramHandle};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    QueryExecuted,
    OutboundCallCompleted,
    RequestCompleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::QueryExecuted => "query_executed",
            EventKind::OutboundCallCompleted => "outbound_call_completed",
            EventKind::RequestCompleted => "request_completed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum EventPayload {
    QueryExecuted {
        sql: String,
        /// Resolved at capture time, the stack is gone by drain time.
        /// `None` when caller attribution is disabled.
        caller: Option<String>,
    },
    OutboundCallCompleted {
        method: String,
        host: String,
        status: u16,
    },
    RequestCompleted {
        method: String,
        route: MatchedRoute,
        status: u16,
    },
}

/// Immutable capture of one event. Duration is measured by the caller and
/// never recomputed.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub captured_at: SystemTime,
    pub duration: Duration,
    pub payload: EventPayload,
}

impl RawEvent {
    pub fn new(duration: Duration, payload: EventPayload) -> Self {
        Self {
            captured_at: SystemTime::now(),
            duration,
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::QueryExecuted { .. } => EventKind::QueryExecuted,
            EventPayload::OutboundCallCompleted { .. } => EventKind::OutboundCallCompleted,
            EventPayload::RequestCompleted { .. } => EventKind::RequestCompleted,
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        self.duration.as_secs_f64()
    }
}

#[derive(Clone)]
pub enum Instrument {
    Histogram(Arc<dyn HistogramHandle>),
    Counter(Arc<dyn CounterHandle>),
}

impl Instrument {
    pub fn name(&self) -> &str {
        match self {
            Instrument::Histogram(h) => h.name(),
            Instrument::Counter(c) => c.name(),
        }
    }

    /// Counters ignore `value` and increment by one.
    pub fn record(&self, value: f64, labels: &[String]) -> Result<(), MetricsError> {
        match self {
            Instrument::Histogram(h) => h.observe(value, labels),
            Instrument::Counter(c) => c.increment(labels),
        }
    }
}

impl fmt::Debug for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instrument::Histogram(h) => f.debug_tuple("Histogram").field(&h.name()).finish(),
            Instrument::Counter(c) => f.debug_tuple("Counter").field(&c.name()).finish(),
        }
    }
}

/// `(metric, ordered label values, value)` ready for the sink
#[derive(Debug, Clone)]
pub struct BufferedObservation {
    pub kind: EventKind,
    pub instrument: Instrument,
    pub labels: Vec<String>,
    pub value: f64,
    /// When the underlying event was captured, not when it was resolved
    pub captured_at: SystemTime,
}

impl BufferedObservation {
    /// Time spent waiting in the buffer so far. Zero if the clock stepped back.
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed().unwrap_or_default()
    }

    pub fn metric_name(&self) -> &str {
        self.instrument.name()
    }

    pub fn deliver(&self) -> Result<(), MetricsError> {
        self.instrument.record(self.value, &self.labels)
    }
}

/// Buffer element: labels already composed, or a raw event whose
/// normalization waits for the drain.
#[derive(Debug, Clone)]
pub enum Pending {
    Ready(BufferedObservation),
    Raw(RawEvent),
}

impl Pending {
    pub fn kind(&self) -> EventKind {
        match self {
            Pending::Ready(obs) => obs.kind,
            Pending::Raw(event) => event.kind(),
        }
    }
}
