// Instrumentation pipeline
// Host-facing entry point tying the buffer, flusher, instruments and route
// table together. Hot-path hooks only append; sink work happens at the
// safe point or in the background flush
//
// Numan Thabit 2025 Nov

use crate::buffer::ObservationBuffer;
use crate::caller::{
    BacktraceCallerResolver, CallerResolver, DisabledCallerResolver, UNKNOWN_CALLER,
};
use crate::config::AppConfig;
use crate::db::millis_to_duration;
use crate::errors::MetricsError;
use crate::event::{EventPayload, Pending, RawEvent};
use crate::flusher::{DeferredFlusher, FlushLimits, FlushReport};
use crate::instruments::Instruments;
use crate::route::{RequestRoute, RouteContext, RouteTable};
use crate::sink::MetricsSink;
use axum::http::{Method, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

pub struct Instrumentation {
    instruments: Arc<Instruments>,
    buffer: Arc<ObservationBuffer>,
    flusher: DeferredFlusher,
    routes: Arc<RouteTable>,
    caller: Arc<dyn CallerResolver>,
}

/// First half of the request protocol, handed out by `on_start` and consumed
/// by `on_safe_point`, so a request completes at most once.
#[must_use = "a request ticket records nothing until it reaches on_safe_point"]
pub struct RequestTicket {
    started: Instant,
    responded: Option<Duration>,
    method: Method,
    route: RequestRoute,
}

impl RequestTicket {
    pub fn route(&self) -> &RequestRoute {
        &self.route
    }

    /// Freeze the measured duration when the response head is ready, so time
    /// spent streaming the body to the client does not count.
    pub fn mark_responded(&mut self) {
        if self.responded.is_none() {
            self.responded = Some(self.started.elapsed());
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.responded.unwrap_or_else(|| self.started.elapsed())
    }
}

impl Instrumentation {
    pub fn new(
        cfg: &AppConfig,
        sink: &dyn MetricsSink,
        routes: RouteTable,
    ) -> Result<Self, MetricsError> {
        let instruments = Arc::new(Instruments::register(sink, cfg)?);
        let buffer = Arc::new(ObservationBuffer::new(cfg.buffer_capacity));
        let flusher = DeferredFlusher::new(
            buffer.clone(),
            instruments.clone(),
            FlushLimits::from(&cfg.flush),
        );
        let caller: Arc<dyn CallerResolver> = if cfg.collect_sql_service_caller {
            Arc::new(BacktraceCallerResolver::new(cfg.sql_service_namespace.as_str()))
        } else {
            Arc::new(DisabledCallerResolver)
        };
        debug!(
            routes = routes.len(),
            capacity = cfg.buffer_capacity,
            caller = cfg.collect_sql_service_caller,
            "instrumentation ready"
        );

        Ok(Self {
            instruments,
            buffer,
            flusher,
            routes: Arc::new(routes),
            caller,
        })
    }

    /// Swap the service-caller lookup, e.g. for a resolver that reads a
    /// task-local instead of walking the stack.
    pub fn with_caller_resolver(mut self, caller: Arc<dyn CallerResolver>) -> Self {
        self.caller = caller;
        self
    }

    pub fn buffer(&self) -> &Arc<ObservationBuffer> {
        &self.buffer
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    pub fn on_start(
        &self,
        method: Method,
        path: &str,
        matched_path: Option<&str>,
    ) -> RequestTicket {
        let ctx = RouteContext {
            method: method.clone(),
            path: path.to_string(),
            matched_path: matched_path.map(str::to_string),
        };
        RequestTicket {
            started: Instant::now(),
            responded: None,
            method,
            route: RequestRoute::new(ctx, self.routes.clone()),
        }
    }

    /// Buffer the request completion without flushing. Cheap enough to run
    /// wherever the ticket is dropped.
    pub fn complete(&self, ticket: RequestTicket, status: StatusCode) {
        let elapsed = ticket.elapsed();
        let route = ticket.route.resolve().clone();
        self.buffer.append(Pending::Raw(RawEvent::new(
            elapsed,
            EventPayload::RequestCompleted {
                method: ticket.method.to_string(),
                route,
                status: status.as_u16(),
            },
        )));
    }

    /// Second half of the request protocol: record the completion and drain
    /// everything the request produced. Blocks on sink calls, so run it off
    /// the async workers.
    pub fn on_safe_point(&self, ticket: RequestTicket, status: StatusCode) -> FlushReport {
        self.complete(ticket, status);
        self.flush()
    }

    pub fn record_outbound(&self, method: &str, host: &str, status: u16, elapsed: Duration) {
        let obs = self
            .instruments
            .outbound_observation(method, host, status, elapsed);
        self.buffer.append(Pending::Ready(obs));
    }

    /// The caller frame is resolved now, while the issuing stack still
    /// exists. Fingerprinting waits for the drain.
    pub fn record_query(&self, sql: &str, elapsed: Duration) {
        let caller = self.instruments.composer().collects_caller().then(|| {
            self.caller
                .resolve()
                .unwrap_or_else(|| UNKNOWN_CALLER.to_string())
        });
        self.buffer.append(Pending::Raw(RawEvent::new(
            elapsed,
            EventPayload::QueryExecuted {
                sql: sql.to_string(),
                caller,
            },
        )));
    }

    /// For query listeners that report elapsed time in milliseconds.
    pub fn record_query_millis(&self, sql: &str, millis: f64) {
        self.record_query(sql, millis_to_duration(millis));
    }

    pub fn flush(&self) -> FlushReport {
        self.flusher.drain_and_flush()
    }

    /// Repeat passes until nothing is left, for shutdown.
    pub fn flush_all(&self) -> FlushReport {
        let mut report = self.flush();
        while report.deferred > 0 || !self.buffer.is_empty() {
            report.absorb(self.flush());
        }
        report
    }

    /// Drain observations produced outside any request (startup work, jobs)
    /// every `period` on the blocking pool.
    pub fn spawn_periodic_flush(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if self.buffer.is_empty() {
                    continue;
                }
                let instrumentation = self.clone();
                match tokio::task::spawn_blocking(move || instrumentation.flush()).await {
                    Ok(report) if report.drained > 0 => {
                        debug!(
                            drained = report.drained,
                            failed = report.failed,
                            "background flush"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "background flush task failed"),
                }
            }
        })
    }
}
