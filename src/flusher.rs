// Deferred flusher
// Drains the observation buffer at a safe point, resolves raw events into
// observations and forwards each one to the sink. A failing observation is
// logged and skipped, it never aborts the pass
//
// Numan Thabit 2025 Nov

use crate::buffer::ObservationBuffer;
use crate::config::FlushSettings;
use crate::event::{BufferedObservation, Pending, RawEvent};
use crate::metrics::{DELIVERED_OBSERVATIONS, DELIVERY_FAILURES, FLUSH_DURATION};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Turns a raw event into the observations it stands for. Runs only inside
/// a drain pass.
pub trait EventResolver: Send + Sync {
    fn resolve(&self, event: &RawEvent) -> Vec<BufferedObservation>;
}

#[derive(Debug, Clone, Copy)]
pub struct FlushLimits {
    pub max_batch: usize,
    pub max_duration: Duration,
}

impl Default for FlushLimits {
    fn default() -> Self {
        Self::from(&FlushSettings::default())
    }
}

impl From<&FlushSettings> for FlushLimits {
    fn from(settings: &FlushSettings) -> Self {
        Self {
            max_batch: settings.max_batch.max(1),
            max_duration: settings.max_duration(),
        }
    }
}

/// Outcome of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Buffer items taken and attempted
    pub drained: usize,
    /// Observations the sink accepted
    pub delivered: usize,
    /// Observations the sink rejected, already logged and discarded
    pub failed: usize,
    /// Items a truncated pass put back for the next safe point
    pub deferred: usize,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.deferred == 0
    }

    /// Fold a later pass into this one; `deferred` is whatever the later
    /// pass left behind.
    pub fn absorb(&mut self, later: FlushReport) {
        self.drained += later.drained;
        self.delivered += later.delivered;
        self.failed += later.failed;
        self.deferred = later.deferred;
    }
}

pub struct DeferredFlusher {
    buffer: Arc<ObservationBuffer>,
    resolver: Arc<dyn EventResolver>,
    limits: FlushLimits,
}

impl DeferredFlusher {
    pub fn new(
        buffer: Arc<ObservationBuffer>,
        resolver: Arc<dyn EventResolver>,
        limits: FlushLimits,
    ) -> Self {
        Self {
            buffer,
            resolver,
            limits,
        }
    }

    pub fn buffer(&self) -> &Arc<ObservationBuffer> {
        &self.buffer
    }

    /// One pass: swap the buffer out, forward in arrival order, put back
    /// whatever the batch or time limit kept us from reaching. At least one
    /// item is attempted per non-empty pass.
    pub fn drain_and_flush(&self) -> FlushReport {
        let _draining = self.buffer.begin_drain();
        let mut report = FlushReport::default();
        let drained = self.buffer.take();
        if drained.is_empty() {
            return report;
        }

        let timer = FLUSH_DURATION.start_timer();
        let started = Instant::now();
        let mut queue = drained.into_iter();
        for item in queue.by_ref() {
            match item {
                Pending::Ready(obs) => self.forward(&obs, &mut report),
                Pending::Raw(event) => {
                    for obs in self.resolver.resolve(&event) {
                        self.forward(&obs, &mut report);
                    }
                }
            }
            report.drained += 1;
            if report.drained >= self.limits.max_batch
                || started.elapsed() >= self.limits.max_duration
            {
                break;
            }
        }

        let unreached: Vec<Pending> = queue.collect();
        report.deferred = unreached.len();
        self.buffer.restore_front(unreached);
        timer.observe_duration();

        debug!(
            drained = report.drained,
            delivered = report.delivered,
            failed = report.failed,
            deferred = report.deferred,
            "flush pass finished"
        );
        if report.failed > 0 {
            warn!(
                failed = report.failed,
                delivered = report.delivered,
                "flush pass dropped observations the sink rejected"
            );
        }
        report
    }

    fn forward(&self, obs: &BufferedObservation, report: &mut FlushReport) {
        let kind = obs.kind.as_str();
        match obs.deliver() {
            Ok(()) => {
                report.delivered += 1;
                DELIVERED_OBSERVATIONS.with_label_values(&[kind]).inc();
            }
            Err(err) => {
                report.failed += 1;
                DELIVERY_FAILURES.with_label_values(&[kind]).inc();
                warn!(
                    kind = %obs.kind,
                    metric = obs.metric_name(),
                    age_ms = obs.age().as_millis() as u64,
                    error = %err,
                    "sink rejected observation"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferState;
    use crate::errors::MetricsError;
    use crate::event::{EventKind, EventPayload, Instrument};
    use crate::sink::HistogramHandle;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::SystemTime;

    /// Records accepted values, rejects every `fail_every`-th call.
    struct FlakyHistogram {
        calls: AtomicUsize,
        fail_every: usize,
        accepted: Mutex<Vec<f64>>,
    }

    impl FlakyHistogram {
        fn new(fail_every: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_every,
                accepted: Mutex::new(Vec::new()),
            })
        }

        fn accepted(&self) -> Vec<f64> {
            self.accepted.lock().unwrap().clone()
        }
    }

    impl HistogramHandle for FlakyHistogram {
        fn name(&self) -> &str {
            "flaky"
        }

        fn observe(&self, value: f64, _labels: &[String]) -> Result<(), MetricsError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_every > 0 && call % self.fail_every == 0 {
                return Err(MetricsError::Unavailable("store went away".into()));
            }
            self.accepted.lock().unwrap().push(value);
            Ok(())
        }
    }

    /// Resolves every raw event into one observation carrying its duration.
    struct DurationResolver(Arc<FlakyHistogram>);

    impl EventResolver for DurationResolver {
        fn resolve(&self, event: &RawEvent) -> Vec<BufferedObservation> {
            vec![BufferedObservation {
                kind: event.kind(),
                instrument: Instrument::Histogram(self.0.clone()),
                labels: Vec::new(),
                value: event.duration_seconds(),
                captured_at: event.captured_at,
            }]
        }
    }

    fn outbound(histogram: &Arc<FlakyHistogram>, value: f64) -> Pending {
        Pending::Ready(BufferedObservation {
            kind: EventKind::OutboundCallCompleted,
            instrument: Instrument::Histogram(histogram.clone()),
            labels: vec!["GET".into(), "api.example.com".into(), "200".into()],
            value,
            captured_at: SystemTime::now(),
        })
    }

    fn flusher(histogram: &Arc<FlakyHistogram>, limits: FlushLimits) -> DeferredFlusher {
        DeferredFlusher::new(
            Arc::new(ObservationBuffer::new(10_000)),
            Arc::new(DurationResolver(histogram.clone())),
            limits,
        )
    }

    #[test]
    fn every_tenth_failure_is_isolated() {
        let histogram = FlakyHistogram::new(10);
        let flusher = flusher(&histogram, FlushLimits::default());
        for i in 0..100 {
            flusher.buffer().append(outbound(&histogram, i as f64 / 1000.0));
        }

        let report = flusher.drain_and_flush();

        assert_eq!(report.drained, 100);
        assert_eq!(report.delivered, 90);
        assert_eq!(report.failed, 10);
        assert_eq!(histogram.accepted().len(), 90);
        assert!(flusher.buffer().is_empty());
        assert_eq!(flusher.buffer().state(), BufferState::Empty);
    }

    #[test]
    fn failed_items_are_not_retried() {
        let histogram = FlakyHistogram::new(1);
        let flusher = flusher(&histogram, FlushLimits::default());
        flusher.buffer().append(outbound(&histogram, 0.1));
        assert_eq!(flusher.drain_and_flush().failed, 1);
        assert_eq!(flusher.drain_and_flush(), FlushReport::default());
    }

    #[test]
    fn raw_events_resolve_at_drain_time_in_order() {
        let histogram = FlakyHistogram::new(0);
        let flusher = flusher(&histogram, FlushLimits::default());
        flusher.buffer().append(outbound(&histogram, 0.5));
        flusher.buffer().append(Pending::Raw(RawEvent::new(
            Duration::from_millis(250),
            EventPayload::QueryExecuted {
                sql: "select 1".into(),
                caller: None,
            },
        )));
        flusher.buffer().append(outbound(&histogram, 0.75));

        let report = flusher.drain_and_flush();
        assert!(report.is_clean());
        assert_eq!(histogram.accepted(), vec![0.5, 0.25, 0.75]);
    }

    #[test]
    fn batch_limit_requeues_unreached_items_ahead_of_newer_ones() {
        let histogram = FlakyHistogram::new(0);
        let flusher = flusher(
            &histogram,
            FlushLimits {
                max_batch: 3,
                max_duration: Duration::from_secs(60),
            },
        );
        for i in 0..5 {
            flusher.buffer().append(outbound(&histogram, i as f64));
        }

        let first = flusher.drain_and_flush();
        assert_eq!((first.drained, first.deferred), (3, 2));
        flusher.buffer().append(outbound(&histogram, 9.0));

        let second = flusher.drain_and_flush();
        assert_eq!((second.drained, second.deferred), (3, 0));
        assert_eq!(histogram.accepted(), vec![0.0, 1.0, 2.0, 3.0, 4.0, 9.0]);
    }

    #[test]
    fn truncated_passes_racing_writers_keep_every_item_once_in_order() {
        const WRITERS: usize = 4;
        const PER_WRITER: usize = 1_500;
        let histogram = FlakyHistogram::new(0);
        let flusher = flusher(
            &histogram,
            FlushLimits {
                max_batch: 7,
                max_duration: Duration::from_secs(60),
            },
        );

        let writers: Vec<_> = (0..WRITERS)
            .map(|w| {
                let buffer = flusher.buffer().clone();
                let histogram = histogram.clone();
                std::thread::spawn(move || {
                    for i in 0..PER_WRITER {
                        buffer.append(outbound(&histogram, (w * 1_000_000 + i) as f64));
                    }
                })
            })
            .collect();

        while writers.iter().any(|w| !w.is_finished()) {
            flusher.drain_and_flush();
            std::thread::yield_now();
        }
        for w in writers {
            w.join().unwrap();
        }
        while !flusher.buffer().is_empty() {
            flusher.drain_and_flush();
        }

        let accepted = histogram.accepted();
        assert_eq!(accepted.len(), WRITERS * PER_WRITER);
        assert_eq!(flusher.buffer().lost(), 0);
        for w in 0..WRITERS {
            let from_writer: Vec<usize> = accepted
                .iter()
                .map(|v| *v as usize)
                .filter(|v| v / 1_000_000 == w)
                .map(|v| v % 1_000_000)
                .collect();
            assert_eq!(from_writer, (0..PER_WRITER).collect::<Vec<_>>(), "writer {w}");
        }
    }

    #[test]
    fn exhausted_time_budget_still_makes_progress() {
        let histogram = FlakyHistogram::new(0);
        let flusher = flusher(
            &histogram,
            FlushLimits {
                max_batch: 100,
                max_duration: Duration::ZERO,
            },
        );
        flusher.buffer().append(outbound(&histogram, 1.0));
        flusher.buffer().append(outbound(&histogram, 2.0));

        assert_eq!(flusher.drain_and_flush().drained, 1);
        assert_eq!(flusher.drain_and_flush().drained, 1);
        assert!(flusher.buffer().is_empty());
        assert_eq!(histogram.accepted(), vec![1.0, 2.0]);
    }
}
