// Database query hook
// Interface a data-access layer calls once per executed statement, plus
// helpers that time a statement and report it
//
// Numan Thabit 2025 Nov

use crate::pipeline::Instrumentation;
use std::future::Future;
use std::time::{Duration, Instant};

pub trait QueryListener: Send + Sync {
    /// `sql` is the raw statement text; fingerprinting happens later.
    fn query_executed(&self, sql: &str, elapsed: Duration);
}

impl QueryListener for Instrumentation {
    fn query_executed(&self, sql: &str, elapsed: Duration) {
        self.record_query(sql, elapsed);
    }
}

pub fn time_query<L, T, F>(listener: &L, sql: &str, run: F) -> T
where
    L: QueryListener + ?Sized,
    F: FnOnce() -> T,
{
    let started = Instant::now();
    let out = run();
    listener.query_executed(sql, started.elapsed());
    out
}

pub async fn time_query_async<L, T, F>(listener: &L, sql: &str, query: F) -> T
where
    L: QueryListener + ?Sized,
    F: Future<Output = T>,
{
    let started = Instant::now();
    let out = query.await;
    listener.query_executed(sql, started.elapsed());
    out
}

/// Millisecond reports become seconds at the capture boundary. Negative or
/// NaN input is clamped to zero.
pub fn millis_to_duration(millis: f64) -> Duration {
    if millis.is_nan() || millis <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(millis / 1000.0).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(String, Duration)>>);

    impl QueryListener for Recorder {
        fn query_executed(&self, sql: &str, elapsed: Duration) {
            self.0.lock().unwrap().push((sql.to_string(), elapsed));
        }
    }

    #[test]
    fn millis_conversion() {
        assert_eq!(millis_to_duration(1500.0), Duration::from_millis(1500));
        assert_eq!(millis_to_duration(-3.0), Duration::ZERO);
        assert_eq!(millis_to_duration(f64::NAN), Duration::ZERO);
        assert_eq!(millis_to_duration(f64::INFINITY), Duration::MAX);
    }

    #[test]
    fn time_query_reports_once_and_passes_result_through() {
        let recorder = Recorder::default();
        let rows = time_query(&recorder, "select 1", || vec![1]);
        assert_eq!(rows, vec![1]);
        let seen = recorder.0.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "select 1");
    }

    #[tokio::test]
    async fn async_queries_are_timed_across_awaits() {
        let recorder = Recorder::default();
        let n = time_query_async(&recorder, "select pg_sleep(0.01)", async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            7
        })
        .await;
        assert_eq!(n, 7);
        assert!(recorder.0.lock().unwrap()[0].1 >= Duration::from_millis(10));
    }
}
