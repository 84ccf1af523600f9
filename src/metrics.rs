// Metrics and observability module
// Self-metrics of the deferred pipeline: lost observations, delivery
// outcomes and flush pass timing, registered in the default registry
//
// Numan Thabit 2025 Nov

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};

pub static LOST_OBSERVATIONS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "deferred_prom_lost_observations_total",
        "observations dropped because the buffer was full"
    )
    .unwrap()
});

pub static DELIVERED_OBSERVATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "deferred_prom_delivered_observations_total",
        "observations forwarded to the sink",
        &["kind"]
    )
    .unwrap()
});

pub static DELIVERY_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "deferred_prom_delivery_failures_total",
        "observations the sink failed to accept",
        &["kind"]
    )
    .unwrap()
});

pub static FLUSH_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "deferred_prom_flush_duration_seconds",
        "wall time of one drain pass"
    )
    .unwrap()
});
