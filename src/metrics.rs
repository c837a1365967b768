use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, HistogramOpts,
    HistogramVec, IntCounterVec, IntGauge,
};

const LATENCY_BUCKETS: &[f64] = &[
    1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0, 30000.0,
];

// Client responses by status code
pub static REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "edgeroute_requests_total",
        "Client requests answered by the edge router",
        &["code"]
    )
    .expect("Failed to register prometheus metric: edgeroute_requests_total")
});

// Time spent forwarding to backends
pub static FORWARD_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    let opts = HistogramOpts::new(
        "edgeroute_forward_latency",
        "Backend forward latency in milliseconds",
    )
    .buckets(LATENCY_BUCKETS.to_vec());
    register_histogram_vec!(opts, &["service"])
        .expect("Failed to register prometheus metric: edgeroute_forward_latency")
});

// Rollout attempts by outcome
pub static ROLLOUTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "edgeroute_rollouts_total",
        "Router run rollouts by outcome",
        &["outcome"]
    )
    .expect("Failed to register prometheus metric: edgeroute_rollouts_total")
});

pub static SERVICES: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "edgeroute_registered_services",
        "Backend services with an open bundle subscription"
    )
    .expect("Failed to register prometheus metric: edgeroute_registered_services")
});
