//! Integration tests for telemetry initialization and span helpers.

use joinq::event::Outcome;
use joinq::model::WorkerId;
use uuid::Uuid;

#[test]
fn telemetry_initializes_without_endpoint() {
    // A global subscriber can only be set once per process; a second init
    // in the same binary returns Err, which is acceptable here.
    let config = joinq::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "joinq-test".to_string(),
        default_level: "info".to_string(),
    };
    let _guard = joinq::telemetry::init_telemetry(config);
}

#[test]
fn worker_span_records_outcomes() {
    let span = joinq::telemetry::join::start_worker_span(WorkerId(7), Uuid::new_v4());
    joinq::telemetry::join::record_outcome(&span, "https://t.me/alpha", Outcome::Success);
    joinq::telemetry::join::record_outcome(&span, "https://t.me/beta", Outcome::RateLimited);
    span.record("join.processed", 2u64);
}

#[test]
fn metric_instruments_work_without_a_provider() {
    use opentelemetry::KeyValue;

    joinq::telemetry::metrics::targets_ingested().add(3, &[KeyValue::new("result", "added")]);
    joinq::telemetry::metrics::assignments_created().add(1, &[KeyValue::new("path", "replacement")]);
    joinq::telemetry::metrics::joins().add(1, &[KeyValue::new("outcome", "success")]);
    joinq::telemetry::metrics::backoff_seconds().record(35.0, &[]);
    joinq::telemetry::metrics::reserve_exhausted().add(1, &[]);
}
