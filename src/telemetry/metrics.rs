//! Metric instrument factories.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without an OTLP endpoint the global provider is a no-op.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("joinq")
}

/// Counter: raw targets seen by ingestion.
/// Labels: `result` ("added" | "duplicate" | "rejected").
pub fn targets_ingested() -> Counter<u64> {
    meter()
        .u64_counter("joinq.targets.ingested")
        .with_description("Raw targets seen by ingestion")
        .build()
}

/// Counter: assignment rows created.
/// Labels: `path` ("distribute" | "replacement").
pub fn assignments_created() -> Counter<u64> {
    meter()
        .u64_counter("joinq.assignments.created")
        .with_description("Assignments created")
        .build()
}

/// Counter: classified join attempts.
/// Labels: `outcome`.
pub fn joins() -> Counter<u64> {
    meter()
        .u64_counter("joinq.joins")
        .with_description("Join attempts by classified outcome")
        .build()
}

/// Histogram: rate-limit backoff taken, in seconds.
pub fn backoff_seconds() -> Histogram<f64> {
    meter()
        .f64_histogram("joinq.backoff.seconds")
        .with_description("Rate-limit backoff per occurrence")
        .with_unit("s")
        .build()
}

/// Counter: dead targets that found the reserve empty.
pub fn reserve_exhausted() -> Counter<u64> {
    meter()
        .u64_counter("joinq.reserve.exhausted")
        .with_description("Dead-target replacements that found no reserve")
        .build()
}
