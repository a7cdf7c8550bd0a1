//! Prometheus metrics for the Tessera server.
//!
//! Covers the read path, background populates and the reconciliation sweep.
//! Labels never carry identifiers, only outcome names.
//!
//! The `/metrics` endpoint is unauthenticated and should be reachable only by
//! the scraper.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::{LazyLock, Once};
use tessera_sync::{PopulateOutcome, SweepError, SweepReport};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Read path
pub static READ_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "tessera_read_requests_total",
            "Image requests by cache result",
        ),
        &["result"],
    )
    .expect("metric creation failed")
});

pub static STORE_READ_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tessera_store_read_errors_total",
        "Store reads that failed with something other than not-found",
    )
    .expect("metric creation failed")
});

pub static ORIGIN_PROXY_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "tessera_origin_proxy_failures_total",
            "Cold-path origin fetches that did not return an image",
        ),
        &["kind"],
    )
    .expect("metric creation failed")
});

// Background populates
pub static POPULATE_OUTCOMES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "tessera_populate_outcomes_total",
            "Populate calls by outcome",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static BACKGROUND_JOBS_ACTIVE: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "tessera_background_jobs_active",
        "Background populate jobs currently running",
    )
    .expect("metric creation failed")
});

pub static BACKGROUND_JOBS_REJECTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tessera_background_jobs_rejected_total",
        "Background populate jobs dropped because every slot was busy",
    )
    .expect("metric creation failed")
});

// Sweep
pub static SWEEP_INVOCATIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "tessera_sweep_invocations_total",
            "Sweep page invocations by result",
        ),
        &["result"],
    )
    .expect("metric creation failed")
});

pub static SWEEP_OBJECTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "tessera_sweep_objects_total",
            "Identifiers handled by the sweep, by action",
        ),
        &["action"],
    )
    .expect("metric creation failed")
});

pub static SWEEP_CONTINUATIONS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tessera_sweep_continuations_total",
        "Continuation messages enqueued by the sweep",
    )
    .expect("metric creation failed")
});

pub static QUEUE_CONTRACT_VIOLATIONS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tessera_queue_contract_violations_total",
        "Queue deliveries dropped for not holding exactly one valid message",
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so tests can build as many routers as they like.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(READ_REQUESTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(STORE_READ_ERRORS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ORIGIN_PROXY_FAILURES.clone()))
            .expect("metric registration failed");

        REGISTRY
            .register(Box::new(POPULATE_OUTCOMES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BACKGROUND_JOBS_ACTIVE.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BACKGROUND_JOBS_REJECTED.clone()))
            .expect("metric registration failed");

        REGISTRY
            .register(Box::new(SWEEP_INVOCATIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SWEEP_OBJECTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SWEEP_CONTINUATIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(QUEUE_CONTRACT_VIOLATIONS.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

pub fn record_populate(outcome: PopulateOutcome) {
    POPULATE_OUTCOMES
        .with_label_values(&[outcome.as_str()])
        .inc();
}

/// Record one sweep invocation and the per-identifier actions it took.
pub fn record_sweep(result: &Result<SweepReport, SweepError>) {
    let report = match result {
        Ok(report) => {
            SWEEP_INVOCATIONS.with_label_values(&["ok"]).inc();
            report
        }
        Err(SweepError::Enqueue { report, .. }) => {
            SWEEP_INVOCATIONS.with_label_values(&["enqueue_failed"]).inc();
            report
        }
        Err(e) => {
            SWEEP_INVOCATIONS.with_label_values(&[e.as_label()]).inc();
            return;
        }
    };

    for (action, count) in [
        ("fresh", report.fresh),
        ("refreshed", report.refreshed),
        ("deleted", report.deleted),
        ("failed", report.failed),
    ] {
        SWEEP_OBJECTS
            .with_label_values(&[action])
            .inc_by(count as u64);
    }
    if report.continued {
        SWEEP_CONTINUATIONS.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        register_metrics();
        register_metrics();
    }

    #[test]
    fn sweep_reports_feed_action_counters() {
        let before = SWEEP_OBJECTS.with_label_values(&["refreshed"]).get();
        let continued = SWEEP_CONTINUATIONS.get();

        record_sweep(&Ok(SweepReport {
            refreshed: 3,
            continued: true,
            ..SweepReport::default()
        }));

        assert_eq!(
            SWEEP_OBJECTS.with_label_values(&["refreshed"]).get(),
            before + 3
        );
        assert_eq!(SWEEP_CONTINUATIONS.get(), continued + 1);
    }
}
