//! Prometheus metrics for the depot server.
//!
//! Exposes counters and latency for file, directory and repository
//! operations, permission denials, and the objects moved or deleted by
//! directory mutations.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Labels never carry repository names or paths, only operation names and
//! outcomes. Restrict the endpoint at the network level.

use crate::service::{ServiceError, ServiceResult};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::future::Future;
use std::sync::{LazyLock, Once};
use std::time::Instant;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Operation metrics
pub static OPERATIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "depot_operations_total",
            "Service operations by operation and outcome",
        ),
        &["operation", "outcome"],
    )
    .expect("metric creation failed")
});

pub static OPERATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "depot_operation_duration_seconds",
            "Time taken by service operations",
        )
        .buckets(vec![
            0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
        ]),
        &["operation"],
    )
    .expect("metric creation failed")
});

pub static PERMISSION_DENIALS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "depot_permission_denials_total",
            "Requests rejected by the permission resolver",
        ),
        &["operation"],
    )
    .expect("metric creation failed")
});

// Object metrics
pub static OBJECTS_MOVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "depot_objects_moved_total",
        "Objects copied and deleted by file and directory moves",
    )
    .expect("metric creation failed")
});

pub static OBJECTS_DELETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "depot_objects_deleted_total",
        "Objects deleted by file and directory removal",
    )
    .expect("metric creation failed")
});

pub static DELETE_BATCHES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "depot_delete_batches_total",
        "Batch-delete calls issued by directory removal",
    )
    .expect("metric creation failed")
});

pub static BYTES_UPLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("depot_bytes_uploaded_total", "Total bytes uploaded")
        .expect("metric creation failed")
});

// Reconciliation metrics
pub static RECONCILE_CHANGES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "depot_reconcile_changes_total",
            "Path records added or pruned by reconciliation",
        ),
        &["change"],
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Safe to call more than once.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(OPERATIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(OPERATION_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PERMISSION_DENIALS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(OBJECTS_MOVED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(OBJECTS_DELETED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DELETE_BATCHES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_UPLOADED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(RECONCILE_CHANGES.clone()))
            .expect("metric registration failed");
    });
}

/// Run a service operation, recording its outcome and duration.
pub async fn timed<T, F>(operation: &'static str, fut: F) -> ServiceResult<T>
where
    F: Future<Output = ServiceResult<T>>,
{
    let started = Instant::now();
    let result = fut.await;
    let outcome = match &result {
        Ok(_) => "success",
        Err(e) => e.kind(),
    };
    if let Err(ServiceError::PermissionDenied { .. }) = &result {
        PERMISSION_DENIALS.with_label_values(&[operation]).inc();
    }
    OPERATIONS.with_label_values(&[operation, outcome]).inc();
    OPERATION_DURATION
        .with_label_values(&[operation])
        .observe(started.elapsed().as_secs_f64());
    result
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
