//! # Metrics
//!
//! Prometheus metrics for monitoring the operator.
//!
//! ## Metrics Exposed
//!
//! - `azure_cluster_operator_reconciliations_total` - Reconciliation passes by resource kind
//! - `azure_cluster_operator_reconciliation_errors_total` - Failed passes by resource kind
//! - `azure_cluster_operator_reconciliation_duration_seconds` - Duration of passes by resource kind
//! - `azure_cluster_operator_state_transitions_total` - Persisted state changes by machine
//! - `azure_cluster_operator_state_write_conflicts_total` - Lost optimistic-concurrency races
//! - `azure_cluster_operator_azure_operations_total` - Azure Resource Manager calls by operation
//! - `azure_cluster_operator_azure_operation_errors_total` - Failed Azure calls by operation
//! - `azure_cluster_operator_azure_operation_duration_seconds` - Duration of Azure calls
//! - `azure_cluster_operator_watchdog_jobs_active` - Jobs currently claimed in the registry
//! - `azure_cluster_operator_watchdog_job_runs_total` - Units of watchdog work by action
//! - `azure_cluster_operator_watchdog_job_errors_total` - Failed units of watchdog work by action
//! - `azure_cluster_operator_watchdog_jobs_deduplicated_total` - Submissions dropped as duplicates

use anyhow::Result;
use prometheus::{HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "azure_cluster_operator_reconciliations_total",
            "Total number of reconciliation passes by resource kind",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "azure_cluster_operator_reconciliation_errors_total",
            "Total number of failed reconciliation passes by resource kind",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "azure_cluster_operator_reconciliation_duration_seconds",
            "Duration of reconciliation passes in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static STATE_TRANSITIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "azure_cluster_operator_state_transitions_total",
            "Total number of persisted state machine transitions",
        ),
        &["machine", "from", "to"],
    )
    .expect("Failed to create STATE_TRANSITIONS_TOTAL metric - this should never happen")
});

static STATE_WRITE_CONFLICTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "azure_cluster_operator_state_write_conflicts_total",
            "Total number of state writes rejected because the object changed concurrently",
        ),
        &["machine"],
    )
    .expect("Failed to create STATE_WRITE_CONFLICTS_TOTAL metric - this should never happen")
});

static AZURE_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "azure_cluster_operator_azure_operations_total",
            "Total number of Azure Resource Manager operations",
        ),
        &["operation"],
    )
    .expect("Failed to create AZURE_OPERATIONS_TOTAL metric - this should never happen")
});

static AZURE_OPERATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "azure_cluster_operator_azure_operation_errors_total",
            "Total number of failed Azure Resource Manager operations",
        ),
        &["operation"],
    )
    .expect("Failed to create AZURE_OPERATION_ERRORS_TOTAL metric - this should never happen")
});

static AZURE_OPERATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "azure_cluster_operator_azure_operation_duration_seconds",
            "Duration of Azure Resource Manager operations in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["operation"],
    )
    .expect("Failed to create AZURE_OPERATION_DURATION metric - this should never happen")
});

static WATCHDOG_JOBS_ACTIVE: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "azure_cluster_operator_watchdog_jobs_active",
        "Current number of watchdog jobs claimed in the registry",
    )
    .expect("Failed to create WATCHDOG_JOBS_ACTIVE metric - this should never happen")
});

static WATCHDOG_JOB_RUNS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "azure_cluster_operator_watchdog_job_runs_total",
            "Total number of watchdog job runs by action",
        ),
        &["action"],
    )
    .expect("Failed to create WATCHDOG_JOB_RUNS_TOTAL metric - this should never happen")
});

static WATCHDOG_JOB_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "azure_cluster_operator_watchdog_job_errors_total",
            "Total number of failed watchdog job runs by action",
        ),
        &["action"],
    )
    .expect("Failed to create WATCHDOG_JOB_ERRORS_TOTAL metric - this should never happen")
});

static WATCHDOG_JOBS_DEDUPLICATED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "azure_cluster_operator_watchdog_jobs_deduplicated_total",
        "Total number of watchdog job submissions dropped because the job was already active",
    )
    .expect("Failed to create WATCHDOG_JOBS_DEDUPLICATED_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(STATE_TRANSITIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STATE_WRITE_CONFLICTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(AZURE_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(AZURE_OPERATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(AZURE_OPERATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(WATCHDOG_JOBS_ACTIVE.clone()))?;
    REGISTRY.register(Box::new(WATCHDOG_JOB_RUNS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WATCHDOG_JOB_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WATCHDOG_JOBS_DEDUPLICATED_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations(kind: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_reconciliation_errors(kind: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn observe_reconciliation_duration(kind: &str, duration: f64) {
    RECONCILIATION_DURATION
        .with_label_values(&[kind])
        .observe(duration);
}

pub fn record_state_transition(machine: &str, from: &str, to: &str) {
    STATE_TRANSITIONS_TOTAL
        .with_label_values(&[machine, from, to])
        .inc();
}

pub fn increment_state_write_conflicts(machine: &str) {
    STATE_WRITE_CONFLICTS_TOTAL
        .with_label_values(&[machine])
        .inc();
}

/// Record one Azure Resource Manager call
pub fn record_azure_operation(operation: &str, duration: f64, success: bool) {
    AZURE_OPERATIONS_TOTAL.with_label_values(&[operation]).inc();
    AZURE_OPERATION_DURATION
        .with_label_values(&[operation])
        .observe(duration);
    if !success {
        AZURE_OPERATION_ERRORS_TOTAL
            .with_label_values(&[operation])
            .inc();
    }
}

pub fn set_watchdog_jobs_active(count: usize) {
    #[allow(
        clippy::cast_possible_wrap,
        clippy::cast_possible_truncation,
        reason = "Active job count never approaches i64::MAX"
    )]
    WATCHDOG_JOBS_ACTIVE.set(count as i64);
}

pub fn record_watchdog_job_run(action: &str, success: bool) {
    WATCHDOG_JOB_RUNS_TOTAL.with_label_values(&[action]).inc();
    if !success {
        WATCHDOG_JOB_ERRORS_TOTAL.with_label_values(&[action]).inc();
    }
}

pub fn increment_watchdog_jobs_deduplicated() {
    WATCHDOG_JOBS_DEDUPLICATED_TOTAL.inc();
}
