//! Prometheus metrics for provisioning runs.
//!
//! This module provides metrics for:
//! - Identity creation and invites
//! - Stage attempts and retries
//! - Per-identity and per-team results

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts};

// =============================================================================
// Batch setup
// =============================================================================

/// Mailboxes requested from the email provider by result.
pub static IDENTITIES_CREATED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "teamprov_identities_created_total",
            "Mailboxes requested from the email provider",
        ),
        &["result"], // "created", "failed"
    )
    .unwrap()
});

/// Invite results per address.
pub static INVITES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("teamprov_invites_total", "Team invites by result"),
        &["result"], // "invited", "rejected", "bulk_failed"
    )
    .unwrap()
});

// =============================================================================
// Stages
// =============================================================================

/// Stage attempts by stage and result.
pub static STAGE_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("teamprov_stage_attempts_total", "Stage attempts"),
        &["stage", "result"], // result: "succeeded", "duplicate", "failed"
    )
    .unwrap()
});

/// Stage retries scheduled after a retryable failure.
pub static STAGE_RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("teamprov_stage_retries_total", "Stage retries"),
        &["stage", "error_kind"],
    )
    .unwrap()
});

// =============================================================================
// Identities and teams
// =============================================================================

/// Identities that left the pipeline, by outcome.
pub static IDENTITIES_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "teamprov_identities_finished_total",
            "Identities processed to an outcome",
        ),
        &["outcome"], // "completed", "failed", "abandoned", "skipped"
    )
    .unwrap()
});

/// Time spent driving one identity through its remaining stages.
pub static IDENTITY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "teamprov_identity_duration_seconds",
            "Duration of per-identity processing",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0]),
        &["outcome"],
    )
    .unwrap()
});

/// Teams processed by result.
pub static TEAMS_PROCESSED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("teamprov_teams_processed_total", "Teams processed"),
        &["result"], // "ok", "failed", "cancelled"
    )
    .unwrap()
});

/// Get all metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(IDENTITIES_CREATED.clone()),
        Box::new(INVITES.clone()),
        Box::new(STAGE_ATTEMPTS.clone()),
        Box::new(STAGE_RETRIES.clone()),
        Box::new(IDENTITIES_FINISHED.clone()),
        Box::new(IDENTITY_DURATION.clone()),
        Box::new(TEAMS_PROCESSED.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register() {
        let registry = prometheus::Registry::new();
        for metric in all_metrics() {
            registry.register(metric).unwrap();
        }

        STAGE_ATTEMPTS
            .with_label_values(&["registered", "succeeded"])
            .inc();
        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|f| f.get_name().to_string())
            .collect();
        assert!(names.contains(&"teamprov_stage_attempts_total".to_string()));
    }
}
