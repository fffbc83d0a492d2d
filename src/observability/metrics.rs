//! Metrics collection.
//!
//! Prometheus-compatible metrics with label cardinality protection and
//! typed convenience functions. Recording is a no-op until a recorder is
//! installed with [`init_metrics`].

use std::sync::atomic::{AtomicBool, Ordering};

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::GePhaseError;

/// Guard to prevent double-initialization of the metrics recorder.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Maximum length for tag labels.
///
/// Tags are user-defined and unbounded in number, so long tags are cut to
/// keep label sets small.
const MAX_TAG_LABEL_LEN: usize = 64;

/// Initializes the global metrics recorder.
///
/// When `port` is `Some`, a Prometheus HTTP listener is started on
/// `127.0.0.1:<port>`. When `None`, the recorder is installed without an
/// HTTP endpoint.
///
/// # Errors
///
/// Returns `GePhaseError::Io` if the recorder or HTTP listener cannot be
/// installed (e.g. port already in use).
pub fn init_metrics(port: Option<u16>) -> Result<(), GePhaseError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| GePhaseError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

/// Registers metric descriptions with the global recorder.
fn describe_metrics() {
    describe_counter!(
        "gephase_phase_started_total",
        "Total number of phase entries started"
    );
    describe_counter!(
        "gephase_phase_ended_total",
        "Total number of phase entries ended"
    );
    describe_counter!(
        "gephase_snapshots_applied_total",
        "Total number of replicated snapshots applied by clients"
    );
    describe_counter!(
        "gephase_errors_total",
        "Total number of rejected phase requests by category"
    );
    describe_gauge!("gephase_active_phases", "Number of active phase entries");
}

/// Records a started phase entry.
pub fn record_phase_started(tag: &str) {
    counter!("gephase_phase_started_total", "tag" => sanitize_tag_label(tag)).increment(1);
}

/// Records an ended phase entry.
pub fn record_phase_ended(tag: &str) {
    counter!("gephase_phase_ended_total", "tag" => sanitize_tag_label(tag)).increment(1);
}

/// Records a snapshot applied on a client.
pub fn record_snapshot_applied() {
    counter!("gephase_snapshots_applied_total").increment(1);
}

/// Records a rejected request by error category.
pub fn record_error(category: &str) {
    counter!("gephase_errors_total", "category" => category.to_owned()).increment(1);
}

/// Sets the number of active phase entries.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_phases(count: usize) {
    gauge!("gephase_active_phases").set(count as f64);
}

/// Sanitizes a phase tag for use as a metrics label.
///
/// Truncates to [`MAX_TAG_LABEL_LEN`] characters and replaces any
/// character outside `[A-Za-z0-9_-]` (including the segment dots) with an
/// underscore.
fn sanitize_tag_label(tag: &str) -> String {
    tag.chars()
        .take(MAX_TAG_LABEL_LEN)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
