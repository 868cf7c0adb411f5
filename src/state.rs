use std::sync::Arc;

use crate::observability::MetricsRegistry;
use crate::store::MonitoringStore;

/// Application state passed to the health/metrics handlers via Axum's
/// `State` extractor. The scheduler and orchestrator hold their own
/// `Arc<dyn MonitoringStore>` directly; this is only what the HTTP surface
/// needs.
#[derive(Clone)]
pub struct AppState {
	pub store: Arc<dyn MonitoringStore>,
	pub metrics: Arc<MetricsRegistry>,
}
