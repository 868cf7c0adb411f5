use axum::{extract::State, http::StatusCode, response::IntoResponse};

/// DB health endpoint: returns 200 OK when the configured store can run a
/// simple query, otherwise returns 503 Service Unavailable.
pub async fn db_health(State(state): State<crate::state::AppState>) -> impl IntoResponse {
	match state.store.ping().await {
		Ok(()) => (StatusCode::OK, "OK").into_response(),
		Err(e) => (StatusCode::SERVICE_UNAVAILABLE, format!("db error: {}", e)).into_response(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::domain::*;
	use crate::errors::StoreError;
	use crate::store::MonitoringStore;
	use async_trait::async_trait;
	use std::sync::Arc;

	struct MockStore {
		should_succeed: bool,
	}

	#[async_trait]
	impl MonitoringStore for MockStore {
		async fn load_configuration(&self) -> Result<Configuration, StoreError> {
			Ok(Configuration::default())
		}
		async fn load_scan_config(&self) -> Result<ScanConfig, StoreError> {
			Ok(ScanConfig::default())
		}
		async fn active_platforms(&self) -> Result<Vec<PlatformContext>, StoreError> {
			Ok(Vec::new())
		}
		async fn update_domain(&self, _domain: &Domain) -> Result<(), StoreError> {
			Ok(())
		}
		async fn update_platform(&self, _platform: &Platform) -> Result<(), StoreError> {
			Ok(())
		}
		async fn get_or_create_defacement(
			&self,
			platform_id: PlatformId,
		) -> Result<(DefacementRecord, bool), StoreError> {
			Ok((
				DefacementRecord {
					id: 1,
					platform_id,
					baseline_capture: serde_json::json!({}),
					last_capture: serde_json::json!({}),
					baseline_tree_text: String::new(),
					last_tree_text: String::new(),
					is_defaced: false,
					details: String::new(),
					updated_at: chrono::Utc::now(),
				},
				true,
			))
		}
		async fn update_defacement(&self, _record: &DefacementRecord) -> Result<(), StoreError> {
			Ok(())
		}
		async fn active_alert_exists(
			&self,
			_platform_id: PlatformId,
			_kind: AlertKind,
		) -> Result<bool, StoreError> {
			Ok(false)
		}
		async fn active_alert_created_today_exists(
			&self,
			_platform_id: PlatformId,
			_kind: AlertKind,
		) -> Result<bool, StoreError> {
			Ok(false)
		}
		async fn create_alert(
			&self,
			entity_id: EntityId,
			platform_id: PlatformId,
			kind: AlertKind,
			details: &str,
			template: &str,
		) -> Result<Alert, StoreError> {
			Ok(Alert {
				id: 1,
				entity_id,
				platform_id,
				kind,
				status: AlertStatus::New,
				details: details.to_string(),
				template: template.to_string(),
				created_at: chrono::Utc::now(),
				updated_at: chrono::Utc::now(),
			})
		}
		async fn resolve_active_alert(
			&self,
			_platform_id: PlatformId,
			_kind: AlertKind,
		) -> Result<Option<Alert>, StoreError> {
			Ok(None)
		}
		async fn ping(&self) -> Result<(), StoreError> {
			if self.should_succeed {
				Ok(())
			} else {
				Err(StoreError::NotFound("database unavailable".to_string()))
			}
		}
	}

	#[tokio::test]
	async fn health_check_returns_ok_when_db_healthy() {
		let store: Arc<dyn MonitoringStore> = Arc::new(MockStore {
			should_succeed: true,
		});
		let state = crate::state::AppState {
			store,
			metrics: Arc::new(crate::observability::MetricsRegistry::new()),
		};

		let response = db_health(State(state)).await.into_response();
		assert_eq!(response.status(), StatusCode::OK);
	}

	#[tokio::test]
	async fn health_check_returns_service_unavailable_when_db_fails() {
		let store: Arc<dyn MonitoringStore> = Arc::new(MockStore {
			should_succeed: false,
		});
		let state = crate::state::AppState {
			store,
			metrics: Arc::new(crate::observability::MetricsRegistry::new()),
		};

		let response = db_health(State(state)).await.into_response();
		assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
	}
}
