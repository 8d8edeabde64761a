use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use cotrelay_core::{DestinationId, QueueMetricsSnapshot};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::ApiState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationSummary {
    pub id: Ulid,
    pub name: Option<String>,
    pub metrics: QueueMetricsSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListDestinationsResponse {
    pub destinations: Vec<DestinationSummary>,
}

pub async fn list_destinations(
    State(state): State<ApiState>,
) -> Json<ListDestinationsResponse> {
    let mut destinations: Vec<DestinationSummary> = state
        .registry
        .destinations()
        .into_iter()
        .filter_map(|id| {
            let metrics = state.registry.metrics(id).ok()?;
            Some(DestinationSummary {
                id: id.0,
                name: state.names.get(&id).cloned(),
                metrics,
            })
        })
        .collect();
    destinations.sort_by_key(|d| d.id);

    Json(ListDestinationsResponse { destinations })
}

pub async fn destination_metrics(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<QueueMetricsSnapshot>, StatusCode> {
    let id: Ulid = id.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    let metrics = state
        .registry
        .metrics(DestinationId(id))
        .map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(Json(metrics))
}
