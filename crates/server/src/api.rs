//! REST handlers

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use billing_mirror_reconciler::RenewalReconciliationJob;
use billing_mirror_telemetry::{metrics_routes, MetricsCollector};
use billing_mirror_types::{RunRequest, RunResponse, TriggerSource};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

type JobRef = Arc<RenewalReconciliationJob>;

/// Full HTTP surface, `/metrics` included
pub fn router(job: JobRef) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/v1/jobs/renewal-reconciliation/run",
            post(trigger_reconciliation),
        )
        .route("/api/v1/jobs/executions", get(list_executions))
        .route("/api/v1/jobs/executions/:id", get(get_execution))
        .with_state(job)
        .merge(metrics_routes(MetricsCollector::new()))
        .layer(TraceLayer::new_for_http())
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Manual trigger. An empty body runs every tenant with default limits.
pub async fn trigger_reconciliation(
    State(job): State<JobRef>,
    body: Bytes,
) -> (StatusCode, Json<RunResponse>) {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        RunRequest::default()
    } else {
        match serde_json::from_slice::<RunRequest>(&body) {
            Ok(request) => request,
            Err(err) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(RunResponse::rejected(format!("invalid request body: {err}"))),
                )
            }
        }
    };

    info!(
        tenant_id = request.tenant_id.as_deref().unwrap_or("*"),
        "manual reconciliation trigger received"
    );
    let response = job.trigger(request, TriggerSource::Manual).await;
    let status = if response.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(response))
}

#[derive(Deserialize)]
pub struct ListExecutionsQuery {
    pub limit: Option<usize>,
}

/// Latest executions of the job, newest first
pub async fn list_executions(
    State(job): State<JobRef>,
    Query(query): Query<ListExecutionsQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(20).min(100);
    match job.recent_executions(limit).await {
        Ok(executions) => Json(executions).into_response(),
        Err(err) => {
            error!(error = %err, "execution listing failed");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

pub async fn get_execution(State(job): State<JobRef>, Path(id): Path<i64>) -> Response {
    match job.execution(id).await {
        Ok(Some(execution)) => Json(execution).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, format!("execution {id} not found")).into_response(),
        Err(err) => {
            error!(execution_id = id, error = %err, "execution lookup failed");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}
