//! REST API handlers.
//!
//! Reads go straight to the ledger; deploy and teardown go through the
//! orchestrator. Every response uses the same `{success, data, error}`
//! envelope, with errors reported as `{kind, message}`.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use labgrid_orchestrator::{ErrorReport, OrchestratorError};
use labgrid_state::*;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorReport>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(kind: &str, message: String, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(ErrorReport {
                kind: kind.to_string(),
                message,
            }),
        }),
    )
        .into_response()
}

fn ledger_error(e: StateError) -> Response {
    error!(error = %e, "ledger operation failed");
    error_response("Ledger", e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
}

fn table_not_found(n: TableNumber) -> Response {
    let e = OrchestratorError::TableNotFound(n);
    error_response(e.kind(), e.to_string(), StatusCode::NOT_FOUND)
}

/// HTTP status for an orchestrator failure.
pub fn status_for(e: &OrchestratorError) -> StatusCode {
    match e {
        OrchestratorError::TableNotFound(_) => StatusCode::NOT_FOUND,
        OrchestratorError::InvalidTable(_) | OrchestratorError::InvalidRange { .. } => {
            StatusCode::BAD_REQUEST
        }
        OrchestratorError::NoAvailableNodes | OrchestratorError::Cancelled => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ if matches!(e.root_cause(), OrchestratorError::State(_)) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        _ => StatusCode::BAD_GATEWAY,
    }
}

fn orchestrator_error(e: OrchestratorError) -> Response {
    let status = status_for(&e);
    if status.is_server_error() {
        error!(kind = e.kind(), error = %e, "request failed");
    }
    error_response(e.kind(), e.to_string(), status)
}

// ── Templates ──────────────────────────────────────────────────

/// Template registration body.
#[derive(Debug, Deserialize)]
pub struct RegisterTemplate {
    pub name: String,
    pub vmid: ResourceId,
    pub role: TemplateRole,
    #[serde(default)]
    pub is_container: bool,
}

/// GET /api/v1/templates
pub async fn list_templates(State(state): State<ApiState>) -> Response {
    match state.store.list_templates() {
        Ok(templates) => ApiResponse::ok(templates).into_response(),
        Err(e) => ledger_error(e),
    }
}

/// POST /api/v1/templates
pub async fn register_template(
    State(state): State<ApiState>,
    Json(req): Json<RegisterTemplate>,
) -> Response {
    if req.name.trim().is_empty() {
        return error_response(
            "InvalidRequest",
            "template name must not be empty".to_string(),
            StatusCode::BAD_REQUEST,
        );
    }
    let template = Template::new(req.name.trim(), req.vmid, req.role, req.is_container);
    match state.store.register_template(&template) {
        Ok(stored) => (StatusCode::CREATED, ApiResponse::ok(stored)).into_response(),
        Err(e) => ledger_error(e),
    }
}

// ── Tables ─────────────────────────────────────────────────────

/// A table with its derived network and recorded resources.
#[derive(Debug, Serialize)]
pub struct TableView {
    pub table_number: TableNumber,
    pub label: Option<String>,
    pub vlan: u32,
    pub gateway: String,
    pub created_at: u64,
    pub resources: Vec<DeployedResource>,
}

fn table_view(store: &StateStore, lab: TableLab) -> StateResult<TableView> {
    Ok(TableView {
        resources: store.list_resources_for_table(lab.table_number)?,
        vlan: lab.vlan(),
        gateway: lab.gateway(),
        table_number: lab.table_number,
        label: lab.label,
        created_at: lab.created_at,
    })
}

/// GET /api/v1/tables
pub async fn list_tables(State(state): State<ApiState>) -> Response {
    let views = state.store.list_tables().and_then(|tables| {
        tables
            .into_iter()
            .map(|lab| table_view(&state.store, lab))
            .collect::<StateResult<Vec<_>>>()
    });
    match views {
        Ok(views) => ApiResponse::ok(views).into_response(),
        Err(e) => ledger_error(e),
    }
}

/// GET /api/v1/tables/{n}
pub async fn get_table(State(state): State<ApiState>, Path(n): Path<TableNumber>) -> Response {
    match state.store.get_table(n) {
        Ok(Some(lab)) => match table_view(&state.store, lab) {
            Ok(view) => ApiResponse::ok(view).into_response(),
            Err(e) => ledger_error(e),
        },
        Ok(None) => table_not_found(n),
        Err(e) => ledger_error(e),
    }
}

/// Label update body; `null` clears the label.
#[derive(Debug, Deserialize)]
pub struct LabelRequest {
    pub label: Option<String>,
}

/// PUT /api/v1/tables/{n}/label
pub async fn set_table_label(
    State(state): State<ApiState>,
    Path(n): Path<TableNumber>,
    Json(req): Json<LabelRequest>,
) -> Response {
    let label = req.label.filter(|l| !l.trim().is_empty());
    match state.store.set_table_label(n, label.clone()) {
        Ok(true) => ApiResponse::ok(serde_json::json!({
            "table_number": n,
            "label": label,
        }))
        .into_response(),
        Ok(false) => table_not_found(n),
        Err(e) => ledger_error(e),
    }
}

// ── Resources ──────────────────────────────────────────────────

/// GET /api/v1/resources
pub async fn list_resources(State(state): State<ApiState>) -> Response {
    match state.store.list_resources() {
        Ok(resources) => ApiResponse::ok(resources).into_response(),
        Err(e) => ledger_error(e),
    }
}

// ── Deploy / teardown ──────────────────────────────────────────

/// POST /api/v1/deploy/table/{n}
pub async fn deploy_table(State(state): State<ApiState>, Path(n): Path<TableNumber>) -> Response {
    match state.orchestrator.deploy_table(n).await {
        Ok(result) => ApiResponse::ok(result).into_response(),
        Err(e) => orchestrator_error(e),
    }
}

/// Bulk deployment range; `end_table` defaults to `start_table`.
#[derive(Debug, Deserialize)]
pub struct BulkParams {
    pub start_table: TableNumber,
    pub end_table: Option<TableNumber>,
}

/// POST /api/v1/deploy/bulk
pub async fn deploy_bulk(State(state): State<ApiState>, Query(params): Query<BulkParams>) -> Response {
    let end = params.end_table.unwrap_or(params.start_table);
    match state.orchestrator.deploy_tables(params.start_table, end).await {
        Ok(bulk) => ApiResponse::ok(bulk).into_response(),
        Err(e) => orchestrator_error(e),
    }
}

/// DELETE /api/v1/table/{n}
pub async fn delete_table(State(state): State<ApiState>, Path(n): Path<TableNumber>) -> Response {
    match state.orchestrator.delete_table(n).await {
        Ok(result) => ApiResponse::ok(result).into_response(),
        Err(e) => orchestrator_error(e),
    }
}
