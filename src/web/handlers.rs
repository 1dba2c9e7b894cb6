//! HTTP request handlers.

use super::AppState;
use crate::config::ServerConfig;
use crate::db::{DbError, LocationMetrics, ReportState};
use crate::export::export_report;
use crate::scheduler::ReportError;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;

/// Tokens are URL-safe and bounded; anything else is rejected before the store is hit.
fn report_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").expect("report id pattern compiles"))
}

// ============================================================================
// API: Trigger
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct TriggerRequest {
    #[serde(default)]
    pub location_ids: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub report_id: String,
    pub message: &'static str,
    pub status_code: u16,
}

/// Start a report. The optional JSON body names the locations to cover.
pub async fn handle_trigger_report(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let req: TriggerRequest = if body.iter().all(u8::is_ascii_whitespace) {
        TriggerRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(r) => r,
            Err(e) => {
                return (StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e)).into_response()
            }
        }
    };

    if let Some(ids) = &req.location_ids {
        if ids.is_empty() || ids.iter().any(|id| id.trim().is_empty()) {
            return (StatusCode::BAD_REQUEST, "location_ids must be non-empty").into_response();
        }
    }

    match state.controller.trigger(req.location_ids).await {
        Ok(report_id) => Json(TriggerResponse {
            report_id,
            message: "Task initiated",
            status_code: StatusCode::OK.as_u16(),
        })
        .into_response(),
        Err(e) => {
            tracing::error!("Failed to trigger report: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Something went wrong: {}", e),
            )
                .into_response()
        }
    }
}

// ============================================================================
// API: Report
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    #[serde(default)]
    pub report_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub message: &'static str,
    pub status_code: u16,
}

/// Report status, or the CSV download once the report has completed.
pub async fn handle_get_report(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> impl IntoResponse {
    let report_id = match query.report_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => return (StatusCode::BAD_REQUEST, "Missing report ID").into_response(),
    };

    if !report_id_pattern().is_match(&report_id) {
        return (StatusCode::BAD_REQUEST, "Malformed report ID").into_response();
    }

    let report = match state.controller.get_status(&report_id) {
        Ok(r) => r,
        Err(ReportError::Db(DbError::NotFound)) => {
            return (StatusCode::BAD_REQUEST, "Invalid report ID").into_response()
        }
        Err(ReportError::Db(DbError::InvalidStatus(status))) => {
            tracing::warn!("Report {} has unknown status {}", report_id, status);
            return (StatusCode::BAD_REQUEST, "Invalid report status").into_response();
        }
        Err(e) => {
            tracing::error!("Failed to load report {}: {}", report_id, e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Something went wrong: {}", e),
            )
                .into_response();
        }
    };

    match report.state {
        ReportState::Running => Json(StatusResponse {
            status: "Running",
            reason: None,
            message: "Success",
            status_code: StatusCode::OK.as_u16(),
        })
        .into_response(),
        ReportState::Completed(rows) => download_report(&state.config, report.report_id, rows).await,
        ReportState::Failed(reason) => (
            StatusCode::BAD_REQUEST,
            Json(StatusResponse {
                status: "Failed",
                reason: Some(reason),
                message: "Invalid report status",
                status_code: StatusCode::BAD_REQUEST.as_u16(),
            }),
        )
            .into_response(),
    }
}

async fn download_report(config: &ServerConfig, report_id: String, rows: Vec<LocationMetrics>) -> Response {
    let dir = PathBuf::from(&config.export_dir);
    let id = report_id.clone();
    let exported = tokio::task::spawn_blocking(move || export_report(&dir, &id, &rows)).await;

    let export = match exported {
        Ok(Ok(export)) => export,
        Ok(Err(e)) => {
            tracing::warn!("Export of report {} failed: {}", report_id, e);
            return (StatusCode::BAD_REQUEST, "Failed to retrieve report data").into_response();
        }
        Err(e) => {
            tracing::error!("Export task for report {} failed: {}", report_id, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    let mime = mime_guess::from_path(&export.path).first_or_octet_stream();
    let disposition = format!("attachment; filename=\"report-{}.csv\"", report_id);

    (
        [
            (header::CONTENT_TYPE, mime.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        export.csv,
    )
        .into_response()
}
