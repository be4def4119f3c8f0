//! HTTP route handlers for the orchestrator API

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json, Response};

use super::orchestrator::Orchestrator;
use super::types::{ConfigUpdateRequest, EngineStatusEntry, GenerateReportRequest, SearchRequest};
use crate::forum::ForumLog;
use crate::report::TaskStatus;
use crate::types::{EngineKind, ReportError};

type Handler = State<Arc<Orchestrator>>;

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "success": false, "message": message.into() })),
    )
        .into_response()
}

fn parse_engine(name: &str) -> Result<EngineKind, Response> {
    EngineKind::parse(name)
        .ok_or_else(|| error_body(StatusCode::BAD_REQUEST, "Unknown application"))
}

/// GET /api/status
pub async fn get_status(State(orch): Handler) -> Json<serde_json::Value> {
    let statuses: BTreeMap<String, EngineStatusEntry> = orch
        .engine_statuses()
        .await
        .into_iter()
        .map(|(engine, (status, port))| {
            (
                engine,
                EngineStatusEntry {
                    status: status.to_string(),
                    port,
                },
            )
        })
        .collect();

    let forum_status = if orch.forum_running().await {
        "running"
    } else {
        "stopped"
    };

    Json(serde_json::json!({
        "success": true,
        "engines": statuses,
        "forum": { "status": forum_status },
    }))
}

/// GET /api/system/status
pub async fn get_system_status(State(orch): Handler) -> Json<serde_json::Value> {
    let (started, starting) = orch.system_flags();
    Json(serde_json::json!({
        "success": true,
        "started": started,
        "starting": starting,
    }))
}

/// POST /api/system/start
pub async fn start_system(State(orch): Handler) -> Response {
    match orch.system_start().await {
        Ok(logs) => Json(serde_json::json!({
            "success": true,
            "message": "System startup successful",
            "logs": logs,
        }))
        .into_response(),
        Err(failure) if failure.errors.is_empty() => {
            error_body(StatusCode::BAD_REQUEST, failure.message)
        }
        Err(failure) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "success": false,
                "message": failure.message,
                "logs": failure.logs,
                "errors": failure.errors,
            })),
        )
            .into_response(),
    }
}

/// GET /api/start/:engine
pub async fn start_engine(State(orch): Handler, Path(name): Path<String>) -> Response {
    let engine = match parse_engine(&name) {
        Ok(engine) => engine,
        Err(response) => return response,
    };
    match orch.start_engine(engine).await {
        Ok(message) => {
            Json(serde_json::json!({ "success": true, "message": message })).into_response()
        }
        Err(message) => error_body(StatusCode::CONFLICT, message),
    }
}

/// GET /api/stop/:engine
pub async fn stop_engine(State(orch): Handler, Path(name): Path<String>) -> Response {
    let engine = match parse_engine(&name) {
        Ok(engine) => engine,
        Err(response) => return response,
    };
    match orch.stop_engine(engine).await {
        Ok(message) => {
            Json(serde_json::json!({ "success": true, "message": message })).into_response()
        }
        Err(message) => error_body(StatusCode::CONFLICT, message),
    }
}

/// GET /api/output/:engine
pub async fn get_output(State(orch): Handler, Path(name): Path<String>) -> Response {
    let engine = match parse_engine(&name) {
        Ok(engine) => engine,
        Err(response) => return response,
    };
    let output = orch.engine_output(engine);
    Json(serde_json::json!({
        "success": true,
        "output": output,
        "total_lines": output.len(),
    }))
    .into_response()
}

/// POST /api/search
pub async fn search(State(orch): Handler, Json(request): Json<SearchRequest>) -> Response {
    let query = request.query.trim().to_string();
    if query.is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "Search query cannot be empty");
    }
    match orch.search_fanout(&query).await {
        Ok(results) => Json(serde_json::json!({
            "success": true,
            "query": query,
            "results": results,
        }))
        .into_response(),
        Err(message) => error_body(StatusCode::CONFLICT, message),
    }
}

/// GET /api/forum/start
pub async fn start_forum(State(orch): Handler) -> Json<serde_json::Value> {
    if orch.start_forum().await {
        Json(serde_json::json!({ "success": true, "message": "Forum monitoring started" }))
    } else {
        Json(serde_json::json!({ "success": false, "message": "Forum monitoring already running" }))
    }
}

/// GET /api/forum/stop
pub async fn stop_forum(State(orch): Handler) -> Json<serde_json::Value> {
    if orch.stop_forum().await {
        Json(serde_json::json!({ "success": true, "message": "Forum monitoring stopped" }))
    } else {
        Json(serde_json::json!({ "success": false, "message": "Forum monitoring not running" }))
    }
}

/// GET /api/forum/log
pub async fn get_forum_log(State(orch): Handler) -> Json<serde_json::Value> {
    let lines = orch.forum_log_lines();
    let parsed: Vec<serde_json::Value> = lines
        .iter()
        .filter_map(|line| ForumLog::parse_line(line))
        .filter(|m| matches!(m.source.as_str(), "QUERY" | "MEDIA" | "INSIGHT"))
        .filter(|m| !m.content.trim().is_empty())
        .map(|m| {
            serde_json::json!({
                "type": "agent",
                "sender": format!("{} Engine", m.source),
                "content": m.content,
                "timestamp": m.timestamp,
                "source": m.source,
            })
        })
        .collect();

    Json(serde_json::json!({
        "success": true,
        "log_lines": lines,
        "parsed_messages": parsed,
        "total_lines": lines.len(),
    }))
}

/// GET /api/config
pub async fn get_config(State(orch): Handler) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "success": true, "config": orch.config_values() }))
}

/// POST /api/config
pub async fn update_config(
    State(orch): Handler,
    Json(payload): Json<ConfigUpdateRequest>,
) -> Response {
    if payload.is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "Request body cannot be empty");
    }
    match orch.update_config(&payload) {
        Ok(config) => {
            Json(serde_json::json!({ "success": true, "config": config })).into_response()
        }
        Err(message) => error_body(StatusCode::INTERNAL_SERVER_ERROR, message),
    }
}

fn report_error_response(error: ReportError) -> Response {
    match error {
        ReportError::NotInitialized => {
            error_body(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
        }
        ReportError::AlreadyRunning => error_body(StatusCode::BAD_REQUEST, error.to_string()),
        ReportError::NotReady { missing } => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "success": false,
                "message": "Input files not ready",
                "missing_files": missing,
            })),
        )
            .into_response(),
        ReportError::UnknownTask(_) => error_body(StatusCode::NOT_FOUND, error.to_string()),
        other => error_body(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

/// GET /api/report/status
pub async fn report_status(State(orch): Handler) -> Response {
    match orch.report_ready() {
        Ok(check) => Json(serde_json::json!({
            "success": true,
            "initialized": true,
            "engines_ready": check.ready,
            "files_found": check.files_found,
            "missing_files": check.missing_files,
        }))
        .into_response(),
        Err(ReportError::NotInitialized) => Json(serde_json::json!({
            "success": true,
            "initialized": false,
            "engines_ready": false,
        }))
        .into_response(),
        Err(other) => report_error_response(other),
    }
}

/// POST /api/report/generate
pub async fn generate_report(
    State(orch): Handler,
    Json(request): Json<GenerateReportRequest>,
) -> Response {
    let custom_template = if request.custom_template.trim().is_empty() {
        None
    } else {
        Some(request.custom_template)
    };
    match orch.generate_report(&request.query, custom_template) {
        Ok(task) => Json(serde_json::json!({
            "success": true,
            "task_id": task.task_id,
            "message": "Report generation started",
            "task": task.summary(),
        }))
        .into_response(),
        Err(error) => report_error_response(error),
    }
}

/// GET /api/report/progress/:task_id
pub async fn report_progress(State(orch): Handler, Path(task_id): Path<String>) -> Response {
    match orch.report_progress(&task_id) {
        Ok(Some(task)) => {
            Json(serde_json::json!({ "success": true, "task": task.summary() })).into_response()
        }
        // A finished task may already have been cleared; report it as done
        // so pollers terminate instead of erroring.
        Ok(None) => Json(serde_json::json!({
            "success": true,
            "task": {
                "task_id": task_id,
                "status": "completed",
                "progress": 100,
                "error_message": "",
                "has_result": true,
                "report_file_ready": false,
                "report_file_name": "",
                "report_file_path": "",
            }
        }))
        .into_response(),
        Err(error) => report_error_response(error),
    }
}

/// GET /api/report/result/:task_id
pub async fn report_result(State(orch): Handler, Path(task_id): Path<String>) -> Response {
    match orch.report_progress(&task_id) {
        Ok(Some(task)) if task.status == TaskStatus::Completed => {
            Html(task.html_content).into_response()
        }
        Ok(Some(_)) => error_body(StatusCode::BAD_REQUEST, "Report not yet completed"),
        Ok(None) => error_body(StatusCode::NOT_FOUND, "Task does not exist"),
        Err(error) => report_error_response(error),
    }
}

/// GET /api/report/result/:task_id/json
pub async fn report_result_json(State(orch): Handler, Path(task_id): Path<String>) -> Response {
    match orch.report_progress(&task_id) {
        Ok(Some(task)) if task.status == TaskStatus::Completed => Json(serde_json::json!({
            "success": true,
            "task": task.summary(),
            "html_content": task.html_content,
        }))
        .into_response(),
        Ok(Some(_)) => error_body(StatusCode::BAD_REQUEST, "Report not yet completed"),
        Ok(None) => error_body(StatusCode::NOT_FOUND, "Task does not exist"),
        Err(error) => report_error_response(error),
    }
}

/// POST /api/report/cancel/:task_id
pub async fn report_cancel(State(orch): Handler, Path(task_id): Path<String>) -> Response {
    match orch.report_cancel(&task_id) {
        Ok(()) => {
            Json(serde_json::json!({ "success": true, "message": "Task cancelled" })).into_response()
        }
        Err(error) => report_error_response(error),
    }
}

/// GET /api/report/templates
pub async fn report_templates(State(orch): Handler) -> Response {
    match orch.report_templates() {
        Ok(templates) => {
            let list: Vec<serde_json::Value> = templates
                .into_iter()
                .map(|(name, description)| {
                    serde_json::json!({ "name": name, "description": description })
                })
                .collect();
            Json(serde_json::json!({ "success": true, "templates": list })).into_response()
        }
        Err(error) => report_error_response(error),
    }
}
