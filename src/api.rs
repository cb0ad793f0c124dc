//! HTTP API for document submission and analysis retrieval.
//!
//! Four routes: upload a document for analysis, list analyses, fetch one
//! analysis in detail, and a health probe. Submission answers as soon as
//! the document and a queued analysis row are persisted; a background
//! task drives the workflow and writes the outcome once the pipeline
//! finishes.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::db::DbHandle;
use crate::models::{AnalysisState, AnalysisStatus};
use crate::orchestrator::WorkflowOrchestrator;

const MAX_LISTED_ANALYSES: i64 = 100;

/// Shared application state behind every handler.
pub struct AppState {
    pub db: DbHandle,
    pub orchestrator: Arc<WorkflowOrchestrator>,
    pub documents_dir: PathBuf,
}

pub type SharedState = Arc<AppState>;

/// API error responses with appropriate status codes.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct AnalysisSubmitted {
    pub analysis_id: i64,
    pub document_id: i64,
    pub status: String,
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct AnalysisDetail {
    pub analysis_id: i64,
    pub document_id: i64,
    pub status: String,
    pub document_title: Option<String>,
    pub claims_count: i64,
    pub verifications_count: i64,
    pub report_content: Option<String>,
    pub qa_feedback: Option<String>,
    pub errors: Vec<String>,
    pub created_at: Option<String>,
    pub completed_at: Option<String>,
}

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/analyze", post(submit_document))
        .route("/api/analyses", get(list_analyses))
        .route("/api/analyses/{id}", get(get_analysis_detail))
}

/// Hex-encoded SHA256 of the uploaded bytes, truncated to 12 characters.
fn content_fingerprint(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    format!("{:x}", result)[..12].to_string()
}

async fn health(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let database = match state.db.call(|db| db.health_check()).await {
        Ok(()) => "connected".to_string(),
        Err(e) => format!("error: {e}"),
    };
    let healthy = database == "connected";
    Json(json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
        "services": {
            "api": "running",
            "database": database,
            "orchestrator": "running",
        }
    }))
}

async fn submit_document(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Json<AnalysisSubmitted>, ApiError> {
    let mut file_name: Option<String> = None;
    let mut data: Option<Bytes> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart payload: {e}")))?
    {
        if field.name() == Some("file") {
            file_name = field.file_name().map(str::to_string);
            data = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {e}")))?,
            );
        }
    }

    let data = data
        .ok_or_else(|| ApiError::BadRequest("Request must include a 'file' field".to_string()))?;
    // Strip any directory components a client sneaks into the filename.
    let base_name = file_name
        .as_deref()
        .and_then(|name| std::path::Path::new(name).file_name())
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| ApiError::BadRequest("File must have a filename".to_string()))?;
    if data.is_empty() {
        return Err(ApiError::BadRequest("File is empty".to_string()));
    }

    let content = String::from_utf8_lossy(&data).into_owned();
    let hash = content_fingerprint(&data);
    tokio::fs::create_dir_all(&state.documents_dir)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to create documents directory: {e}")))?;
    let stored_path = state.documents_dir.join(format!("{hash}_{base_name}"));
    tokio::fs::write(&stored_path, &data)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to store upload: {e}")))?;

    let title = base_name.clone();
    let stored = stored_path.to_string_lossy().into_owned();
    let hash_for_row = hash.clone();
    let document_id = state
        .db
        .call(move |db| db.insert_document(&title, &stored, &hash_for_row))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let analysis_id = state
        .db
        .call(move |db| db.insert_analysis(document_id, "full_assessment", AnalysisStatus::Queued))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    tracing::info!(analysis_id, document_id, file = %base_name, "Document queued for analysis");

    let workflow_state = state.clone();
    let document_path = stored_path.to_string_lossy().into_owned();
    tokio::spawn(async move {
        run_and_persist(workflow_state, analysis_id, document_id, document_path, content).await;
    });

    Ok(Json(AnalysisSubmitted {
        analysis_id,
        document_id,
        status: AnalysisStatus::Queued.as_str().to_string(),
        message: format!(
            "Document queued for analysis. Track progress with /api/analyses/{analysis_id}"
        ),
        timestamp: Utc::now().to_rfc3339(),
    }))
}

/// Drive the workflow for one submission and persist whatever comes back.
async fn run_and_persist(
    state: SharedState,
    analysis_id: i64,
    document_id: i64,
    document_path: String,
    content: String,
) {
    let processing = state
        .db
        .call(move |db| db.update_analysis_status(analysis_id, AnalysisStatus::Processing))
        .await;
    if let Err(e) = processing {
        tracing::error!(analysis_id, error = %e, "Failed to mark analysis processing");
    }

    let final_state = state
        .orchestrator
        .execute_analysis(analysis_id, document_id, &document_path, &content)
        .await;

    if let Err(e) = persist_analysis_outcome(&state.db, &final_state).await {
        tracing::error!(analysis_id, error = %e, "Failed to persist analysis outcome");
        let fallback = state
            .db
            .call(move |db| db.update_analysis_status(analysis_id, AnalysisStatus::Failed))
            .await;
        if let Err(e) = fallback {
            tracing::error!(analysis_id, error = %e, "Failed to mark analysis failed");
        }
    }
}

/// Write a finished analysis state to the database: final status, claims,
/// verifications linked by stable claim id, and the report if one exists.
pub(crate) async fn persist_analysis_outcome(db: &DbHandle, state: &AnalysisState) -> Result<()> {
    let analysis_id = state.analysis_id;
    let status = state.status;
    db.call(move |db| db.update_analysis_status(analysis_id, status))
        .await?;

    for claim in &state.extracted_claims {
        let claim = claim.clone();
        db.call(move |db| db.insert_claim(analysis_id, &claim)).await?;
    }

    for verification in &state.verifications {
        let verification = verification.clone();
        db.call(move |db| {
            match db.claim_row_id(analysis_id, &verification.claim_id)? {
                Some(row_id) => {
                    db.insert_verification(row_id, &verification)?;
                }
                None => {
                    tracing::warn!(claim_id = %verification.claim_id, "No stored claim for verification");
                }
            }
            Ok(())
        })
        .await?;
    }

    if let Some(report) = &state.report_content {
        let content = report.clone();
        let quality = if state.status == AnalysisStatus::Completed {
            "draft"
        } else {
            "pending_review"
        };
        db.call(move |db| db.insert_report(analysis_id, &content, quality))
            .await?;
    }
    Ok(())
}

async fn list_analyses(
    State(state): State<SharedState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let analyses = state
        .db
        .call(|db| db.list_analyses(MAX_LISTED_ANALYSES))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(json!({ "total": analyses.len(), "analyses": analyses })))
}

async fn get_analysis_detail(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Json<AnalysisDetail>, ApiError> {
    let fetched = state
        .db
        .call(move |db| {
            let Some(analysis) = db.get_analysis(id)? else {
                return Ok(None);
            };
            let document = db.get_document(analysis.document_id)?;
            let claims_count = db.count_claims(id)?;
            let verifications_count = db.count_verifications(id)?;
            let report = db.get_report(id)?;
            Ok(Some((analysis, document, claims_count, verifications_count, report)))
        })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let Some((analysis, document, claims_count, verifications_count, report)) = fetched else {
        return Err(ApiError::NotFound(format!("Analysis {id} not found")));
    };

    // Errors and QA feedback live on the in-memory state while it is
    // still tracked; after eviction the row alone answers.
    let memory = state.orchestrator.get_analysis_state(id);
    let errors = memory.as_ref().map(|s| s.errors.clone()).unwrap_or_default();
    let qa_feedback = memory.and_then(|s| s.qa_feedback);

    Ok(Json(AnalysisDetail {
        analysis_id: analysis.id,
        document_id: analysis.document_id,
        status: analysis.status,
        document_title: document.map(|d| d.title),
        claims_count,
        verifications_count,
        report_content: report.map(|r| r.report_content),
        qa_feedback,
        errors,
        created_at: Some(analysis.created_at),
        completed_at: analysis.completed_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::AnalysisDb;
    use crate::executor::StubRunner;
    use crate::orchestrator::OrchestratorOptions;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    const BOUNDARY: &str = "test-boundary";

    fn write_configs(dir: &std::path::Path) -> (PathBuf, PathBuf) {
        let agents_path = dir.join("agents.yaml");
        let mut agents = String::from("agents:\n");
        for name in [
            "root",
            "document_processor",
            "fact_extractor",
            "verification_specialist",
            "report_writer",
            "quality_reviewer",
        ] {
            agents.push_str(&format!("  {name}:\n    instruction: Act as {name}.\n"));
        }
        std::fs::write(&agents_path, agents).unwrap();
        let servers_path = dir.join("tool_servers.yaml");
        std::fs::write(&servers_path, "tool_servers: {}\n").unwrap();
        (agents_path, servers_path)
    }

    fn test_app() -> (Router, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let (agents, servers) = write_configs(tmp.path());
        let orchestrator = Arc::new(
            WorkflowOrchestrator::from_config(
                &agents,
                &servers,
                Arc::new(StubRunner),
                OrchestratorOptions::default(),
            )
            .unwrap(),
        );
        let db = DbHandle::new(AnalysisDb::new_in_memory().unwrap());
        let state = Arc::new(AppState {
            db,
            orchestrator,
            documents_dir: tmp.path().join("documents"),
        });
        (api_router().with_state(state), tmp)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn upload_request(file_name: Option<&str>, field_name: &str, contents: &str) -> Request<Body> {
        let disposition = match file_name {
            Some(name) => format!("form-data; name=\"{field_name}\"; filename=\"{name}\""),
            None => format!("form-data; name=\"{field_name}\""),
        };
        let body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: {disposition}\r\nContent-Type: text/plain\r\n\r\n{contents}\r\n--{BOUNDARY}--\r\n"
        );
        Request::builder()
            .method("POST")
            .uri("/api/analyze")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        (status, body_json(response).await)
    }

    #[tokio::test]
    async fn test_health_reports_connected_database() {
        let (app, _tmp) = test_app();
        let (status, body) = get_json(&app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["services"]["api"], "running");
        assert_eq!(body["services"]["database"], "connected");
        assert_eq!(body["services"]["orchestrator"], "running");
    }

    #[tokio::test]
    async fn test_submit_queues_and_completes_analysis() {
        let (app, _tmp) = test_app();

        // 1. Submit a document
        let response = app
            .clone()
            .oneshot(upload_request(
                Some("study.txt"),
                "file",
                "Vaccination coverage rose 4% during the study period.",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let submitted = body_json(response).await;
        assert_eq!(submitted["analysis_id"], 1);
        assert_eq!(submitted["document_id"], 1);
        assert_eq!(submitted["status"], "queued");
        assert!(submitted["message"]
            .as_str()
            .unwrap()
            .contains("/api/analyses/1"));

        // 2. Poll until the background workflow reaches a terminal status
        let mut detail = serde_json::Value::Null;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let (status, body) = get_json(&app, "/api/analyses/1").await;
            assert_eq!(status, StatusCode::OK);
            let current = body["status"].as_str().unwrap().to_string();
            if current == "completed" || current == "failed" {
                detail = body;
                break;
            }
        }

        // 3. The stub pipeline completes with two verified claims
        assert_eq!(detail["status"], "completed");
        assert_eq!(detail["claims_count"], 2);
        assert_eq!(detail["verifications_count"], 2);
        assert_eq!(detail["document_title"], "study.txt");
        assert!(detail["report_content"]
            .as_str()
            .unwrap()
            .contains("Analysis Report"));
        assert!(detail["qa_feedback"].as_str().is_some());
        assert_eq!(detail["errors"].as_array().unwrap().len(), 0);
        assert!(detail["completed_at"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_submit_rejects_empty_file() {
        let (app, _tmp) = test_app();
        let response = app
            .clone()
            .oneshot(upload_request(Some("empty.txt"), "file", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "File is empty");
    }

    #[tokio::test]
    async fn test_submit_requires_filename() {
        let (app, _tmp) = test_app();
        let response = app
            .clone()
            .oneshot(upload_request(None, "file", "some text"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "File must have a filename");
    }

    #[tokio::test]
    async fn test_submit_requires_file_field() {
        let (app, _tmp) = test_app();
        let response = app
            .clone()
            .oneshot(upload_request(Some("study.txt"), "attachment", "text"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Request must include a 'file' field");
    }

    #[tokio::test]
    async fn test_detail_unknown_analysis_is_404() {
        let (app, _tmp) = test_app();
        let (status, body) = get_json(&app, "/api/analyses/99").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Analysis 99 not found");
    }

    #[tokio::test]
    async fn test_list_analyses_counts_rows() {
        let (app, _tmp) = test_app();
        let (status, body) = get_json(&app, "/api/analyses").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 0);

        app.clone()
            .oneshot(upload_request(Some("one.txt"), "file", "First document."))
            .await
            .unwrap();
        let (_, body) = get_json(&app, "/api/analyses").await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["analyses"][0]["analysis_type"], "full_assessment");
    }

    #[test]
    fn test_content_fingerprint_is_stable_12_hex_chars() {
        let a = content_fingerprint(b"hello");
        let b = content_fingerprint(b"hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, content_fingerprint(b"world"));
    }
}
