//! Two-tab web interface: upload syllabus PDFs, then ask questions about them.

use crate::config::AppConfig;
use crate::database::{CollectionInfo, VectorStore};
use crate::document::load_pdf_upload;
use crate::embeddings::Embedder;
use crate::llm::LanguageModel;
use crate::rag::{Answer, IngestOutcome, RagEngine};
use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const INDEX_HTML: &str = include_str!("../assets/index.html");

/// Multipart field carrying uploaded PDFs
const UPLOAD_FIELD: &str = "files";

/// Upload limit for a whole multipart request
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Shared state handed to every handler
pub struct AppState<S, E, L> {
    pub engine: RagEngine<S, E, L>,
    pub config: AppConfig,
}

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

fn internal_error(e: anyhow::Error) -> ApiError {
    error!("Request failed: {:#}", e);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
}

#[derive(Serialize, Debug, PartialEq)]
pub struct UploadedFile {
    pub filename: String,
    /// `indexed`, `skipped`, `empty` or `error`
    pub status: &'static str,
    pub chunks: usize,
    pub message: String,
}

impl UploadedFile {
    fn from_outcome(filename: String, outcome: IngestOutcome) -> Self {
        let (status, chunks, message) = match outcome {
            IngestOutcome::Indexed { chunks } => (
                "indexed",
                chunks,
                format!("Successfully processed: {} ({} chunks)", filename, chunks),
            ),
            IngestOutcome::Skipped => (
                "skipped",
                0,
                format!("{} already exists in the database. Skipping...", filename),
            ),
            IngestOutcome::Empty => (
                "empty",
                0,
                format!("No content extracted from: {}", filename),
            ),
        };

        UploadedFile {
            filename,
            status,
            chunks,
            message,
        }
    }

    fn failed(filename: String, message: String) -> Self {
        UploadedFile {
            message: format!("Error processing {}: {}", filename, message),
            filename,
            status: "error",
            chunks: 0,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct UploadResponse {
    pub files: Vec<UploadedFile>,
    pub indexed: usize,
}

#[derive(Deserialize, Debug)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Serialize, Debug)]
pub struct InfoResponse {
    pub settings: Vec<String>,
    pub collection: CollectionInfo,
}

#[derive(Serialize, Debug)]
pub struct ClearResponse {
    pub success: bool,
    pub message: String,
}

/// Build the application router
pub fn router<S, E, L>(state: Arc<AppState<S, E, L>>) -> Router
where
    S: VectorStore + Send + Sync + 'static,
    E: Embedder + Send + Sync + 'static,
    L: LanguageModel + Send + Sync + 'static,
{
    Router::new()
        .route("/", get(index))
        .route("/api/upload", post(upload_files::<S, E, L>))
        .route("/api/ask", post(ask::<S, E, L>))
        .route("/api/info", get(info::<S, E, L>))
        .route("/api/clear", post(clear::<S, E, L>))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// Bind and serve until the process is stopped
pub async fn serve<S, E, L>(state: Arc<AppState<S, E, L>>, bind_address: &str) -> Result<()>
where
    S: VectorStore + Send + Sync + 'static,
    E: Embedder + Send + Sync + 'static,
    L: LanguageModel + Send + Sync + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;

    info!("Syllabus assistant listening on http://{}", bind_address);
    axum::serve(listener, router(state))
        .await
        .context("Web server stopped unexpectedly")?;

    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Accept one or more PDFs as multipart `files` fields
async fn upload_files<S, E, L>(
    State(state): State<Arc<AppState<S, E, L>>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError>
where
    S: VectorStore + Send + Sync + 'static,
    E: Embedder + Send + Sync + 'static,
    L: LanguageModel + Send + Sync + 'static,
{
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("Failed to read multipart field: {}", e),
        )
    })? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let Some(filename) = field.file_name().map(|s| s.to_string()) else {
            continue;
        };

        let data = field.bytes().await.map_err(|e| {
            api_error(
                StatusCode::BAD_REQUEST,
                format!("Failed to read file data: {}", e),
            )
        })?;

        if !filename.to_lowercase().ends_with(".pdf") {
            warn!("Rejected non-PDF upload: {}", filename);
            files.push(UploadedFile::failed(
                filename,
                "only PDF files are supported".to_string(),
            ));
            continue;
        }

        let result = match load_pdf_upload(filename.clone(), data.to_vec()).await {
            Ok(document) => state.engine.ingest_document(&document).await,
            Err(e) => Err(e),
        };

        files.push(match result {
            Ok(outcome) => UploadedFile::from_outcome(filename, outcome),
            Err(e) => {
                warn!("Failed to process {}: {:#}", filename, e);
                UploadedFile::failed(filename, format!("{:#}", e))
            }
        });
    }

    if files.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "No files uploaded"));
    }

    let indexed = files.iter().filter(|f| f.status == "indexed").count();
    Ok(Json(UploadResponse { files, indexed }))
}

async fn ask<S, E, L>(
    State(state): State<Arc<AppState<S, E, L>>>,
    Json(request): Json<AskRequest>,
) -> Result<Json<Answer>, ApiError>
where
    S: VectorStore + Send + Sync + 'static,
    E: Embedder + Send + Sync + 'static,
    L: LanguageModel + Send + Sync + 'static,
{
    let answer = state
        .engine
        .answer_question(&request.question)
        .await
        .map_err(internal_error)?;

    Ok(Json(answer))
}

async fn info<S, E, L>(
    State(state): State<Arc<AppState<S, E, L>>>,
) -> Result<Json<InfoResponse>, ApiError>
where
    S: VectorStore + Send + Sync + 'static,
    E: Embedder + Send + Sync + 'static,
    L: LanguageModel + Send + Sync + 'static,
{
    let collection = state
        .engine
        .collection_info()
        .await
        .map_err(internal_error)?;

    Ok(Json(InfoResponse {
        settings: state.config.describe(),
        collection,
    }))
}

async fn clear<S, E, L>(
    State(state): State<Arc<AppState<S, E, L>>>,
) -> Result<Json<ClearResponse>, ApiError>
where
    S: VectorStore + Send + Sync + 'static,
    E: Embedder + Send + Sync + 'static,
    L: LanguageModel + Send + Sync + 'static,
{
    state.engine.clear().await.map_err(internal_error)?;

    Ok(Json(ClearResponse {
        success: true,
        message: "Database cleared!".to_string(),
    }))
}
