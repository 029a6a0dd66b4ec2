//! HTTP transport over the retrieval pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/query` | Rank stored chunks against a question |
//! | `GET`  | `/health` | Liveness plus readiness and record count |
//!
//! The listener binds before the index is ready; until the lifecycle
//! manager finishes, `/query` answers `503 not_ready`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_ready", "message": "index is still loading" } }
//! ```
//!
//! Error codes: `bad_request` (400, including bodies that are not a JSON
//! query object), `not_ready` (503), `embedding_failure`
//! (502), and the error class of anything else (500). Messages are generic;
//! details go to the log.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser clients can
//! query directly.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::error::RagError;
use crate::lifecycle::IndexLifecycleManager;
use crate::models::QueryHit;
use crate::pipeline::RetrievalPipeline;

/// Build the router. Exposed so tests can serve it on an ephemeral port.
pub fn router(pipeline: Arc<RetrievalPipeline>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/query", post(handle_query))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(pipeline)
}

/// Bind, initialize the index in the background, and serve until Ctrl-C,
/// SIGTERM, or a fatal initialization error.
///
/// On the way out the ready store (if any) is persisted once more and
/// closed; failures there are logged only. Returns an error when
/// initialization was fatal.
pub async fn run_server(config: &Config, force_rebuild: bool) -> anyhow::Result<()> {
    let embedder = create_embedder(&config.embedding)?;
    let pipeline = Arc::new(RetrievalPipeline::new(
        config.retrieval.top_k,
        config.embedding.timeout(),
    ));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);

    let manager =
        IndexLifecycleManager::from_config(config, Arc::clone(&embedder)).force_rebuild(force_rebuild);

    let (fatal_tx, fatal_rx) = watch::channel::<Option<String>>(None);
    let init_pipeline = Arc::clone(&pipeline);
    let lifecycle = tokio::spawn(async move {
        match manager.start().await {
            Ok((store, _outcome)) => {
                if let Err(e) = init_pipeline.install(Arc::new(store), embedder) {
                    tracing::error!(error = %e, "failed to install index");
                }
            }
            Err(e) => {
                tracing::error!(class = e.class(), error = %e, "index initialization failed");
                let _ = fatal_tx.send(Some(e.to_string()));
            }
        }
    });

    axum::serve(listener, router(Arc::clone(&pipeline)))
        .with_graceful_shutdown(shutdown_signal(fatal_rx.clone()))
        .await?;

    lifecycle.abort();
    final_persist(&pipeline).await;

    let fatal = fatal_rx.borrow().clone();
    if let Some(message) = fatal {
        anyhow::bail!("index initialization failed: {}", message);
    }
    Ok(())
}

/// Persist and close the ready store, if there is one.
pub async fn final_persist(pipeline: &RetrievalPipeline) {
    let Some(store) = pipeline.store() else {
        return;
    };
    match store.persist().await {
        Ok(()) => tracing::info!(records = store.record_count(), "index saved"),
        Err(e) => tracing::warn!(error = %e, "final index save failed"),
    }
    store.close().await;
}

fn shutdown_signal(mut fatal: watch::Receiver<Option<String>>) -> impl Future<Output = ()> {
    async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        let failed = async {
            while fatal.changed().await.is_ok() {
                if fatal.borrow().is_some() {
                    return;
                }
            }
            std::future::pending::<()>().await;
        };

        tokio::select! {
            _ = ctrl_c => tracing::info!("received Ctrl-C, shutting down"),
            _ = terminate => tracing::info!("received SIGTERM, shutting down"),
            _ = failed => tracing::info!("shutting down after fatal initialization error"),
        }
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let (status, message) = match &err {
            RagError::NotReady => (StatusCode::SERVICE_UNAVAILABLE, "index is still loading"),
            RagError::Embedding { .. } => (StatusCode::BAD_GATEWAY, "embedding backend unavailable"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal error"),
        };
        if !matches!(err, RagError::NotReady) {
            tracing::error!(class = err.class(), error = %err, "query failed");
        }
        AppError {
            status,
            code: err.class().to_string(),
            message: message.to_string(),
        }
    }
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    /// Missing or `null` is the empty query.
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    top_k: Option<usize>,
}

#[derive(Serialize)]
struct QueryResponse {
    results: Vec<QueryHit>,
}

async fn handle_query(
    State(pipeline): State<Arc<RetrievalPipeline>>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, AppError> {
    let Json(req) = payload.map_err(|rejection| {
        tracing::debug!(error = %rejection, "rejected query body");
        bad_request("invalid request body")
    })?;
    if req.top_k == Some(0) {
        return Err(bad_request("top_k must be >= 1"));
    }
    let query = req.query.unwrap_or_default();
    let results = pipeline.query(&query, req.top_k).await?;
    Ok(Json(QueryResponse { results }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    /// `"ok"` once the index is ready, `"starting"` before.
    status: String,
    version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    records: Option<usize>,
}

async fn handle_health(State(pipeline): State<Arc<RetrievalPipeline>>) -> Json<HealthResponse> {
    let store = pipeline.store();
    Json(HealthResponse {
        status: if store.is_some() { "ok" } else { "starting" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        records: store.map(|s| s.record_count()),
    })
}
