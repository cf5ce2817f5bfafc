//! HTTP trigger endpoint.
//!
//! A browser extension posts `{"file_path": "..."}` to `/` when a download
//! finishes; the file is moved into its category folder right away.

use crate::engine::{Engine, TriggerError};
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderName, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Headers sent with every response; the caller is an extension page on
/// another origin.
const CORS_HEADERS: [(HeaderName, &str); 3] = [
    (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
    (header::ACCESS_CONTROL_ALLOW_METHODS, "POST, OPTIONS"),
    (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
];

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("Failed to bind port {port}: {source}")]
    Bind { port: u16, source: io::Error },

    #[error("Server error: {0}")]
    Serve(#[source] io::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerRequest {
    pub file_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TriggerReply {
    Moved {
        message: String,
        destination: String,
    },
    Failed {
        error: String,
    },
}

impl TriggerReply {
    fn failed(error: impl ToString) -> Self {
        Self::Failed {
            error: error.to_string(),
        }
    }
}

/// Maps the outcome of a trigger request to a status and body.
pub fn respond(result: Result<PathBuf, TriggerError>) -> (StatusCode, TriggerReply) {
    match result {
        Ok(destination) => (
            StatusCode::OK,
            TriggerReply::Moved {
                message: "File moved successfully".to_string(),
                destination: destination.display().to_string(),
            },
        ),
        Err(e @ (TriggerError::AlreadyProcessed { .. } | TriggerError::StillDownloading { .. })) => {
            (StatusCode::CONFLICT, TriggerReply::failed(e))
        }
        Err(e @ (TriggerError::OutsideWatchedDir { .. } | TriggerError::CategoryDirectory { .. })) => {
            (StatusCode::BAD_REQUEST, TriggerReply::failed(e))
        }
        Err(e @ TriggerError::Move(_)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, TriggerReply::failed(e))
        }
    }
}

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/", post(trigger).options(preflight))
        .with_state(engine)
}

async fn trigger(
    State(engine): State<Arc<Engine>>,
    payload: Result<Json<TriggerRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            let reply = TriggerReply::failed(rejection.body_text());
            return (StatusCode::BAD_REQUEST, CORS_HEADERS, Json(reply)).into_response();
        }
    };

    let path = request.file_path;
    let moved = tokio::task::spawn_blocking(move || engine.trigger_move(&path)).await;
    let (status, reply) = match moved {
        Ok(result) => respond(result),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, TriggerReply::failed(e)),
    };

    match &reply {
        TriggerReply::Moved { destination, .. } => info!(destination = %destination, "trigger handled"),
        TriggerReply::Failed { error } => {
            warn!(status = status.as_u16(), error = %error, "trigger rejected")
        }
    }

    (status, CORS_HEADERS, Json(reply)).into_response()
}

async fn preflight() -> impl IntoResponse {
    (StatusCode::OK, CORS_HEADERS)
}

/// Binds the loopback interface on `port` and serves until `shutdown` resolves.
pub async fn serve(
    engine: Arc<Engine>,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServeError> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServeError::Bind { port, source })?;
    serve_on(listener, engine, shutdown).await
}

/// Serves on an already bound listener.
pub async fn serve_on(
    listener: TcpListener,
    engine: Arc<Engine>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServeError> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "trigger endpoint listening");
    }
    axum::serve(listener, router(engine))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(ServeError::Serve)
}
