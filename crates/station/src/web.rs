use axum::extract::rejection::FormRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use anyhow::{Context, Result};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::api::CommandError;
use crate::control::Request;

/// Handlers never touch the station; they queue a request for the control
/// loop and wait for its answer.
#[derive(Clone)]
pub struct WebState {
    tx: mpsc::Sender<Request>,
    command_field: Arc<str>,
}

impl WebState {
    pub fn new(tx: mpsc::Sender<Request>, command_field: &str) -> Self {
        Self {
            tx,
            command_field: Arc::from(command_field),
        }
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/{pump_id}", post(pump_command))
        .with_state(state)
}

async fn status(State(state): State<WebState>) -> Response {
    let (reply, rx) = oneshot::channel();
    match dispatch(&state.tx, Request::Status { reply }, rx).await {
        Some(report) => Json(report).into_response(),
        None => unavailable(),
    }
}

/// The command token comes from the form body, or failing that from the
/// query string.
async fn pump_command(
    State(state): State<WebState>,
    Path(pump_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    form: Result<Form<HashMap<String, String>>, FormRejection>,
) -> Response {
    let field = &*state.command_field;
    let token = form
        .ok()
        .and_then(|Form(mut body)| body.remove(field))
        .or_else(|| query.get(field).cloned());

    let (reply, rx) = oneshot::channel();
    let request = Request::Command {
        pump_id,
        token,
        reply,
    };
    match dispatch(&state.tx, request, rx).await {
        Some(Ok(echo)) => Json(echo).into_response(),
        Some(Err(e)) => e.into_response(),
        None => unavailable(),
    }
}

/// `None` when the control loop has gone away.
async fn dispatch<T>(
    tx: &mpsc::Sender<Request>,
    request: Request,
    rx: oneshot::Receiver<T>,
) -> Option<T> {
    tx.send(request).await.ok()?;
    rx.await.ok()
}

// ---------------------------------------------------------------------------
// Error responses
// ---------------------------------------------------------------------------

impl IntoResponse for CommandError {
    fn into_response(self) -> Response {
        let status = match self {
            CommandError::UnknownPump(_) => StatusCode::NOT_FOUND,
            CommandError::MissingParameter
            | CommandError::InvalidCommand(_)
            | CommandError::NotControllable(_) => StatusCode::BAD_REQUEST,
        };
        let body = json!({ "error": self.reason(), "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}

fn unavailable() -> Response {
    let body = json!({ "error": "unavailable", "message": "control loop is not running" });
    (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn bind(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))
}

pub async fn serve(listener: TcpListener, state: WebState) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("web api listening on http://{addr}");
    }
    axum::serve(listener, router(state))
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================
