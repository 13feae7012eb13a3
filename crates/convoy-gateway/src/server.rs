use crate::router::FrameRouter;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use convoy_core::ConvoyError;
use convoy_orchestrator::{PerformanceMonitor, WorkflowOrchestrator};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Shared application state.
pub struct AppState {
    /// Orchestrator behind every route.
    pub orchestrator: Arc<WorkflowOrchestrator>,
    /// Reported by `/status` when present.
    pub monitor: Option<Arc<PerformanceMonitor>>,
    /// Applies inbound socket frames.
    pub router: FrameRouter,
}

/// Body of `POST /workflows`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartWorkflowRequest {
    /// Registered template to run.
    pub template_name: String,
    /// Run parameters. Defaults to `null`.
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// The gateway server.
pub struct GatewayServer;

impl GatewayServer {
    /// Build the axum router for the gateway routes.
    pub fn build(
        orchestrator: Arc<WorkflowOrchestrator>,
        monitor: Option<Arc<PerformanceMonitor>>,
    ) -> Router {
        let state = Arc::new(AppState {
            router: FrameRouter::new(orchestrator.clone()),
            orchestrator,
            monitor,
        });

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/status", get(status_handler))
            .route("/workflows", post(start_workflow_handler).get(list_workflows_handler))
            .route("/workflows/{run_id}", get(run_handler))
            .with_state(state)
    }
}

struct ApiError(ConvoyError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ConvoyError::UnknownWorkflowType(_) | ConvoyError::UnknownAgent(_) => StatusCode::NOT_FOUND,
            ConvoyError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ConvoyError::MessageParse(_) | ConvoyError::Config(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "error": self.0.to_string(), "kind": self.0.kind() });
        (status, Json(body)).into_response()
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok", "service": "convoy"}))
}

async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let bus = state.orchestrator.bus();
    Json(serde_json::json!({
        "bus": bus.stats(),
        "busRunning": bus.is_running(),
        "channels": bus.channels(),
        "agents": state.orchestrator.registry().snapshot(),
        "workflows": state.orchestrator.workflow_stats(),
        "templates": state.orchestrator.template_names(),
        "monitor": state.monitor.as_ref().map(|m| m.to_json()),
    }))
}

async fn start_workflow_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartWorkflowRequest>,
) -> Result<impl IntoResponse, ApiError> {
    info!(template = %request.template_name, "Workflow requested over HTTP");
    let outcome = state
        .orchestrator
        .start_workflow(&request.template_name, request.parameters)
        .await
        .map_err(ApiError)?;
    Ok(Json(outcome))
}

async fn list_workflows_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "templates": state.orchestrator.template_names(),
        "active": state.orchestrator.active_runs(),
    }))
}

async fn run_handler(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<Uuid>,
) -> Response {
    match state.orchestrator.run(run_id) {
        Some(run) => Json(run).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("Unknown run: {run_id}"), "kind": "unknown_run" })),
        )
            .into_response(),
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    use futures_util::{SinkExt, StreamExt};

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // The bus writes frames into this channel; the welcome is already queued.
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let agent_id = state.orchestrator.bus().connect(tx);
    info!(agent_id = %agent_id, "WebSocket connected");

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_state = state.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => recv_state.router.handle_text(agent_id, text.as_str()),
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(agent_id = %agent_id, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    // Either side ending closes the connection.
    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    state.router.disconnect(agent_id);
}
