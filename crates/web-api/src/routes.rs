use axum::{
    extract::{Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use application::CommandOutcome;
use domain::UserId;

use crate::{
    admin_routes::admin_routes, error::ApiError, state::AppState, ws_connection::UserConnection,
};

#[derive(Debug, Deserialize)]
struct CommandPayload {
    text: String,
}

#[derive(Debug, Deserialize)]
struct TypingPayload {
    on: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/users/{user_id}/commands", post(handle_command))
        .route("/users/{user_id}/typing", post(handle_typing))
        .route("/users/{user_id}/ws", get(websocket_upgrade))
        .nest("/admin", admin_routes())
}

async fn health() -> StatusCode {
    StatusCode::OK
}

fn parse_user_id(raw: String) -> Result<UserId, ApiError> {
    UserId::parse(raw).map_err(|err| ApiError::bad_request(err.to_string()))
}

/// 用户输入（命令或聊天文本）交给编排器；错误提示同时已推送给用户
async fn handle_command(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(payload): Json<CommandPayload>,
) -> Result<Json<CommandOutcome>, ApiError> {
    let user_id = parse_user_id(user_id)?;
    let outcome = state
        .services
        .orchestrator
        .handle(&user_id, &payload.text)
        .await?;
    Ok(Json(outcome))
}

async fn handle_typing(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(payload): Json<TypingPayload>,
) -> Result<StatusCode, ApiError> {
    let user_id = parse_user_id(user_id)?;
    state
        .services
        .orchestrator
        .typing(&user_id, payload.on)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn websocket_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response, ApiError> {
    let user_id = parse_user_id(user_id)?;
    // 升级前订阅，避免漏掉握手期间产生的事件
    let connection = UserConnection::new(state, user_id);
    Ok(ws.on_upgrade(move |socket| connection.run(socket)))
}
