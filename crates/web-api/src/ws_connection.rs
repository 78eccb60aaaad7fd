use application::UserSubscription;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::UserId;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;

use crate::state::AppState;

/// 客户端经 WebSocket 上行的帧
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    /// 命令或聊天文本，与 HTTP 命令接口等价
    Input { text: String },
    Typing { on: bool },
}

/// 单个用户的 WebSocket 连接
///
/// 下行：按用户订阅进程内广播的出站事件；
/// 上行：解析客户端帧交给编排器。
pub struct UserConnection {
    state: AppState,
    user_id: UserId,
    events: UserSubscription,
}

impl UserConnection {
    pub fn new(state: AppState, user_id: UserId) -> Self {
        let events = state.transport.subscribe_user(&user_id);
        Self {
            state,
            user_id,
            events,
        }
    }

    pub async fn run(self, socket: WebSocket) {
        let Self {
            state,
            user_id,
            mut events,
        } = self;
        tracing::info!(user_id = %user_id, "WebSocket 连接已建立");

        let (mut sender, mut incoming) = socket.split();

        let forward_user = user_id.clone();
        let mut send_task = tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(user_id = %forward_user, skipped, "WebSocket 下行积压，丢弃旧事件");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(err) => {
                        tracing::error!(error = %err, "出站事件序列化失败");
                        continue;
                    }
                };
                if sender.send(WsMessage::Text(payload.into())).await.is_err() {
                    break;
                }
            }
        });

        let receive_user = user_id.clone();
        let mut recv_task = tokio::spawn(async move {
            while let Some(Ok(message)) = incoming.next().await {
                match message {
                    WsMessage::Text(text) => {
                        handle_frame(&state, &receive_user, text.as_str()).await;
                    }
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
        });

        tokio::select! {
            _ = &mut send_task => recv_task.abort(),
            _ = &mut recv_task => send_task.abort(),
        }
        tracing::info!(user_id = %user_id, "WebSocket 连接已关闭");
    }
}

async fn handle_frame(state: &AppState, user_id: &UserId, raw: &str) {
    let frame = match serde_json::from_str::<ClientFrame>(raw) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::debug!(user_id = %user_id, error = %err, "无法解析的上行帧");
            return;
        }
    };

    let orchestrator = &state.services.orchestrator;
    // 输入出错时编排器已把提示推送给用户，这里只记录
    let result = match frame {
        ClientFrame::Input { text } => orchestrator.handle(user_id, &text).await.map(|_| ()),
        ClientFrame::Typing { on } => orchestrator.typing(user_id, on).await,
    };
    if let Err(err) = result {
        tracing::debug!(user_id = %user_id, error = %err, "上行帧处理失败");
    }
}
