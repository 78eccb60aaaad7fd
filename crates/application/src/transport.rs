//! 出站消息传输：把文本、快捷回复、输入状态投递给终端用户所在的平台

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use domain::UserId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    #[error("transport failed: {0}")]
    Failed(String),
}

impl TransportError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// 传输协作者。实现方不得阻塞，失败只返回错误，由调用方记录后继续。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_text(&self, user_id: &UserId, text: &str) -> Result<(), TransportError>;

    async fn send_quick_replies(
        &self,
        user_id: &UserId,
        text: &str,
        options: &[String],
    ) -> Result<(), TransportError>;

    async fn send_typing_indicator(&self, user_id: &UserId, on: bool)
        -> Result<(), TransportError>;
}

/// 出站事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    Text {
        user_id: UserId,
        text: String,
    },
    QuickReplies {
        user_id: UserId,
        text: String,
        options: Vec<String>,
    },
    Typing {
        user_id: UserId,
        on: bool,
    },
}

impl OutboundEvent {
    pub fn recipient(&self) -> &UserId {
        match self {
            OutboundEvent::Text { user_id, .. }
            | OutboundEvent::QuickReplies { user_id, .. }
            | OutboundEvent::Typing { user_id, .. } => user_id,
        }
    }
}

/// 进程内传输：事件发布到广播通道，由 WebSocket 连接按用户过滤转发
///
/// 同时记录每个用户的在线连接数，收件人没有连接时投递失败，交给发件箱重试。
#[derive(Clone)]
pub struct BroadcastTransport {
    sender: broadcast::Sender<OutboundEvent>,
    connections: Arc<Mutex<HashMap<UserId, usize>>>,
}

impl BroadcastTransport {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            connections: Arc::default(),
        }
    }

    /// 为某个用户的连接订阅事件；返回值存活期间该用户视为在线
    pub fn subscribe_user(&self, user_id: &UserId) -> UserSubscription {
        let receiver = self.sender.subscribe();
        *self
            .connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(user_id.clone())
            .or_default() += 1;
        UserSubscription {
            user_id: user_id.clone(),
            receiver,
            connections: self.connections.clone(),
        }
    }

    pub fn is_connected(&self, user_id: &UserId) -> bool {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(user_id)
    }

    fn publish(&self, event: OutboundEvent) -> Result<(), TransportError> {
        if !self.is_connected(event.recipient()) {
            return Err(TransportError::failed(format!(
                "no live connection for {}",
                event.recipient()
            )));
        }
        self.sender
            .send(event)
            .map(|_| ())
            .map_err(|err| TransportError::failed(format!("no live connection: {err}")))
    }
}

/// 单个连接的事件订阅，只产出发给该用户的事件
pub struct UserSubscription {
    user_id: UserId,
    receiver: broadcast::Receiver<OutboundEvent>,
    connections: Arc<Mutex<HashMap<UserId, usize>>>,
}

impl UserSubscription {
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub async fn recv(&mut self) -> Result<OutboundEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if event.recipient() == &self.user_id {
                return Ok(event);
            }
        }
    }
}

impl Drop for UserSubscription {
    fn drop(&mut self) {
        let mut connections = self
            .connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(count) = connections.get_mut(&self.user_id) {
            *count -= 1;
            if *count == 0 {
                connections.remove(&self.user_id);
            }
        }
    }
}

impl Default for BroadcastTransport {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Transport for BroadcastTransport {
    async fn send_text(&self, user_id: &UserId, text: &str) -> Result<(), TransportError> {
        self.publish(OutboundEvent::Text {
            user_id: user_id.clone(),
            text: text.to_owned(),
        })
    }

    async fn send_quick_replies(
        &self,
        user_id: &UserId,
        text: &str,
        options: &[String],
    ) -> Result<(), TransportError> {
        self.publish(OutboundEvent::QuickReplies {
            user_id: user_id.clone(),
            text: text.to_owned(),
            options: options.to_vec(),
        })
    }

    async fn send_typing_indicator(
        &self,
        user_id: &UserId,
        on: bool,
    ) -> Result<(), TransportError> {
        self.publish(OutboundEvent::Typing {
            user_id: user_id.clone(),
            on,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_transport_delivers_only_to_the_recipient() {
        let transport = BroadcastTransport::new(16);
        let alice = UserId::parse("alice").unwrap();
        let bob = UserId::parse("bob").unwrap();
        let mut alice_rx = transport.subscribe_user(&alice);
        let _bob_rx = transport.subscribe_user(&bob);

        transport.send_text(&bob, "for bob").await.unwrap();
        transport.send_text(&alice, "hello").await.unwrap();
        transport.send_typing_indicator(&alice, true).await.unwrap();

        let first = alice_rx.recv().await.unwrap();
        assert_eq!(first.recipient(), &alice);
        assert!(matches!(first, OutboundEvent::Text { ref text, .. } if text == "hello"));
        assert!(matches!(
            alice_rx.recv().await.unwrap(),
            OutboundEvent::Typing { on: true, .. }
        ));
    }

    #[tokio::test]
    async fn broadcast_transport_fails_without_listeners() {
        let transport = BroadcastTransport::new(16);
        let user = UserId::parse("u1").unwrap();
        assert!(transport.send_text(&user, "hello").await.is_err());
    }

    #[tokio::test]
    async fn offline_recipient_fails_while_others_are_connected() {
        let transport = BroadcastTransport::new(16);
        let alice = UserId::parse("alice").unwrap();
        let bob = UserId::parse("bob").unwrap();
        let _alice_rx = transport.subscribe_user(&alice);

        assert!(transport.send_text(&bob, "hi").await.is_err());
        assert!(transport.send_text(&alice, "hi").await.is_ok());
    }

    #[tokio::test]
    async fn dropping_the_last_connection_marks_user_offline() {
        let transport = BroadcastTransport::new(16);
        let alice = UserId::parse("alice").unwrap();
        let first = transport.subscribe_user(&alice);
        let second = transport.subscribe_user(&alice);

        drop(first);
        assert!(transport.is_connected(&alice));
        drop(second);
        assert!(!transport.is_connected(&alice));
        assert!(transport.send_text(&alice, "hi").await.is_err());
    }
}
