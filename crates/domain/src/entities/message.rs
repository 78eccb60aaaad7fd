use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{SessionId, Timestamp, UserId};

/// 会话内转发的一条文本消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub session_id: SessionId,
    pub sender_id: UserId,
    pub text: String,
    /// 会话内序号，从 1 开始
    pub sequence: u64,
    pub sent_at: Timestamp,
}

impl ChatMessage {
    pub const MAX_LEN: usize = 2000;

    pub fn validate_text(text: &str) -> Result<(), DomainError> {
        if text.trim().is_empty() {
            return Err(DomainError::invalid_argument("text", "cannot be empty"));
        }
        if text.chars().count() > Self::MAX_LEN {
            return Err(DomainError::invalid_argument("text", "too long"));
        }
        Ok(())
    }
}
