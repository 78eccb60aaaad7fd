//! 一对一聊天会话

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{SessionId, Timestamp, UserId};

/// 配对时刻的参与者快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: UserId,
    pub display_name: String,
}

/// 会话结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Stop,
    Next,
    Block,
    Reported,
    /// 管理处罚强制结束
    Moderation,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EndReason::Stop => "stop",
            EndReason::Next => "next",
            EndReason::Block => "block",
            EndReason::Reported => "reported",
            EndReason::Moderation => "moderation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRating {
    pub user_id: UserId,
    pub score: u8,
    pub rated_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: SessionId,
    pub participants: [Participant; 2],
    /// 共同兴趣主题
    pub theme: Option<String>,
    pub started_at: Timestamp,
    pub ended_at: Option<Timestamp>,
    pub active: bool,
    pub end_reason: Option<EndReason>,
    pub message_count: u64,
    pub ratings: Vec<SessionRating>,
    #[serde(default)]
    pub version: u64,
}

impl ChatSession {
    pub fn open(
        first: Participant,
        second: Participant,
        theme: Option<String>,
        now: Timestamp,
    ) -> DomainResult<Self> {
        if first.user_id == second.user_id {
            return Err(DomainError::SelfPairing);
        }
        Ok(Self {
            id: SessionId::new(),
            participants: [first, second],
            theme,
            started_at: now,
            ended_at: None,
            active: true,
            end_reason: None,
            message_count: 0,
            ratings: Vec::new(),
            version: 0,
        })
    }

    pub fn has_participant(&self, user_id: &UserId) -> bool {
        self.participants.iter().any(|p| &p.user_id == user_id)
    }

    /// 另一位参与者；`user_id` 不在会话中时返回 None
    pub fn partner_of(&self, user_id: &UserId) -> Option<&Participant> {
        match &self.participants {
            [a, b] if &a.user_id == user_id => Some(b),
            [a, b] if &b.user_id == user_id => Some(a),
            _ => None,
        }
    }

    pub fn record_message(&mut self) -> DomainResult<u64> {
        if !self.active {
            return Err(DomainError::SessionEnded);
        }
        self.message_count += 1;
        Ok(self.message_count)
    }

    pub fn end(&mut self, reason: EndReason, now: Timestamp) -> DomainResult<()> {
        if !self.active {
            return Err(DomainError::SessionEnded);
        }
        self.active = false;
        self.ended_at = Some(now);
        self.end_reason = Some(reason);
        Ok(())
    }

    pub fn duration_seconds(&self) -> i64 {
        self.ended_at
            .map(|ended| (ended - self.started_at).num_seconds().max(0))
            .unwrap_or(0)
    }

    pub fn has_rated(&self, user_id: &UserId) -> bool {
        self.ratings.iter().any(|r| &r.user_id == user_id)
    }

    /// 结束后的会话只允许追加评分
    pub fn add_rating(&mut self, user_id: UserId, score: u8, now: Timestamp) -> DomainResult<()> {
        if self.active {
            return Err(DomainError::business_rule_violation(
                "session must end before it can be rated",
            ));
        }
        if !(1..=5).contains(&score) {
            return Err(DomainError::ScoreOutOfRange(score));
        }
        if self.has_rated(&user_id) {
            return Err(DomainError::business_rule_violation("session already rated"));
        }
        self.ratings.push(SessionRating {
            user_id,
            score,
            rated_at: now,
        });
        Ok(())
    }
}
