//! 用户实体定义
//!
//! 匿名聊天用户：兴趣、语言、屏蔽列表、评分、状态以及处罚信息。

use std::collections::BTreeSet;
use std::fmt;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{Interests, Language, SessionId, Timestamp, UserId};

/// 用户状态枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Offline,
    Online,
    /// 正在排队等待匹配
    Waiting,
    /// 正在会话中
    Chatting,
    Suspended,
}

impl UserStatus {
    /// 可以发起 `start` 的状态
    pub fn is_idle(self) -> bool {
        matches!(self, UserStatus::Offline | UserStatus::Online)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UserStatus::Offline => "offline",
            UserStatus::Online => "online",
            UserStatus::Waiting => "waiting",
            UserStatus::Chatting => "chatting",
            UserStatus::Suspended => "suspended",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for UserStatus {
    fn default() -> Self {
        Self::Online
    }
}

/// 处罚期限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SuspensionTerm {
    Timed { until: Timestamp },
    Permanent,
}

/// 封禁信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suspension {
    pub reason: String,
    pub term: SuspensionTerm,
    pub suspended_at: Timestamp,
}

impl Suspension {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        match self.term {
            SuspensionTerm::Timed { until } => until <= now,
            SuspensionTerm::Permanent => false,
        }
    }
}

/// 警告记录（只追加）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub reason: String,
    pub issued_at: Timestamp,
}

/// 累计评分
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rating {
    pub average: f64,
    pub count: u32,
}

impl Rating {
    pub const MAX: f64 = 5.0;

    /// 新平均分 = (旧平均分 * 旧次数 + 新分数) / (旧次数 + 1)
    pub fn record(&mut self, score: u8) -> DomainResult<()> {
        if !(1..=5).contains(&score) {
            return Err(DomainError::ScoreOutOfRange(score));
        }
        let total = self.average * f64::from(self.count) + f64::from(score);
        self.count += 1;
        self.average = (total / f64::from(self.count)).clamp(0.0, Self::MAX);
        Ok(())
    }
}

/// 匹配优先级：由评分推导，未评分用户取中间值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u8);

impl Priority {
    pub const UNRATED: Priority = Priority(3);

    pub fn from_rating(rating: &Rating) -> Self {
        if rating.count == 0 {
            return Self::UNRATED;
        }
        Priority(rating.average.round().clamp(0.0, Rating::MAX) as u8)
    }
}

/// 用户实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// 匿名昵称，创建时生成
    pub display_name: String,
    pub interests: Interests,
    pub language: Language,
    /// 该用户屏蔽的用户
    pub blocked: BTreeSet<UserId>,
    pub rating: Rating,
    pub status: UserStatus,
    pub current_session: Option<SessionId>,
    pub suspension: Option<Suspension>,
    pub warnings: Vec<Warning>,
    /// 参与过的会话总数（统计的唯一来源）
    pub total_sessions: u64,
    pub messages_sent: u64,
    /// 存储不可用时临时构造、未持久化的用户
    #[serde(default, skip_serializing)]
    pub ephemeral: bool,
    /// 乐观并发控制版本号
    #[serde(default)]
    pub version: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl User {
    pub fn new(id: UserId, display_name: impl Into<String>, now: Timestamp) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            interests: Interests::default(),
            language: Language::default(),
            blocked: BTreeSet::new(),
            rating: Rating::default(),
            status: UserStatus::Online,
            current_session: None,
            suspension: None,
            warnings: Vec::new(),
            total_sessions: 0,
            messages_sent: 0,
            ephemeral: false,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn ephemeral(id: UserId, display_name: impl Into<String>, now: Timestamp) -> Self {
        let mut user = Self::new(id, display_name, now);
        user.ephemeral = true;
        user
    }

    pub fn priority(&self) -> Priority {
        Priority::from_rating(&self.rating)
    }

    /// 任一方向的屏蔽都算
    pub fn is_blocked_with(&self, other: &User) -> bool {
        self.blocked.contains(&other.id) || other.blocked.contains(&self.id)
    }

    pub fn block(&mut self, other: UserId, now: Timestamp) {
        self.blocked.insert(other);
        self.updated_at = now;
    }

    pub fn enter_queue(&mut self, now: Timestamp) {
        self.status = UserStatus::Waiting;
        self.updated_at = now;
    }

    pub fn join_session(&mut self, session_id: SessionId, now: Timestamp) {
        self.status = UserStatus::Chatting;
        self.current_session = Some(session_id);
        self.total_sessions += 1;
        self.updated_at = now;
    }

    /// 回到空闲状态；已封禁的用户保持封禁
    pub fn go_idle(&mut self, now: Timestamp) {
        if self.status != UserStatus::Suspended {
            self.status = UserStatus::Online;
        }
        self.current_session = None;
        self.updated_at = now;
    }

    pub fn suspend(&mut self, reason: impl Into<String>, term: SuspensionTerm, now: Timestamp) {
        self.status = UserStatus::Suspended;
        self.current_session = None;
        self.suspension = Some(Suspension {
            reason: reason.into(),
            term,
            suspended_at: now,
        });
        self.updated_at = now;
    }

    /// 解除封禁，保留历史警告
    pub fn lift_suspension(&mut self, now: Timestamp) {
        self.suspension = None;
        if self.status == UserStatus::Suspended {
            self.status = UserStatus::Online;
        }
        self.updated_at = now;
    }

    pub fn is_suspended(&self, now: Timestamp) -> bool {
        self.status == UserStatus::Suspended
            && self
                .suspension
                .as_ref()
                .map_or(true, |suspension| !suspension.is_expired(now))
    }

    pub fn warn(&mut self, reason: impl Into<String>, now: Timestamp) {
        self.warnings.push(Warning {
            reason: reason.into(),
            issued_at: now,
        });
        self.updated_at = now;
    }
}

/// 计算处罚截止时间
pub fn suspension_until(now: Timestamp, duration: Duration) -> SuspensionTerm {
    SuspensionTerm::Timed {
        until: now + duration,
    }
}
