//! 用户举报

use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{ReportId, SessionId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    Resolved,
}

impl ReportStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Resolved => "resolved",
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(ReportStatus::Pending),
            "resolved" => Ok(ReportStatus::Resolved),
            other => Err(DomainError::invalid_argument(
                "status",
                format!("unknown report status {other}"),
            )),
        }
    }
}

/// 管理员对举报采取的处理动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ModerationAction {
    Warn,
    /// `duration_hours` 为空表示永久封禁
    Block { duration_hours: Option<u32> },
    Dismiss,
    DeleteSession,
}

impl ModerationAction {
    pub fn block_duration(&self) -> Option<Duration> {
        match self {
            ModerationAction::Block {
                duration_hours: Some(hours),
            } => Some(Duration::hours(i64::from(*hours))),
            _ => None,
        }
    }
}

/// 处理结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub action: ModerationAction,
    pub reviewer: String,
    pub resolved_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub id: ReportId,
    pub reporter_id: UserId,
    pub reported_id: UserId,
    pub session_id: Option<SessionId>,
    pub reason: String,
    pub status: ReportStatus,
    pub resolution: Option<Resolution>,
    pub created_at: Timestamp,
}

impl Report {
    pub const MAX_REASON_LEN: usize = 500;

    pub fn file(
        reporter_id: UserId,
        reported_id: UserId,
        session_id: Option<SessionId>,
        reason: impl Into<String>,
        now: Timestamp,
    ) -> DomainResult<Self> {
        if reporter_id == reported_id {
            return Err(DomainError::SelfReport);
        }
        let reason = reason.into().trim().to_owned();
        if reason.is_empty() {
            return Err(DomainError::invalid_argument("reason", "cannot be empty"));
        }
        let reason: String = reason.chars().take(Self::MAX_REASON_LEN).collect();
        Ok(Self {
            id: ReportId::new(),
            reporter_id,
            reported_id,
            session_id,
            reason,
            status: ReportStatus::Pending,
            resolution: None,
            created_at: now,
        })
    }

    pub fn resolve(
        &mut self,
        action: ModerationAction,
        reviewer: impl Into<String>,
        now: Timestamp,
    ) -> DomainResult<()> {
        if self.status == ReportStatus::Resolved {
            return Err(DomainError::business_rule_violation("report already resolved"));
        }
        self.status = ReportStatus::Resolved;
        self.resolution = Some(Resolution {
            action,
            reviewer: reviewer.into(),
            resolved_at: now,
        });
        Ok(())
    }
}
