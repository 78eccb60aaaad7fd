//! 运营通知：新举报、紧急举报、自动封禁

use async_trait::async_trait;
use domain::{Report, ReportId, SessionId, SuspensionTerm, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum NotificationError {
    #[error("notification failed: {0}")]
    Failed(String),
}

impl NotificationError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Normal,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ModerationEvent {
    NewReport {
        report_id: ReportId,
        reporter_id: UserId,
        reported_id: UserId,
        session_id: Option<SessionId>,
        reason: String,
        pending_reports: u64,
    },
    /// 命中紧急关键词的举报
    CriticalReport {
        report_id: ReportId,
        reporter_id: UserId,
        reported_id: UserId,
        reason: String,
        matched_keyword: String,
    },
    UserSuspended {
        user_id: UserId,
        reason: String,
        term: SuspensionTerm,
    },
}

impl ModerationEvent {
    pub fn new_report(report: &Report, pending_reports: u64) -> Self {
        ModerationEvent::NewReport {
            report_id: report.id,
            reporter_id: report.reporter_id.clone(),
            reported_id: report.reported_id.clone(),
            session_id: report.session_id,
            reason: report.reason.clone(),
            pending_reports,
        }
    }

    pub fn critical_report(report: &Report, matched_keyword: impl Into<String>) -> Self {
        ModerationEvent::CriticalReport {
            report_id: report.id,
            reporter_id: report.reporter_id.clone(),
            reported_id: report.reported_id.clone(),
            reason: report.reason.clone(),
            matched_keyword: matched_keyword.into(),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            ModerationEvent::CriticalReport { .. } => Severity::High,
            ModerationEvent::NewReport { .. } | ModerationEvent::UserSuspended { .. } => {
                Severity::Normal
            }
        }
    }

    /// 面向运营人员的一行摘要
    pub fn summary(&self) -> String {
        match self {
            ModerationEvent::NewReport {
                reported_id,
                reason,
                pending_reports,
                ..
            } => format!("New report against {reported_id} ({pending_reports} pending): {reason}"),
            ModerationEvent::CriticalReport {
                reported_id,
                matched_keyword,
                reason,
                ..
            } => format!(
                "CRITICAL report against {reported_id} (matched \"{matched_keyword}\"): {reason}"
            ),
            ModerationEvent::UserSuspended { user_id, reason, term } => match term {
                SuspensionTerm::Permanent => {
                    format!("User {user_id} permanently suspended: {reason}")
                }
                SuspensionTerm::Timed { until } => {
                    format!("User {user_id} suspended until {until}: {reason}")
                }
            },
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: ModerationEvent) -> Result<(), NotificationError>;
}

/// 只写日志的通知实现，未配置运营渠道时使用
#[derive(Debug, Default)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(&self, event: ModerationEvent) -> Result<(), NotificationError> {
        match event.severity() {
            Severity::High => tracing::error!(summary = %event.summary(), "紧急审核事件"),
            Severity::Normal => tracing::info!(summary = %event.summary(), "审核事件"),
        }
        Ok(())
    }
}
