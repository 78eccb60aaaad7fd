//! 举报与封禁
//!
//! 封禁是安全关键的副作用：先提交用户状态，再结束会话、移出队列、发送通知；
//! 后续步骤失败只记录日志，不回滚封禁。

use std::sync::Arc;

use config::ModerationConfig;
use domain::{
    suspension_until, EndReason, Report, ReportId, SuspensionTerm, User, UserId,
};
use serde::Serialize;

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::notification::{ModerationEvent, NotificationSink};
use crate::outbox::Outbox;
use crate::repository::Repositories;
use crate::services::queue_pool::QueuePool;
use crate::services::session_manager::SessionManager;

pub const MULTIPLE_REPORTS_REASON: &str = "multiple reports";

#[derive(Debug, Clone)]
pub struct ModerationSettings {
    pub report_threshold: u64,
    pub auto_suspension: chrono::Duration,
    /// 小写的紧急关键词
    pub critical_keywords: Vec<String>,
}

impl ModerationSettings {
    pub fn from_config(config: &ModerationConfig) -> Self {
        Self {
            report_threshold: config.report_threshold.max(1),
            auto_suspension: chrono::Duration::hours(i64::from(config.auto_suspension_hours)),
            critical_keywords: config
                .critical_keywords
                .iter()
                .map(|keyword| keyword.trim().to_lowercase())
                .filter(|keyword| !keyword.is_empty())
                .collect(),
        }
    }

    /// 大小写不敏感的子串匹配，返回命中的关键词
    pub fn critical_keyword(&self, text: &str) -> Option<&str> {
        let text = text.to_lowercase();
        self.critical_keywords
            .iter()
            .find(|keyword| text.contains(keyword.as_str()))
            .map(String::as_str)
    }
}

impl Default for ModerationSettings {
    fn default() -> Self {
        Self::from_config(&ModerationConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReportOutcome {
    /// 举报已记录，举报人的会话已结束
    Filed { report_id: ReportId, pending: u64 },
    /// 举报导致被举报人被封禁
    Suspended { report_id: ReportId, critical: bool },
}

pub struct ModerationGateDependencies {
    pub repositories: Repositories,
    pub sessions: Arc<SessionManager>,
    pub pool: Arc<QueuePool>,
    pub notifier: Arc<dyn NotificationSink>,
    pub outbox: Outbox,
    pub clock: Arc<dyn Clock>,
    pub settings: ModerationSettings,
}

pub struct ModerationGate {
    deps: ModerationGateDependencies,
}

impl ModerationGate {
    pub fn new(deps: ModerationGateDependencies) -> Self {
        Self { deps }
    }

    pub fn settings(&self) -> &ModerationSettings {
        &self.deps.settings
    }

    /// 举报当前会话中的伙伴
    pub async fn file_report(
        &self,
        reporter_id: &UserId,
        reported_id: &UserId,
        reason: &str,
    ) -> Result<ReportOutcome, ApplicationError> {
        let reporter = self
            .deps
            .repositories
            .users
            .find_by_id(reporter_id)
            .await?
            .ok_or(ApplicationError::NotFound("user"))?;
        let session = self
            .deps
            .sessions
            .active_session_of(&reporter)
            .await?
            .ok_or(ApplicationError::NoActiveSession)?;
        let partner = session
            .partner_of(reporter_id)
            .ok_or(ApplicationError::NoActiveSession)?;
        if &partner.user_id != reported_id {
            return Err(ApplicationError::not_authorized(
                "you can only report your current chat partner",
            ));
        }

        let now = self.deps.clock.now();
        let report = Report::file(
            reporter_id.clone(),
            reported_id.clone(),
            Some(session.id),
            reason,
            now,
        )?;
        let report = self.deps.repositories.reports.create(report).await?;
        let pending = self
            .deps
            .repositories
            .reports
            .count_pending_against(reported_id)
            .await?;

        tracing::info!(
            report_id = %report.id,
            reporter = %reporter_id,
            reported = %reported_id,
            session_id = %session.id,
            pending,
            "收到举报"
        );
        self.notify(ModerationEvent::new_report(&report, pending)).await;

        if let Some(keyword) = self.deps.settings.critical_keyword(reason) {
            let keyword = keyword.to_owned();
            tracing::warn!(
                report_id = %report.id,
                reported = %reported_id,
                keyword = %keyword,
                "举报命中紧急关键词，立即封禁"
            );
            self.notify(ModerationEvent::critical_report(&report, keyword))
                .await;
            self.suspend(reported_id, "severe violation reported", SuspensionTerm::Permanent)
                .await?;
            return Ok(ReportOutcome::Suspended {
                report_id: report.id,
                critical: true,
            });
        }

        if pending >= self.deps.settings.report_threshold {
            let term = suspension_until(now, self.deps.settings.auto_suspension);
            self.suspend(reported_id, MULTIPLE_REPORTS_REASON, term).await?;
            return Ok(ReportOutcome::Suspended {
                report_id: report.id,
                critical: false,
            });
        }

        self.deps
            .sessions
            .end_session(session.id, EndReason::Reported, Some(reporter_id))
            .await?;
        Ok(ReportOutcome::Filed {
            report_id: report.id,
            pending,
        })
    }

    /// 封禁用户。用户状态先提交，其余步骤尽力而为。
    pub async fn suspend(
        &self,
        user_id: &UserId,
        reason: &str,
        term: SuspensionTerm,
    ) -> Result<User, ApplicationError> {
        let now = self.deps.clock.now();
        // 用户文档中的会话引用会被封禁清空，先从会话记录查出活跃会话
        let active = match self
            .deps
            .repositories
            .sessions
            .find_active_by_participant(user_id)
            .await
        {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(user_id = %user_id, error = %err, "查询活跃会话失败");
                None
            }
        };

        let user = self
            .deps
            .repositories
            .users
            .update_if(
                user_id,
                &|_: &User| true,
                &|u: &mut User| u.suspend(reason, term, now),
            )
            .await?
            .ok_or(ApplicationError::NotFound("user"))?;
        tracing::warn!(user_id = %user_id, reason, term = ?term, "用户已被封禁");

        if let Some(session) = active {
            if let Err(err) = self
                .deps
                .sessions
                .end_session(session.id, EndReason::Moderation, None)
                .await
            {
                tracing::error!(
                    user_id = %user_id,
                    session_id = %session.id,
                    error = %err,
                    "封禁后结束会话失败"
                );
            }
        }
        if let Err(err) = self.deps.pool.dequeue(user_id).await {
            tracing::error!(user_id = %user_id, error = %err, "封禁后移出队列失败");
        }

        self.deps
            .outbox
            .text(user_id, suspension_message(reason, term));
        self.notify(ModerationEvent::UserSuspended {
            user_id: user_id.clone(),
            reason: reason.to_owned(),
            term,
        })
        .await;

        Ok(user)
    }

    pub async fn warn(&self, user_id: &UserId, reason: &str) -> Result<User, ApplicationError> {
        let now = self.deps.clock.now();
        let user = self
            .deps
            .repositories
            .users
            .update_if(user_id, &|_: &User| true, &|u: &mut User| u.warn(reason, now))
            .await?
            .ok_or(ApplicationError::NotFound("user"))?;
        tracing::info!(user_id = %user_id, warnings = user.warnings.len(), "用户收到警告");
        self.deps.outbox.text(
            user_id,
            format!(
                "Warning from the moderators: {reason}. Further violations may get your account suspended."
            ),
        );
        Ok(user)
    }

    async fn notify(&self, event: ModerationEvent) {
        if let Err(err) = self.deps.notifier.notify(event.clone()).await {
            tracing::error!(summary = %event.summary(), error = %err, "审核通知发送失败");
        }
    }
}

pub fn suspension_message(reason: &str, term: SuspensionTerm) -> String {
    match term {
        SuspensionTerm::Permanent => {
            format!("Your account has been permanently suspended. Reason: {reason}.")
        }
        SuspensionTerm::Timed { until } => format!(
            "Your account has been suspended until {}. Reason: {reason}.",
            until.format("%Y-%m-%d %H:%M UTC")
        ),
    }
}
