//! 运营后台用例：举报列表、举报详情、人工处理

use std::sync::Arc;

use domain::{
    suspension_until, EndReason, ModerationAction, PaginatedResult, Pagination, Report, ReportId,
    ReportStatus, Suspension, SuspensionTerm, User, UserId, UserStatus,
};
use serde::Serialize;

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::repository::Repositories;
use crate::services::moderation::ModerationGate;
use crate::services::session_manager::SessionManager;

/// 后台展示用的用户摘要
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserSummary {
    pub id: UserId,
    pub display_name: String,
    pub status: UserStatus,
    pub rating_average: f64,
    pub rating_count: u32,
    pub total_sessions: u64,
    pub messages_sent: u64,
    pub warnings: usize,
    pub suspension: Option<Suspension>,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            display_name: user.display_name.clone(),
            status: user.status,
            rating_average: user.rating.average,
            rating_count: user.rating.count,
            total_sessions: user.total_sessions,
            messages_sent: user.messages_sent,
            warnings: user.warnings.len(),
            suspension: user.suspension.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportDetail {
    pub report: Report,
    pub reporter: Option<UserSummary>,
    pub reported: Option<UserSummary>,
    /// 被举报人的其他举报，新的在前
    pub reported_history: Vec<Report>,
}

pub struct AdminService {
    repositories: Repositories,
    moderation: Arc<ModerationGate>,
    sessions: Arc<SessionManager>,
    clock: Arc<dyn Clock>,
}

impl AdminService {
    pub fn new(
        repositories: Repositories,
        moderation: Arc<ModerationGate>,
        sessions: Arc<SessionManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repositories,
            moderation,
            sessions,
            clock,
        }
    }

    pub async fn list_reports(
        &self,
        status: Option<ReportStatus>,
        pagination: Pagination,
    ) -> Result<PaginatedResult<Report>, ApplicationError> {
        let reports = &self.repositories.reports;
        let items = reports.list(status, pagination).await?;
        let total = reports.count(status).await?;
        Ok(PaginatedResult::new(items, total, pagination))
    }

    pub async fn report_detail(&self, id: ReportId) -> Result<ReportDetail, ApplicationError> {
        let report = self
            .repositories
            .reports
            .find_by_id(id)
            .await?
            .ok_or(ApplicationError::NotFound("report"))?;

        let users = &self.repositories.users;
        let reporter = users.find_by_id(&report.reporter_id).await?;
        let reported = users.find_by_id(&report.reported_id).await?;
        let reported_history = self
            .repositories
            .reports
            .list_against(&report.reported_id)
            .await?
            .into_iter()
            .filter(|other| other.id != report.id)
            .collect();

        Ok(ReportDetail {
            reporter: reporter.as_ref().map(UserSummary::from),
            reported: reported.as_ref().map(UserSummary::from),
            reported_history,
            report,
        })
    }

    /// 人工处理举报。举报先被标记为已处理，保证同一举报只执行一次动作。
    pub async fn take_action(
        &self,
        id: ReportId,
        action: ModerationAction,
        reviewer: &str,
    ) -> Result<Report, ApplicationError> {
        let reviewer = reviewer.trim();
        if reviewer.is_empty() {
            return Err(ApplicationError::not_authorized("reviewer is required"));
        }
        let now = self.clock.now();
        let mut report = self
            .repositories
            .reports
            .find_by_id(id)
            .await?
            .ok_or(ApplicationError::NotFound("report"))?;
        report.resolve(action, reviewer, now)?;
        if !self.repositories.reports.update_if_pending(&report).await? {
            return Err(ApplicationError::not_authorized("report already resolved"));
        }

        tracing::info!(
            report_id = %report.id,
            reported = %report.reported_id,
            action = ?action,
            reviewer,
            "举报已人工处理"
        );

        match action {
            ModerationAction::Warn => {
                self.moderation
                    .warn(&report.reported_id, &report.reason)
                    .await?;
            }
            ModerationAction::Block { .. } => {
                let term = match action.block_duration() {
                    Some(duration) => suspension_until(now, duration),
                    None => SuspensionTerm::Permanent,
                };
                self.moderation
                    .suspend(&report.reported_id, &report.reason, term)
                    .await?;
            }
            ModerationAction::Dismiss => {}
            ModerationAction::DeleteSession => {
                if let Some(session_id) = report.session_id {
                    self.delete_session(session_id).await?;
                }
            }
        }
        Ok(report)
    }

    async fn delete_session(&self, session_id: domain::SessionId) -> Result<(), ApplicationError> {
        self.sessions
            .end_session(session_id, EndReason::Moderation, None)
            .await?;
        let messages = self
            .repositories
            .messages
            .delete_by_session(session_id)
            .await?;
        let deleted = self.repositories.sessions.delete(session_id).await?;
        self.sessions.cancel_follow_ups(session_id);
        tracing::info!(session_id = %session_id, messages, deleted, "会话记录已删除");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestHarness;
    use domain::{MessageRepository, ReportStatus, SessionRepository};

    async fn reported_pair(h: &TestHarness, reporter: &str, reported: &str) -> (UserId, UserId) {
        let reporter = h.user(reporter).await;
        let reported = h.user(reported).await;
        h.pair(&reported, &reporter).await;
        h.services
            .moderation
            .file_report(&reporter, &reported, "spam links")
            .await
            .unwrap();
        (reporter, reported)
    }

    async fn first_report(h: &TestHarness) -> Report {
        h.services
            .admin
            .list_reports(None, Pagination::default())
            .await
            .unwrap()
            .items
            .remove(0)
    }

    #[tokio::test]
    async fn lists_reports_with_status_filter_and_total() {
        let h = TestHarness::new();
        reported_pair(&h, "a", "b").await;
        reported_pair(&h, "c", "d").await;

        let page = h
            .services
            .admin
            .list_reports(Some(ReportStatus::Pending), Pagination::new(1, 1))
            .await
            .unwrap();
        assert_eq!(page.total_count, 2);
        assert_eq!(page.items.len(), 1);
        assert!(page.has_next);

        let resolved = h
            .services
            .admin
            .list_reports(Some(ReportStatus::Resolved), Pagination::default())
            .await
            .unwrap();
        assert_eq!(resolved.total_count, 0);
    }

    #[tokio::test]
    async fn detail_includes_users_and_history() {
        let h = TestHarness::new();
        let (reporter, reported) = reported_pair(&h, "a", "troll").await;
        let other = h.user("other").await;
        h.pair(&reported, &other).await;
        h.clock.advance(chrono::Duration::seconds(1));
        h.services
            .moderation
            .file_report(&other, &reported, "rude")
            .await
            .unwrap();

        let latest = first_report(&h).await;
        let detail = h.services.admin.report_detail(latest.id).await.unwrap();
        assert_eq!(detail.reported.as_ref().map(|u| &u.id), Some(&reported));
        assert_eq!(detail.reporter.as_ref().map(|u| &u.id), Some(&other));
        assert_eq!(detail.reported.unwrap().total_sessions, 2);
        assert_eq!(detail.reported_history.len(), 1);
        assert_eq!(detail.reported_history[0].reporter_id, reporter);
    }

    #[tokio::test]
    async fn unknown_report_is_not_found() {
        let h = TestHarness::new();
        assert!(matches!(
            h.services.admin.report_detail(ReportId::new()).await,
            Err(ApplicationError::NotFound("report"))
        ));
    }

    #[tokio::test]
    async fn dismiss_resolves_without_suspending() {
        let h = TestHarness::new();
        let (_, reported) = reported_pair(&h, "a", "b").await;
        let report = first_report(&h).await;

        let resolved = h
            .services
            .admin
            .take_action(report.id, ModerationAction::Dismiss, "mod-1")
            .await
            .unwrap();
        assert_eq!(resolved.status, ReportStatus::Resolved);
        assert_eq!(resolved.resolution.unwrap().reviewer, "mod-1");
        assert_eq!(h.load(&reported).await.status, UserStatus::Online);

        let again = h
            .services
            .admin
            .take_action(report.id, ModerationAction::Warn, "mod-2")
            .await;
        assert!(again.is_err());
        assert!(h.load(&reported).await.warnings.is_empty());
    }

    #[tokio::test]
    async fn timed_block_suspends_for_the_given_hours() {
        let h = TestHarness::new();
        let (_, reported) = reported_pair(&h, "a", "b").await;
        let report = first_report(&h).await;

        h.services
            .admin
            .take_action(
                report.id,
                ModerationAction::Block {
                    duration_hours: Some(48),
                },
                "mod-1",
            )
            .await
            .unwrap();

        let user = h.load(&reported).await;
        assert_eq!(user.status, UserStatus::Suspended);
        match user.suspension.unwrap().term {
            SuspensionTerm::Timed { until } => {
                assert_eq!(until - report.created_at, chrono::Duration::hours(48));
            }
            SuspensionTerm::Permanent => panic!("expected a timed block"),
        }
    }

    #[tokio::test]
    async fn warn_records_a_warning() {
        let h = TestHarness::new();
        let (_, reported) = reported_pair(&h, "a", "b").await;
        let report = first_report(&h).await;

        h.services
            .admin
            .take_action(report.id, ModerationAction::Warn, "mod-1")
            .await
            .unwrap();
        let user = h.load(&reported).await;
        assert_eq!(user.warnings.len(), 1);
        assert_eq!(user.status, UserStatus::Online);
    }

    #[tokio::test]
    async fn delete_session_removes_session_and_messages() {
        let h = TestHarness::new();
        let reporter = h.user("a").await;
        let reported = h.user("b").await;
        let session_id = h.pair(&reported, &reporter).await;
        h.services.sessions.relay(&reported, "buy stuff").await.unwrap();
        h.services
            .moderation
            .file_report(&reporter, &reported, "spam links")
            .await
            .unwrap();
        let report = first_report(&h).await;
        for id in [&reporter, &reported] {
            assert_eq!(h.services.scheduler.pending_for(id), Some(session_id));
        }

        h.services
            .admin
            .take_action(report.id, ModerationAction::DeleteSession, "mod-1")
            .await
            .unwrap();

        let repos = h.store.repositories();
        assert!(repos.sessions.find_by_id(session_id).await.unwrap().is_none());
        for id in [&reporter, &reported] {
            assert!(h.services.scheduler.pending_for(id).is_none());
        }
        assert!(repos
            .messages
            .list_by_session(session_id)
            .await
            .unwrap()
            .is_empty());
    }
}
