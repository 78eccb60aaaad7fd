use async_trait::async_trait;

use crate::entities::report::{Report, ReportStatus};
use crate::errors::RepositoryResult;
use crate::repositories::Pagination;
use crate::value_objects::{ReportId, UserId};

#[async_trait]
pub trait ReportRepository: Send + Sync {
    async fn create(&self, report: Report) -> RepositoryResult<Report>;

    async fn find_by_id(&self, id: ReportId) -> RepositoryResult<Option<Report>>;

    /// 仅当存储中的举报仍为 Pending 时写入，返回是否写入
    async fn update_if_pending(&self, report: &Report) -> RepositoryResult<bool>;

    async fn count_pending_against(&self, reported_id: &UserId) -> RepositoryResult<u64>;

    /// 新举报在前
    async fn list(
        &self,
        status: Option<ReportStatus>,
        pagination: Pagination,
    ) -> RepositoryResult<Vec<Report>>;

    async fn count(&self, status: Option<ReportStatus>) -> RepositoryResult<u64>;

    /// 某用户被举报的全部历史，新举报在前
    async fn list_against(&self, reported_id: &UserId) -> RepositoryResult<Vec<Report>>;
}
