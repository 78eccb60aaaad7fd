use async_trait::async_trait;

use crate::entities::session::ChatSession;
use crate::errors::{RepositoryError, RepositoryResult};
use crate::repositories::MAX_CAS_ATTEMPTS;
use crate::value_objects::{SessionId, UserId};

pub type SessionPredicate<'a> = &'a (dyn Fn(&ChatSession) -> bool + Send + Sync);
pub type SessionPatch<'a> = &'a (dyn Fn(&mut ChatSession) + Send + Sync);

#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// 原子地删除两位参与者的排队记录并创建会话。
    ///
    /// 任一排队记录已不存在（已被其他匹配领取）时不做任何修改并返回 `false`。
    async fn open_claiming_queue(&self, session: &ChatSession) -> RepositoryResult<bool>;

    async fn find_by_id(&self, id: SessionId) -> RepositoryResult<Option<ChatSession>>;

    async fn find_active_by_participant(
        &self,
        user_id: &UserId,
    ) -> RepositoryResult<Option<ChatSession>>;

    /// 按结束时间最近的已结束会话
    async fn latest_ended_by_participant(
        &self,
        user_id: &UserId,
    ) -> RepositoryResult<Option<ChatSession>>;

    async fn compare_and_swap(
        &self,
        session: &ChatSession,
        expected_version: u64,
    ) -> RepositoryResult<bool>;

    async fn delete(&self, id: SessionId) -> RepositoryResult<bool>;

    async fn update_if(
        &self,
        id: SessionId,
        predicate: SessionPredicate<'_>,
        patch: SessionPatch<'_>,
    ) -> RepositoryResult<Option<ChatSession>> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some(mut session) = self.find_by_id(id).await? else {
                return Ok(None);
            };
            if !predicate(&session) {
                return Ok(None);
            }
            let expected = session.version;
            patch(&mut session);
            session.version = expected + 1;
            if self.compare_and_swap(&session, expected).await? {
                return Ok(Some(session));
            }
        }
        Err(RepositoryError::concurrent("session", id))
    }
}
