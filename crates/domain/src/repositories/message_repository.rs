use async_trait::async_trait;

use crate::entities::message::ChatMessage;
use crate::errors::RepositoryResult;
use crate::value_objects::SessionId;

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn append(&self, message: ChatMessage) -> RepositoryResult<()>;

    async fn list_by_session(&self, session_id: SessionId) -> RepositoryResult<Vec<ChatMessage>>;

    /// 返回删除的条数
    async fn delete_by_session(&self, session_id: SessionId) -> RepositoryResult<u64>;
}
