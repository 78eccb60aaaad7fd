use async_trait::async_trait;

use crate::entities::queue_entry::QueueEntry;
use crate::errors::RepositoryResult;
use crate::value_objects::{Interests, Language, UserId};

/// 匹配队列存储。每个用户最多一条记录。
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// 插入排队记录，已存在时返回 `Conflict`
    async fn insert(&self, entry: QueueEntry) -> RepositoryResult<()>;

    /// 删除排队记录，返回是否确实删除了一条
    async fn remove(&self, user_id: &UserId) -> RepositoryResult<bool>;

    async fn find(&self, user_id: &UserId) -> RepositoryResult<Option<QueueEntry>>;

    /// 候选快照：排除 `exclude`，语言相同，`interests` 非空时要求至少一个共同兴趣；
    /// 按优先级降序、入队时间升序排列
    async fn candidates(
        &self,
        exclude: &UserId,
        language: &Language,
        interests: &Interests,
    ) -> RepositoryResult<Vec<QueueEntry>>;

    async fn len(&self) -> RepositoryResult<u64>;
}
