//! 用户Repository接口定义

use async_trait::async_trait;

use crate::entities::user::User;
use crate::errors::{RepositoryError, RepositoryResult};
use crate::repositories::MAX_CAS_ATTEMPTS;
use crate::value_objects::UserId;

/// 条件更新的判定函数
pub type UserPredicate<'a> = &'a (dyn Fn(&User) -> bool + Send + Sync);
/// 条件更新的修改函数
pub type UserPatch<'a> = &'a (dyn Fn(&mut User) + Send + Sync);

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// 创建新用户，ID 已存在时返回 `Conflict`
    async fn create(&self, user: User) -> RepositoryResult<User>;

    async fn find_by_id(&self, id: &UserId) -> RepositoryResult<Option<User>>;

    async fn display_name_exists(&self, display_name: &str) -> RepositoryResult<bool>;

    /// 仅当存储中的版本等于 `expected_version` 时写入 `user`
    async fn compare_and_swap(&self, user: &User, expected_version: u64)
        -> RepositoryResult<bool>;

    /// 条件更新：判定不通过返回 `Ok(None)`，版本冲突时重新读取再试
    async fn update_if(
        &self,
        id: &UserId,
        predicate: UserPredicate<'_>,
        patch: UserPatch<'_>,
    ) -> RepositoryResult<Option<User>> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some(mut user) = self.find_by_id(id).await? else {
                return Ok(None);
            };
            if !predicate(&user) {
                return Ok(None);
            }
            let expected = user.version;
            patch(&mut user);
            user.version = expected + 1;
            if self.compare_and_swap(&user, expected).await? {
                return Ok(Some(user));
            }
        }
        Err(RepositoryError::concurrent("user", id))
    }
}
