use std::sync::Arc;

use domain::{Interests, Language, RepositoryError, User, UserId, UserRepository, UserStatus};

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::pseudonym;

/// 用户档案：首次接触时建档、兴趣/语言设置、封禁准入
pub struct UserDirectory {
    users: Arc<dyn UserRepository>,
    clock: Arc<dyn Clock>,
}

impl UserDirectory {
    pub fn new(users: Arc<dyn UserRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { users, clock }
    }

    /// 查找用户，不存在时以生成的匿名昵称建档。
    ///
    /// 存储不可用时返回不落库的临时用户，保证对话流程不被阻断。
    pub async fn ensure_user(&self, user_id: &UserId) -> Result<User, ApplicationError> {
        match self.find_or_create(user_id).await {
            Ok(user) => Ok(user),
            Err(err) if err.is_unavailable() => {
                tracing::warn!(user_id = %user_id, error = %err, "存储不可用，使用临时用户");
                Ok(User::ephemeral(
                    user_id.clone(),
                    pseudonym::candidate(user_id, 0),
                    self.clock.now(),
                ))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn find_or_create(&self, user_id: &UserId) -> Result<User, RepositoryError> {
        if let Some(user) = self.users.find_by_id(user_id).await? {
            return Ok(user);
        }
        let display_name = pseudonym::generate_unique(self.users.as_ref(), user_id).await?;
        match self
            .users
            .create(User::new(user_id.clone(), display_name, self.clock.now()))
            .await
        {
            Ok(user) => {
                tracing::info!(user_id = %user.id, display_name = %user.display_name, "新用户建档");
                Ok(user)
            }
            // 并发的首次请求已经建档
            Err(RepositoryError::Conflict) => self
                .users
                .find_by_id(user_id)
                .await?
                .ok_or(RepositoryError::NotFound),
            Err(err) => Err(err),
        }
    }

    /// 放行未封禁的用户；到期的封禁在此解除
    pub async fn admit(&self, user: User) -> Result<User, ApplicationError> {
        if user.status != UserStatus::Suspended {
            return Ok(user);
        }
        let now = self.clock.now();
        if user.is_suspended(now) {
            let reason = user
                .suspension
                .as_ref()
                .map(|s| s.reason.clone())
                .unwrap_or_default();
            return Err(ApplicationError::Suspended { reason });
        }
        if user.ephemeral {
            return Ok(user);
        }

        let lifted = self
            .users
            .update_if(
                &user.id,
                &|u: &User| u.status == UserStatus::Suspended && !u.is_suspended(now),
                &|u: &mut User| u.lift_suspension(now),
            )
            .await?;
        match lifted {
            Some(user) => {
                tracing::info!(user_id = %user.id, "封禁到期，自动解除");
                Ok(user)
            }
            // 状态已被别处改变，以最新记录为准
            None => match self.users.find_by_id(&user.id).await? {
                Some(current) if current.is_suspended(now) => Err(ApplicationError::Suspended {
                    reason: current
                        .suspension
                        .map(|s| s.reason)
                        .unwrap_or_default(),
                }),
                Some(current) => Ok(current),
                None => Err(ApplicationError::NotFound("user")),
            },
        }
    }

    pub async fn set_interests(
        &self,
        user_id: &UserId,
        interests: Interests,
    ) -> Result<User, ApplicationError> {
        let now = self.clock.now();
        self.users
            .update_if(
                user_id,
                &|_: &User| true,
                &|u: &mut User| {
                    u.interests = interests.clone();
                    u.updated_at = now;
                },
            )
            .await?
            .ok_or(ApplicationError::NotFound("user"))
    }

    pub async fn set_language(
        &self,
        user_id: &UserId,
        language: Language,
    ) -> Result<User, ApplicationError> {
        let now = self.clock.now();
        self.users
            .update_if(
                user_id,
                &|_: &User| true,
                &|u: &mut User| {
                    u.language = language.clone();
                    u.updated_at = now;
                },
            )
            .await?
            .ok_or(ApplicationError::NotFound("user"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::InMemoryStore;
    use chrono::{Duration, Utc};
    use domain::{suspension_until, SuspensionTerm};

    fn directory(store: &InMemoryStore) -> (UserDirectory, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (UserDirectory::new(store.users(), clock.clone()), clock)
    }

    #[tokio::test]
    async fn first_contact_creates_a_pseudonymous_user() {
        let store = InMemoryStore::new();
        let (directory, _) = directory(&store);
        let id = UserId::parse("psid-1").unwrap();

        let created = directory.ensure_user(&id).await.unwrap();
        assert!(!created.ephemeral);
        assert_eq!(created.display_name.split(' ').count(), 3);

        let again = directory.ensure_user(&id).await.unwrap();
        assert_eq!(again.display_name, created.display_name);
    }

    #[tokio::test]
    async fn unavailable_store_yields_ephemeral_user() {
        let store = InMemoryStore::new();
        let (directory, _) = directory(&store);
        store.set_unavailable(true);

        let user = directory
            .ensure_user(&UserId::parse("psid-2").unwrap())
            .await
            .unwrap();
        assert!(user.ephemeral);
        assert_eq!(user.status, UserStatus::Online);
    }

    #[tokio::test]
    async fn expired_suspension_is_lifted_on_admission() {
        let store = InMemoryStore::new();
        let (directory, clock) = directory(&store);
        let id = UserId::parse("psid-3").unwrap();
        directory.ensure_user(&id).await.unwrap();

        let term = suspension_until(clock.now(), Duration::hours(1));
        let suspended = store
            .users()
            .update_if(&id, &|_: &User| true, &|u: &mut User| {
                u.suspend("spam", term, Utc::now())
            })
            .await
            .unwrap()
            .unwrap();

        let err = directory.admit(suspended.clone()).await.unwrap_err();
        assert!(matches!(err, ApplicationError::Suspended { .. }));

        clock.advance(Duration::hours(2));
        let admitted = directory.admit(suspended).await.unwrap();
        assert_eq!(admitted.status, UserStatus::Online);
        assert!(admitted.suspension.is_none());
    }

    #[tokio::test]
    async fn permanent_suspension_never_expires() {
        let store = InMemoryStore::new();
        let (directory, clock) = directory(&store);
        let id = UserId::parse("psid-4").unwrap();
        directory.ensure_user(&id).await.unwrap();
        let suspended = store
            .users()
            .update_if(&id, &|_: &User| true, &|u: &mut User| {
                u.suspend("threats", SuspensionTerm::Permanent, Utc::now())
            })
            .await
            .unwrap()
            .unwrap();

        clock.advance(Duration::days(3650));
        assert!(directory.admit(suspended).await.is_err());
    }
}
