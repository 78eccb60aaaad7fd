use std::collections::HashSet;
use std::sync::Arc;

use domain::{Interests, QueueEntry, User, UserId, UserRepository, UserStatus};

use crate::error::ApplicationError;
use crate::services::queue_pool::{Candidates, QueuePool};

/// 匹配结果
#[derive(Debug, Clone)]
pub struct MatchCandidate {
    pub partner: User,
    pub entry: QueueEntry,
    /// 共同兴趣主题
    pub theme: Option<String>,
}

/// 为请求者挑选合适的排队用户
pub struct MatchEngine {
    pool: Arc<QueuePool>,
    users: Arc<dyn UserRepository>,
}

impl MatchEngine {
    pub fn new(pool: Arc<QueuePool>, users: Arc<dyn UserRepository>) -> Self {
        Self { pool, users }
    }

    /// 先按共同兴趣找，没有可用候选时再只按语言找。
    ///
    /// 每个候选序列只顺序扫描一遍，屏蔽关系命中的候选原地跳过；
    /// 第一遍已检查过的用户在第二遍中不再检查。
    pub async fn find_match(&self, requester: &User) -> Result<MatchCandidate, ApplicationError> {
        let mut checked = HashSet::new();

        if !requester.interests.is_empty() {
            let candidates = self
                .pool
                .find_candidates(&requester.id, &requester.language, &requester.interests)
                .await?;
            if let Some(found) = self.first_acceptable(requester, candidates, &mut checked).await? {
                return Ok(found);
            }
        }

        let candidates = self
            .pool
            .find_candidates(&requester.id, &requester.language, &Interests::default())
            .await?;
        match self.first_acceptable(requester, candidates, &mut checked).await? {
            Some(found) => Ok(found),
            None => Err(ApplicationError::NoMatch),
        }
    }

    async fn first_acceptable(
        &self,
        requester: &User,
        candidates: Candidates,
        checked: &mut HashSet<UserId>,
    ) -> Result<Option<MatchCandidate>, ApplicationError> {
        for entry in candidates {
            if entry.user_id == requester.id || !checked.insert(entry.user_id.clone()) {
                continue;
            }
            let Some(partner) = self.users.find_by_id(&entry.user_id).await? else {
                tracing::warn!(user_id = %entry.user_id, "排队记录对应的用户不存在，跳过");
                continue;
            };
            if partner.status == UserStatus::Suspended {
                continue;
            }
            if requester.is_blocked_with(&partner) {
                tracing::debug!(
                    requester = %requester.id,
                    candidate = %partner.id,
                    "屏蔽关系，跳过候选"
                );
                continue;
            }
            let theme = requester.interests.first_shared(&partner.interests);
            return Ok(Some(MatchCandidate {
                partner,
                entry,
                theme,
            }));
        }
        Ok(None)
    }
}
