use std::sync::Arc;

use domain::{
    ChatSession, Interests, Language, Priority, QueueEntry, QueueRepository, RepositoryError,
    SessionRepository, Timestamp, UserId,
};

use crate::error::ApplicationError;

/// 等待匹配的用户池
pub struct QueuePool {
    queue: Arc<dyn QueueRepository>,
    sessions: Arc<dyn SessionRepository>,
}

/// 候选序列：按优先级降序、入队时间升序逐个产出
pub struct Candidates {
    entries: std::vec::IntoIter<QueueEntry>,
}

impl Iterator for Candidates {
    type Item = QueueEntry;

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }
}

impl QueuePool {
    pub fn new(queue: Arc<dyn QueueRepository>, sessions: Arc<dyn SessionRepository>) -> Self {
        Self { queue, sessions }
    }

    pub async fn enqueue(
        &self,
        user_id: &UserId,
        interests: &Interests,
        language: &Language,
        priority: Priority,
        now: Timestamp,
    ) -> Result<QueueEntry, ApplicationError> {
        let entry = QueueEntry {
            user_id: user_id.clone(),
            interests: interests.clone(),
            language: language.clone(),
            priority,
            enqueued_at: now,
        };
        match self.queue.insert(entry.clone()).await {
            Ok(()) => {
                tracing::debug!(user_id = %user_id, priority = priority.0, "用户进入匹配队列");
                Ok(entry)
            }
            Err(RepositoryError::Conflict) => Err(ApplicationError::AlreadyQueued),
            Err(err) => Err(err.into()),
        }
    }

    /// 移除排队记录，返回是否确实移除
    pub async fn dequeue(&self, user_id: &UserId) -> Result<bool, ApplicationError> {
        let removed = self.queue.remove(user_id).await?;
        if removed {
            tracing::debug!(user_id = %user_id, "用户离开匹配队列");
        }
        Ok(removed)
    }

    pub async fn is_queued(&self, user_id: &UserId) -> Result<bool, ApplicationError> {
        Ok(self.queue.find(user_id).await?.is_some())
    }

    pub async fn find_candidates(
        &self,
        exclude: &UserId,
        language: &Language,
        interest_filter: &Interests,
    ) -> Result<Candidates, ApplicationError> {
        let entries = self
            .queue
            .candidates(exclude, language, interest_filter)
            .await?;
        Ok(Candidates {
            entries: entries.into_iter(),
        })
    }

    /// 领取一对排队记录并创建会话，两者在存储中是同一个原子操作。
    /// 返回 `false` 表示至少一方已被其他匹配领取。
    pub async fn claim_pair(&self, session: &ChatSession) -> Result<bool, ApplicationError> {
        Ok(self.sessions.open_claiming_queue(session).await?)
    }

    pub async fn len(&self) -> Result<u64, ApplicationError> {
        Ok(self.queue.len().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use chrono::{Duration, Utc};

    fn pool(store: &InMemoryStore) -> QueuePool {
        let repos = store.repositories();
        QueuePool::new(repos.queue, repos.sessions)
    }

    fn uid(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    #[tokio::test]
    async fn second_enqueue_is_rejected() {
        let store = InMemoryStore::new();
        let pool = pool(&store);
        let now = Utc::now();
        let lang = Language::default();
        let interests = Interests::default();

        pool.enqueue(&uid("a"), &interests, &lang, Priority(3), now)
            .await
            .unwrap();
        let err = pool
            .enqueue(&uid("a"), &interests, &lang, Priority(3), now)
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::AlreadyQueued));
        assert_eq!(pool.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dequeue_is_a_no_op_when_absent() {
        let store = InMemoryStore::new();
        let pool = pool(&store);
        assert!(!pool.dequeue(&uid("ghost")).await.unwrap());
    }

    #[tokio::test]
    async fn candidates_follow_priority_then_age() {
        let store = InMemoryStore::new();
        let pool = pool(&store);
        let t = Utc::now();
        let lang = Language::default();
        let none = Interests::default();

        pool.enqueue(&uid("low"), &none, &lang, Priority(2), t).await.unwrap();
        pool.enqueue(&uid("late"), &none, &lang, Priority(5), t + Duration::seconds(2))
            .await
            .unwrap();
        pool.enqueue(&uid("early"), &none, &lang, Priority(5), t + Duration::seconds(1))
            .await
            .unwrap();

        let order: Vec<String> = pool
            .find_candidates(&uid("me"), &lang, &none)
            .await
            .unwrap()
            .map(|entry| entry.user_id.to_string())
            .collect();
        assert_eq!(order, vec!["early", "late", "low"]);
    }

    #[tokio::test]
    async fn candidates_filter_language_interests_and_self() {
        let store = InMemoryStore::new();
        let pool = pool(&store);
        let t = Utc::now();
        let en = Language::default();
        let fr = Language::parse("fr").unwrap();
        let music = Interests::from_tags(["music"]);
        let games = Interests::from_tags(["games"]);

        pool.enqueue(&uid("me"), &music, &en, Priority(3), t).await.unwrap();
        pool.enqueue(&uid("french"), &music, &fr, Priority(3), t).await.unwrap();
        pool.enqueue(&uid("gamer"), &games, &en, Priority(3), t).await.unwrap();
        pool.enqueue(&uid("musician"), &music, &en, Priority(3), t).await.unwrap();

        let shared: Vec<String> = pool
            .find_candidates(&uid("me"), &en, &music)
            .await
            .unwrap()
            .map(|entry| entry.user_id.to_string())
            .collect();
        assert_eq!(shared, vec!["musician"]);

        let any = pool
            .find_candidates(&uid("me"), &en, &Interests::default())
            .await
            .unwrap()
            .count();
        assert_eq!(any, 2);
    }
}
