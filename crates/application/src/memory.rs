//! 进程内存储实现
//!
//! 单把读写锁保护全部集合，`open_claiming_queue` 在同一把写锁内完成领取与建会话。
//! 未配置数据库时作为默认存储，也用于测试。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    ChatMessage, ChatSession, Interests, Language, MessageRepository, Pagination, QueueEntry,
    QueueRepository, Report, ReportId, ReportRepository, ReportStatus, RepositoryError,
    RepositoryResult, SessionId, SessionRepository, User, UserId, UserRepository,
};
use tokio::sync::RwLock;

use crate::repository::Repositories;

#[derive(Default)]
struct State {
    users: HashMap<UserId, User>,
    queue: HashMap<UserId, QueueEntry>,
    sessions: HashMap<SessionId, ChatSession>,
    messages: HashMap<SessionId, Vec<ChatMessage>>,
    reports: HashMap<ReportId, Report>,
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟存储故障：之后的所有操作返回 `Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> RepositoryResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::unavailable("in-memory store switched off"));
        }
        Ok(())
    }

    pub fn users(&self) -> Arc<dyn UserRepository> {
        Arc::new(self.clone())
    }

    pub fn repositories(&self) -> Repositories {
        Repositories {
            users: Arc::new(self.clone()),
            queue: Arc::new(self.clone()),
            sessions: Arc::new(self.clone()),
            messages: Arc::new(self.clone()),
            reports: Arc::new(self.clone()),
        }
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn create(&self, user: User) -> RepositoryResult<User> {
        self.check()?;
        let mut state = self.state.write().await;
        if state.users.contains_key(&user.id) {
            return Err(RepositoryError::Conflict);
        }
        state.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: &UserId) -> RepositoryResult<Option<User>> {
        self.check()?;
        Ok(self.state.read().await.users.get(id).cloned())
    }

    async fn display_name_exists(&self, display_name: &str) -> RepositoryResult<bool> {
        self.check()?;
        Ok(self
            .state
            .read()
            .await
            .users
            .values()
            .any(|user| user.display_name == display_name))
    }

    async fn compare_and_swap(&self, user: &User, expected_version: u64) -> RepositoryResult<bool> {
        self.check()?;
        let mut state = self.state.write().await;
        match state.users.get_mut(&user.id) {
            Some(stored) if stored.version == expected_version => {
                *stored = user.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound),
        }
    }
}

#[async_trait]
impl QueueRepository for InMemoryStore {
    async fn insert(&self, entry: QueueEntry) -> RepositoryResult<()> {
        self.check()?;
        let mut state = self.state.write().await;
        if state.queue.contains_key(&entry.user_id) {
            return Err(RepositoryError::Conflict);
        }
        state.queue.insert(entry.user_id.clone(), entry);
        Ok(())
    }

    async fn remove(&self, user_id: &UserId) -> RepositoryResult<bool> {
        self.check()?;
        Ok(self.state.write().await.queue.remove(user_id).is_some())
    }

    async fn find(&self, user_id: &UserId) -> RepositoryResult<Option<QueueEntry>> {
        self.check()?;
        Ok(self.state.read().await.queue.get(user_id).cloned())
    }

    async fn candidates(
        &self,
        exclude: &UserId,
        language: &Language,
        interests: &Interests,
    ) -> RepositoryResult<Vec<QueueEntry>> {
        self.check()?;
        let state = self.state.read().await;
        let mut entries: Vec<QueueEntry> = state
            .queue
            .values()
            .filter(|entry| entry.accepts(exclude, language, interests))
            .cloned()
            .collect();
        entries.sort_by(QueueEntry::candidate_order);
        Ok(entries)
    }

    async fn len(&self) -> RepositoryResult<u64> {
        self.check()?;
        Ok(self.state.read().await.queue.len() as u64)
    }
}

#[async_trait]
impl SessionRepository for InMemoryStore {
    async fn open_claiming_queue(&self, session: &ChatSession) -> RepositoryResult<bool> {
        self.check()?;
        let mut state = self.state.write().await;
        let [first, second] = &session.participants;
        if !state.queue.contains_key(&first.user_id) || !state.queue.contains_key(&second.user_id)
        {
            return Ok(false);
        }
        if state.sessions.contains_key(&session.id) {
            return Err(RepositoryError::Conflict);
        }
        state.queue.remove(&first.user_id);
        state.queue.remove(&second.user_id);
        state.sessions.insert(session.id, session.clone());
        Ok(true)
    }

    async fn find_by_id(&self, id: SessionId) -> RepositoryResult<Option<ChatSession>> {
        self.check()?;
        Ok(self.state.read().await.sessions.get(&id).cloned())
    }

    async fn find_active_by_participant(
        &self,
        user_id: &UserId,
    ) -> RepositoryResult<Option<ChatSession>> {
        self.check()?;
        Ok(self
            .state
            .read()
            .await
            .sessions
            .values()
            .find(|session| session.active && session.has_participant(user_id))
            .cloned())
    }

    async fn latest_ended_by_participant(
        &self,
        user_id: &UserId,
    ) -> RepositoryResult<Option<ChatSession>> {
        self.check()?;
        Ok(self
            .state
            .read()
            .await
            .sessions
            .values()
            .filter(|session| !session.active && session.has_participant(user_id))
            .max_by_key(|session| session.ended_at)
            .cloned())
    }

    async fn compare_and_swap(
        &self,
        session: &ChatSession,
        expected_version: u64,
    ) -> RepositoryResult<bool> {
        self.check()?;
        let mut state = self.state.write().await;
        match state.sessions.get_mut(&session.id) {
            Some(stored) if stored.version == expected_version => {
                *stored = session.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn delete(&self, id: SessionId) -> RepositoryResult<bool> {
        self.check()?;
        Ok(self.state.write().await.sessions.remove(&id).is_some())
    }
}

#[async_trait]
impl MessageRepository for InMemoryStore {
    async fn append(&self, message: ChatMessage) -> RepositoryResult<()> {
        self.check()?;
        self.state
            .write()
            .await
            .messages
            .entry(message.session_id)
            .or_default()
            .push(message);
        Ok(())
    }

    async fn list_by_session(&self, session_id: SessionId) -> RepositoryResult<Vec<ChatMessage>> {
        self.check()?;
        let state = self.state.read().await;
        let mut messages = state.messages.get(&session_id).cloned().unwrap_or_default();
        messages.sort_by_key(|message| message.sequence);
        Ok(messages)
    }

    async fn delete_by_session(&self, session_id: SessionId) -> RepositoryResult<u64> {
        self.check()?;
        Ok(self
            .state
            .write()
            .await
            .messages
            .remove(&session_id)
            .map_or(0, |messages| messages.len() as u64))
    }
}

#[async_trait]
impl ReportRepository for InMemoryStore {
    async fn create(&self, report: Report) -> RepositoryResult<Report> {
        self.check()?;
        let mut state = self.state.write().await;
        if state.reports.contains_key(&report.id) {
            return Err(RepositoryError::Conflict);
        }
        state.reports.insert(report.id, report.clone());
        Ok(report)
    }

    async fn find_by_id(&self, id: ReportId) -> RepositoryResult<Option<Report>> {
        self.check()?;
        Ok(self.state.read().await.reports.get(&id).cloned())
    }

    async fn update_if_pending(&self, report: &Report) -> RepositoryResult<bool> {
        self.check()?;
        let mut state = self.state.write().await;
        match state.reports.get_mut(&report.id) {
            Some(stored) if stored.status == ReportStatus::Pending => {
                *stored = report.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn count_pending_against(&self, reported_id: &UserId) -> RepositoryResult<u64> {
        self.check()?;
        Ok(self
            .state
            .read()
            .await
            .reports
            .values()
            .filter(|r| &r.reported_id == reported_id && r.status == ReportStatus::Pending)
            .count() as u64)
    }

    async fn list(
        &self,
        status: Option<ReportStatus>,
        pagination: Pagination,
    ) -> RepositoryResult<Vec<Report>> {
        self.check()?;
        let state = self.state.read().await;
        let mut reports: Vec<Report> = state
            .reports
            .values()
            .filter(|r| status.map_or(true, |status| r.status == status))
            .cloned()
            .collect();
        reports.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(reports
            .into_iter()
            .skip(pagination.offset() as usize)
            .take(pagination.limit() as usize)
            .collect())
    }

    async fn count(&self, status: Option<ReportStatus>) -> RepositoryResult<u64> {
        self.check()?;
        Ok(self
            .state
            .read()
            .await
            .reports
            .values()
            .filter(|r| status.map_or(true, |status| r.status == status))
            .count() as u64)
    }

    async fn list_against(&self, reported_id: &UserId) -> RepositoryResult<Vec<Report>> {
        self.check()?;
        let state = self.state.read().await;
        let mut reports: Vec<Report> = state
            .reports
            .values()
            .filter(|r| &r.reported_id == reported_id)
            .cloned()
            .collect();
        reports.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use domain::{Participant, Priority};

    fn entry(id: &str, priority: u8, offset: i64) -> QueueEntry {
        QueueEntry {
            user_id: UserId::parse(id).unwrap(),
            interests: Interests::from_tags(["music"]),
            language: Language::default(),
            priority: Priority(priority),
            enqueued_at: Utc::now() + Duration::milliseconds(offset),
        }
    }

    fn participant(id: &str) -> Participant {
        Participant {
            user_id: UserId::parse(id).unwrap(),
            display_name: id.to_uppercase(),
        }
    }

    #[tokio::test]
    async fn queue_rejects_duplicate_entries() {
        let store = InMemoryStore::new();
        store.insert(entry("a", 3, 0)).await.unwrap();
        assert_eq!(
            store.insert(entry("a", 3, 1)).await,
            Err(RepositoryError::Conflict)
        );
        assert_eq!(QueueRepository::len(&store).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn claiming_removes_both_entries_exactly_once() {
        let store = InMemoryStore::new();
        store.insert(entry("a", 3, 0)).await.unwrap();
        store.insert(entry("b", 3, 1)).await.unwrap();

        let session =
            ChatSession::open(participant("a"), participant("b"), None, Utc::now()).unwrap();
        assert!(store.open_claiming_queue(&session).await.unwrap());
        assert_eq!(QueueRepository::len(&store).await.unwrap(), 0);

        let again =
            ChatSession::open(participant("a"), participant("b"), None, Utc::now()).unwrap();
        assert!(!store.open_claiming_queue(&again).await.unwrap());
        assert!(SessionRepository::find_by_id(&store, again.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let store = InMemoryStore::new();
        let user = User::new(UserId::parse("a").unwrap(), "A", Utc::now());
        UserRepository::create(&store, user.clone()).await.unwrap();

        let mut first = user.clone();
        first.version = 1;
        assert!(UserRepository::compare_and_swap(&store, &first, 0).await.unwrap());
        let mut stale = user;
        stale.version = 1;
        assert!(!UserRepository::compare_and_swap(&store, &stale, 0).await.unwrap());
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        let result = UserRepository::find_by_id(&store, &UserId::parse("a").unwrap()).await;
        assert!(matches!(result, Err(RepositoryError::Unavailable { .. })));
    }
}
