//! PostgreSQL 存储实现
//!
//! 实体整体以 JSONB 文档保存，版本号单独成列用于比较交换；
//! 匹配领取在同一事务内删除两条排队记录并创建会话。

use std::sync::Arc;

use application::Repositories;
use async_trait::async_trait;
use domain::{
    ChatMessage, ChatSession, Interests, Language, MessageRepository, Pagination, QueueEntry,
    QueueRepository, Report, ReportId, ReportRepository, ReportStatus, RepositoryError,
    RepositoryResult, SessionId, SessionRepository, User, UserId, UserRepository,
};
use sqlx::types::Json;
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict,
        // 40P01 死锁 / 40001 串行化失败：事务已回滚，可重试
        sqlx::Error::Database(db)
            if matches!(db.code().as_deref(), Some("40P01") | Some("40001")) =>
        {
            RepositoryError::concurrent("transaction", db.code().unwrap_or_default())
        }
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => RepositoryError::unavailable(err.to_string()),
        _ => RepositoryError::storage(err.to_string()),
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
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

    async fn exists(&self, sql: &str, key: impl ToString) -> RepositoryResult<bool> {
        sqlx::query_scalar::<_, bool>(sql)
            .bind(key.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)
    }

    async fn session_exists(&self, id: SessionId) -> RepositoryResult<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM chat_sessions WHERE id = $1)")
            .bind(Uuid::from(id))
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)
    }

    async fn claim_and_open(&self, session: &ChatSession) -> RepositoryResult<bool> {
        let [first, second] = &session.participants;
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        // 按 user_id 顺序加行锁，交叉领取（a,b）（b,c）（c,a）不会互相死锁
        let locked: Vec<String> = sqlx::query_scalar(
            "SELECT user_id FROM queue_entries WHERE user_id = $1 OR user_id = $2 \
             ORDER BY user_id FOR UPDATE",
        )
        .bind(first.user_id.as_str())
        .bind(second.user_id.as_str())
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;
        if locked.len() != 2 {
            tx.rollback().await.map_err(map_sqlx_err)?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM queue_entries WHERE user_id = $1 OR user_id = $2")
            .bind(first.user_id.as_str())
            .bind(second.user_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        sqlx::query(
            r#"
            INSERT INTO chat_sessions (id, first_user, second_user, active, ended_at, version, doc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::from(session.id))
        .bind(first.user_id.as_str())
        .bind(second.user_id.as_str())
        .bind(session.active)
        .bind(session.ended_at)
        .bind(session.version as i64)
        .bind(Json(session))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(true)
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn create(&self, user: User) -> RepositoryResult<User> {
        sqlx::query(
            r#"
            INSERT INTO users (id, display_name, version, doc, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(user.id.as_str())
        .bind(&user.display_name)
        .bind(user.version as i64)
        .bind(Json(&user))
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(user)
    }

    async fn find_by_id(&self, id: &UserId) -> RepositoryResult<Option<User>> {
        let doc = sqlx::query_scalar::<_, Json<User>>("SELECT doc FROM users WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(doc.map(|Json(user)| user))
    }

    async fn display_name_exists(&self, display_name: &str) -> RepositoryResult<bool> {
        self.exists(
            "SELECT EXISTS(SELECT 1 FROM users WHERE display_name = $1)",
            display_name,
        )
        .await
    }

    async fn compare_and_swap(&self, user: &User, expected_version: u64) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET display_name = $2, version = $3, doc = $4
            WHERE id = $1 AND version = $5
            "#,
        )
        .bind(user.id.as_str())
        .bind(&user.display_name)
        .bind(user.version as i64)
        .bind(Json(user))
        .bind(expected_version as i64)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        if self
            .exists("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)", &user.id)
            .await?
        {
            Ok(false)
        } else {
            Err(RepositoryError::NotFound)
        }
    }
}

#[async_trait]
impl QueueRepository for PgStore {
    async fn insert(&self, entry: QueueEntry) -> RepositoryResult<()> {
        let interests: Vec<String> = entry.interests.iter().cloned().collect();
        sqlx::query(
            r#"
            INSERT INTO queue_entries (user_id, language, interests, priority, enqueued_at, doc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.user_id.as_str())
        .bind(entry.language.as_str())
        .bind(&interests)
        .bind(i16::from(entry.priority.0))
        .bind(entry.enqueued_at)
        .bind(Json(&entry))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn remove(&self, user_id: &UserId) -> RepositoryResult<bool> {
        let result = sqlx::query("DELETE FROM queue_entries WHERE user_id = $1")
            .bind(user_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn find(&self, user_id: &UserId) -> RepositoryResult<Option<QueueEntry>> {
        let doc = sqlx::query_scalar::<_, Json<QueueEntry>>(
            "SELECT doc FROM queue_entries WHERE user_id = $1",
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(doc.map(|Json(entry)| entry))
    }

    async fn candidates(
        &self,
        exclude: &UserId,
        language: &Language,
        interests: &Interests,
    ) -> RepositoryResult<Vec<QueueEntry>> {
        let wanted: Vec<String> = interests.iter().cloned().collect();
        let docs = sqlx::query_scalar::<_, Json<QueueEntry>>(
            r#"
            SELECT doc FROM queue_entries
            WHERE user_id <> $1
              AND language = $2
              AND (cardinality($3::text[]) = 0 OR interests && $3::text[])
            ORDER BY priority DESC, enqueued_at ASC, user_id ASC
            "#,
        )
        .bind(exclude.as_str())
        .bind(language.as_str())
        .bind(&wanted)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(docs.into_iter().map(|Json(entry)| entry).collect())
    }

    async fn len(&self) -> RepositoryResult<u64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM queue_entries")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(count as u64)
    }
}

#[async_trait]
impl SessionRepository for PgStore {
    async fn open_claiming_queue(&self, session: &ChatSession) -> RepositoryResult<bool> {
        match self.claim_and_open(session).await {
            // 被并发领取中止的事务视为本次没领到，由调用方重选候选
            Err(RepositoryError::ConcurrentModification { .. }) => {
                tracing::debug!(session_id = %session.id, "领取事务冲突回滚");
                Ok(false)
            }
            other => other,
        }
    }

    async fn find_by_id(&self, id: SessionId) -> RepositoryResult<Option<ChatSession>> {
        let doc = sqlx::query_scalar::<_, Json<ChatSession>>(
            "SELECT doc FROM chat_sessions WHERE id = $1",
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(doc.map(|Json(session)| session))
    }

    async fn find_active_by_participant(
        &self,
        user_id: &UserId,
    ) -> RepositoryResult<Option<ChatSession>> {
        let doc = sqlx::query_scalar::<_, Json<ChatSession>>(
            r#"
            SELECT doc FROM chat_sessions
            WHERE active AND (first_user = $1 OR second_user = $1)
            LIMIT 1
            "#,
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(doc.map(|Json(session)| session))
    }

    async fn latest_ended_by_participant(
        &self,
        user_id: &UserId,
    ) -> RepositoryResult<Option<ChatSession>> {
        let doc = sqlx::query_scalar::<_, Json<ChatSession>>(
            r#"
            SELECT doc FROM chat_sessions
            WHERE NOT active AND (first_user = $1 OR second_user = $1)
            ORDER BY ended_at DESC NULLS LAST
            LIMIT 1
            "#,
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(doc.map(|Json(session)| session))
    }

    async fn compare_and_swap(
        &self,
        session: &ChatSession,
        expected_version: u64,
    ) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE chat_sessions
            SET active = $2, ended_at = $3, version = $4, doc = $5
            WHERE id = $1 AND version = $6
            "#,
        )
        .bind(Uuid::from(session.id))
        .bind(session.active)
        .bind(session.ended_at)
        .bind(session.version as i64)
        .bind(Json(session))
        .bind(expected_version as i64)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        if self.session_exists(session.id).await? {
            Ok(false)
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    async fn delete(&self, id: SessionId) -> RepositoryResult<bool> {
        let result = sqlx::query("DELETE FROM chat_sessions WHERE id = $1")
            .bind(Uuid::from(id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl MessageRepository for PgStore {
    async fn append(&self, message: ChatMessage) -> RepositoryResult<()> {
        sqlx::query("INSERT INTO chat_messages (session_id, sequence, doc) VALUES ($1, $2, $3)")
            .bind(Uuid::from(message.session_id))
            .bind(message.sequence as i64)
            .bind(Json(&message))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn list_by_session(&self, session_id: SessionId) -> RepositoryResult<Vec<ChatMessage>> {
        let docs = sqlx::query_scalar::<_, Json<ChatMessage>>(
            "SELECT doc FROM chat_messages WHERE session_id = $1 ORDER BY sequence ASC, id ASC",
        )
        .bind(Uuid::from(session_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(docs.into_iter().map(|Json(message)| message).collect())
    }

    async fn delete_by_session(&self, session_id: SessionId) -> RepositoryResult<u64> {
        let result = sqlx::query("DELETE FROM chat_messages WHERE session_id = $1")
            .bind(Uuid::from(session_id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ReportRepository for PgStore {
    async fn create(&self, report: Report) -> RepositoryResult<Report> {
        sqlx::query(
            r#"
            INSERT INTO reports (id, reported_id, status, created_at, doc)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::from(report.id))
        .bind(report.reported_id.as_str())
        .bind(report.status.as_str())
        .bind(report.created_at)
        .bind(Json(&report))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(report)
    }

    async fn find_by_id(&self, id: ReportId) -> RepositoryResult<Option<Report>> {
        let doc = sqlx::query_scalar::<_, Json<Report>>("SELECT doc FROM reports WHERE id = $1")
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(doc.map(|Json(report)| report))
    }

    async fn update_if_pending(&self, report: &Report) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE reports SET status = $2, doc = $3
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(Uuid::from(report.id))
        .bind(report.status.as_str())
        .bind(Json(report))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM reports WHERE id = $1)")
                .bind(Uuid::from(report.id))
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_err)?;
        if exists {
            Ok(false)
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    async fn count_pending_against(&self, reported_id: &UserId) -> RepositoryResult<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM reports WHERE reported_id = $1 AND status = 'pending'",
        )
        .bind(reported_id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(count as u64)
    }

    async fn list(
        &self,
        status: Option<ReportStatus>,
        pagination: Pagination,
    ) -> RepositoryResult<Vec<Report>> {
        let docs = sqlx::query_scalar::<_, Json<Report>>(
            r#"
            SELECT doc FROM reports
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(status.map(ReportStatus::as_str))
        .bind(pagination.limit() as i64)
        .bind(pagination.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(docs.into_iter().map(|Json(report)| report).collect())
    }

    async fn count(&self, status: Option<ReportStatus>) -> RepositoryResult<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM reports WHERE ($1::text IS NULL OR status = $1)",
        )
        .bind(status.map(ReportStatus::as_str))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(count as u64)
    }

    async fn list_against(&self, reported_id: &UserId) -> RepositoryResult<Vec<Report>> {
        let docs = sqlx::query_scalar::<_, Json<Report>>(
            "SELECT doc FROM reports WHERE reported_id = $1 ORDER BY created_at DESC",
        )
        .bind(reported_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(docs.into_iter().map(|Json(report)| report).collect())
    }
}
