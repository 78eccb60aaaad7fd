//! 会话生命周期：排队 -> 配对 -> 聊天 -> 结束 -> 评分
//!
//! 用户状态机 `Idle -> Waiting -> Chatting -> Idle`。会话记录是“谁和谁在聊”的唯一依据，
//! 用户文档上的 `current_session` 是随会话创建/结束同步维护的引用。

use std::sync::Arc;
use std::time::Duration;

use config::{MatchingConfig, SessionConfig};
use domain::{
    ChatMessage, ChatSession, EndReason, Participant, Rating, SessionId, User, UserId, UserStatus,
};

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::outbox::Outbox;
use crate::repository::Repositories;
use crate::scheduler::FollowUpScheduler;
use crate::services::match_engine::MatchEngine;
use crate::services::queue_pool::QueuePool;
use crate::services::user_directory::UserDirectory;

pub const RATING_OPTIONS: [&str; 5] = ["rate 1", "rate 2", "rate 3", "rate 4", "rate 5"];

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// 会话结束后可以评分的时间窗口
    pub rating_window: chrono::Duration,
    pub follow_up_delay: Duration,
    /// 匹配领取冲突时的最大尝试次数
    pub claim_attempts: u32,
}

impl SessionSettings {
    pub fn from_config(session: &SessionConfig, matching: &MatchingConfig) -> Self {
        Self {
            rating_window: chrono::Duration::seconds(session.rating_window_secs as i64),
            follow_up_delay: session.follow_up_delay(),
            claim_attempts: matching.claim_attempts.max(1),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default(), &MatchingConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    Matched {
        session_id: SessionId,
        partner_name: String,
        theme: Option<String>,
    },
    /// 已进入队列，暂无可用伙伴
    Waiting,
}

/// 会话结束摘要
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub reason: EndReason,
    pub duration_secs: i64,
    pub message_count: u64,
}

impl SessionSummary {
    fn of(session: &ChatSession) -> Self {
        Self {
            session_id: session.id,
            reason: session.end_reason.unwrap_or(EndReason::Stop),
            duration_secs: session.duration_seconds(),
            message_count: session.message_count,
        }
    }

    pub fn describe(&self) -> String {
        let minutes = self.duration_secs / 60;
        let seconds = self.duration_secs % 60;
        format!(
            "Chat lasted {minutes}m {seconds}s with {} message{}.",
            self.message_count,
            if self.message_count == 1 { "" } else { "s" }
        )
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StopOutcome {
    LeftQueue,
    Ended(SessionSummary),
}

pub struct SessionManagerDependencies {
    pub repositories: Repositories,
    pub directory: Arc<UserDirectory>,
    pub pool: Arc<QueuePool>,
    pub engine: Arc<MatchEngine>,
    pub outbox: Outbox,
    pub scheduler: Arc<FollowUpScheduler>,
    pub clock: Arc<dyn Clock>,
    pub settings: SessionSettings,
}

pub struct SessionManager {
    deps: SessionManagerDependencies,
}

impl SessionManager {
    pub fn new(deps: SessionManagerDependencies) -> Self {
        Self { deps }
    }

    async fn load_user(&self, user_id: &UserId) -> Result<User, ApplicationError> {
        self.deps
            .repositories
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(ApplicationError::NotFound("user"))
    }

    /// 用户当前所在的活跃会话。用户文档可能滞后于会话记录，所以以会话记录为准。
    pub async fn active_session_of(
        &self,
        user: &User,
    ) -> Result<Option<ChatSession>, ApplicationError> {
        if let Some(session_id) = user.current_session {
            if let Some(session) = self.deps.repositories.sessions.find_by_id(session_id).await? {
                if session.active && session.has_participant(&user.id) {
                    return Ok(Some(session));
                }
            }
        }
        Ok(self
            .deps
            .repositories
            .sessions
            .find_active_by_participant(&user.id)
            .await?)
    }

    pub async fn start(&self, user_id: &UserId) -> Result<StartOutcome, ApplicationError> {
        let user = self
            .deps
            .directory
            .admit(self.load_user(user_id).await?)
            .await?;
        let now = self.deps.clock.now();

        match user.status {
            UserStatus::Chatting => {
                if self.active_session_of(&user).await?.is_some() {
                    return Err(ApplicationError::AlreadyChatting);
                }
            }
            UserStatus::Waiting => {
                if self.deps.pool.is_queued(&user.id).await? {
                    return Err(ApplicationError::AlreadyQueued);
                }
                // 记录已被领取但会话尚未激活：返回那次配对，不能再次入队
                if let Some(outcome) = self.matched_elsewhere(&user).await? {
                    return Ok(outcome);
                }
            }
            _ => {}
        }

        let waiting = self
            .deps
            .repositories
            .users
            .update_if(
                &user.id,
                &|u: &User| u.status != UserStatus::Suspended,
                &|u: &mut User| {
                    u.current_session = None;
                    u.enter_queue(now);
                },
            )
            .await?
            .ok_or_else(|| ApplicationError::Suspended {
                reason: "account suspended".into(),
            })?;

        self.deps.scheduler.cancel_user(&waiting.id);

        match self
            .deps
            .pool
            .enqueue(
                &waiting.id,
                &waiting.interests,
                &waiting.language,
                waiting.priority(),
                now,
            )
            .await
        {
            Ok(_) | Err(ApplicationError::AlreadyQueued) => {}
            Err(err) => {
                self.reset_to_idle(&waiting.id).await;
                return Err(err);
            }
        }

        tracing::info!(user_id = %waiting.id, "用户开始寻找聊天伙伴");

        match self.try_match(&waiting).await? {
            Some(outcome) => Ok(outcome),
            None => Ok(StartOutcome::Waiting),
        }
    }

    /// 反复尝试领取候选，直到成功或扫描不到候选。
    ///
    /// 候选已被别人领走的失败意味着队列里又成了一对，不计入次数；
    /// 双方记录都还在的失败（存储层冲突）最多重试 `claim_attempts` 次。
    async fn try_match(&self, requester: &User) -> Result<Option<StartOutcome>, ApplicationError> {
        let mut conflicts = 0;
        loop {
            let candidate = match self.deps.engine.find_match(requester).await {
                Ok(candidate) => candidate,
                Err(ApplicationError::NoMatch) => {
                    return self.matched_elsewhere(requester).await;
                }
                Err(err) => return Err(err),
            };

            let now = self.deps.clock.now();
            let session = ChatSession::open(
                Participant {
                    user_id: requester.id.clone(),
                    display_name: requester.display_name.clone(),
                },
                Participant {
                    user_id: candidate.partner.id.clone(),
                    display_name: candidate.partner.display_name.clone(),
                },
                candidate.theme.clone(),
                now,
            )?;

            if self.deps.pool.claim_pair(&session).await? {
                self.activate(&session).await?;
                return Ok(Some(StartOutcome::Matched {
                    session_id: session.id,
                    partner_name: candidate.partner.display_name,
                    theme: candidate.theme,
                }));
            }

            // 请求者自己的记录不在了：已被别人配对，或已离开队列
            if !self.deps.pool.is_queued(&requester.id).await? {
                return self.matched_elsewhere(requester).await;
            }

            if self.deps.pool.is_queued(&candidate.partner.id).await? {
                conflicts += 1;
                if conflicts >= self.deps.settings.claim_attempts {
                    tracing::info!(user_id = %requester.id, conflicts, "多次领取冲突，继续排队等待");
                    return Ok(None);
                }
            }
            tracing::debug!(
                user_id = %requester.id,
                candidate = %candidate.partner.id,
                conflicts,
                "匹配领取冲突，重新选择候选"
            );
        }
    }

    /// 请求者的排队记录已不在时，说明已被其他请求配对
    async fn matched_elsewhere(
        &self,
        requester: &User,
    ) -> Result<Option<StartOutcome>, ApplicationError> {
        if self.deps.pool.is_queued(&requester.id).await? {
            return Ok(None);
        }
        let session = self
            .deps
            .repositories
            .sessions
            .find_active_by_participant(&requester.id)
            .await?;
        Ok(session.and_then(|session| {
            let partner = session.partner_of(&requester.id)?.clone();
            Some(StartOutcome::Matched {
                session_id: session.id,
                partner_name: partner.display_name,
                theme: session.theme.clone(),
            })
        }))
    }

    /// 会话已创建：两位参与者进入聊天状态并收到通知
    async fn activate(&self, session: &ChatSession) -> Result<(), ApplicationError> {
        let now = self.deps.clock.now();
        let session_id = session.id;
        let mut suspended_participant = false;

        for participant in &session.participants {
            let joined = self
                .deps
                .repositories
                .users
                .update_if(
                    &participant.user_id,
                    &|u: &User| u.status != UserStatus::Suspended,
                    &|u: &mut User| u.join_session(session_id, now),
                )
                .await?;
            if joined.is_none() {
                suspended_participant = true;
            }
            self.deps.scheduler.cancel_user(&participant.user_id);
        }

        tracing::info!(
            session_id = %session.id,
            first = %session.participants[0].user_id,
            second = %session.participants[1].user_id,
            theme = ?session.theme,
            "配对成功，会话开始"
        );

        // 激活期间会话可能已被结束（例如一方在被领取后立即 stop），此时撤销加入
        let still_active = self
            .deps
            .repositories
            .sessions
            .find_by_id(session_id)
            .await?
            .is_some_and(|current| current.active);
        if !still_active {
            for participant in &session.participants {
                if let Err(err) = self
                    .deps
                    .repositories
                    .users
                    .update_if(
                        &participant.user_id,
                        &|u: &User| u.current_session == Some(session_id),
                        &|u: &mut User| u.go_idle(now),
                    )
                    .await
                {
                    tracing::warn!(user_id = %participant.user_id, error = %err, "撤销会话加入失败");
                }
            }
            tracing::info!(session_id = %session_id, "会话在激活完成前已结束");
            return Ok(());
        }

        if suspended_participant {
            // 配对期间有一方被封禁：立即结束
            self.end_session(session.id, EndReason::Moderation, None).await?;
            return Ok(());
        }

        for participant in &session.participants {
            let Some(partner) = session.partner_of(&participant.user_id) else {
                continue;
            };
            let mut text = format!("You're now chatting with {}.", partner.display_name);
            if let Some(theme) = &session.theme {
                text.push_str(&format!(" You both like {theme}."));
            }
            text.push_str(" Say hi! Send \"stop\" to end or \"next\" for someone new.");
            self.deps.outbox.text(&participant.user_id, text);
        }
        Ok(())
    }

    async fn reset_to_idle(&self, user_id: &UserId) {
        let now = self.deps.clock.now();
        if let Err(err) = self
            .deps
            .repositories
            .users
            .update_if(
                user_id,
                &|u: &User| u.status == UserStatus::Waiting,
                &|u: &mut User| u.go_idle(now),
            )
            .await
        {
            tracing::warn!(user_id = %user_id, error = %err, "恢复空闲状态失败");
        }
    }

    pub async fn stop(&self, user_id: &UserId) -> Result<StopOutcome, ApplicationError> {
        let user = self.load_user(user_id).await?;

        if user.status == UserStatus::Waiting && self.deps.pool.dequeue(&user.id).await? {
            self.reset_to_idle(&user.id).await;
            tracing::info!(user_id = %user.id, "用户取消排队");
            return Ok(StopOutcome::LeftQueue);
        }

        match self.active_session_of(&user).await? {
            Some(session) => self
                .end_session(session.id, EndReason::Stop, Some(&user.id))
                .await?
                .map(StopOutcome::Ended)
                .ok_or(ApplicationError::NoActiveSession),
            None if user.status == UserStatus::Waiting => {
                // 排队记录已丢失又没有会话：修复为空闲
                self.reset_to_idle(&user.id).await;
                Ok(StopOutcome::LeftQueue)
            }
            None => Err(ApplicationError::NoActiveSession),
        }
    }

    /// 结束当前会话（如有），然后只为发起者重新开始匹配
    pub async fn next(&self, user_id: &UserId) -> Result<StartOutcome, ApplicationError> {
        let user = self.load_user(user_id).await?;
        if let Some(session) = self.active_session_of(&user).await? {
            self.end_session(session.id, EndReason::Next, Some(&user.id))
                .await?;
        } else if user.status == UserStatus::Waiting && self.deps.pool.is_queued(&user.id).await? {
            return Ok(StartOutcome::Waiting);
        }
        self.start(user_id).await
    }

    /// 屏蔽当前伙伴并结束会话；之后两人不会再被配对
    pub async fn block(&self, user_id: &UserId) -> Result<SessionSummary, ApplicationError> {
        let user = self.load_user(user_id).await?;
        let session = self
            .active_session_of(&user)
            .await?
            .ok_or(ApplicationError::NoActiveSession)?;
        let partner = session
            .partner_of(&user.id)
            .ok_or(ApplicationError::NoActiveSession)?
            .user_id
            .clone();

        let now = self.deps.clock.now();
        self.deps
            .repositories
            .users
            .update_if(
                &user.id,
                &|_: &User| true,
                &|u: &mut User| u.block(partner.clone(), now),
            )
            .await?;
        tracing::info!(user_id = %user.id, blocked = %partner, "用户屏蔽了聊天伙伴");

        self.end_session(session.id, EndReason::Block, Some(&user.id))
            .await?
            .ok_or(ApplicationError::NoActiveSession)
    }

    /// 结束会话。只有把会话从活跃改为结束的那一次调用返回摘要并触发后续动作，
    /// 会话已结束时返回 `Ok(None)`。
    pub async fn end_session(
        &self,
        session_id: SessionId,
        reason: EndReason,
        initiator: Option<&UserId>,
    ) -> Result<Option<SessionSummary>, ApplicationError> {
        let now = self.deps.clock.now();
        let ended = self
            .deps
            .repositories
            .sessions
            .update_if(
                session_id,
                &|s: &ChatSession| s.active,
                &|s: &mut ChatSession| {
                    let _ = s.end(reason, now);
                },
            )
            .await?;
        let Some(session) = ended else {
            return Ok(None);
        };

        let mut suspended = Vec::new();
        for participant in &session.participants {
            match self
                .deps
                .repositories
                .users
                .update_if(
                    &participant.user_id,
                    &|u: &User| u.current_session == Some(session_id) || u.current_session.is_none(),
                    &|u: &mut User| {
                        if u.status == UserStatus::Chatting || u.current_session.is_some() {
                            u.go_idle(now);
                        }
                    },
                )
                .await
            {
                Ok(Some(user)) if user.status == UserStatus::Suspended => {
                    suspended.push(user.id);
                }
                Ok(_) => {}
                Err(err) => tracing::error!(
                    session_id = %session_id,
                    user_id = %participant.user_id,
                    error = %err,
                    "会话已结束，但更新用户状态失败"
                ),
            }
        }

        let summary = SessionSummary::of(&session);
        tracing::info!(
            session_id = %session_id,
            reason = reason.as_str(),
            duration_secs = summary.duration_secs,
            message_count = summary.message_count,
            "会话结束"
        );

        for participant in &session.participants {
            let is_initiator = initiator == Some(&participant.user_id);
            let headline = match (reason, is_initiator) {
                (EndReason::Moderation, _) => "This chat was ended by moderation.",
                (EndReason::Reported, true) => "Thanks, your report was received. The chat has ended.",
                (_, true) => "You ended the chat.",
                (_, false) => "Your partner has left the chat.",
            };
            let outbox = &self.deps.outbox;
            outbox.text(&participant.user_id, format!("{headline} {}", summary.describe()));
            if suspended.contains(&participant.user_id) {
                continue;
            }
            outbox.quick_replies(
                &participant.user_id,
                "How was your partner? Rate within 5 minutes.",
                &RATING_OPTIONS,
            );
            self.schedule_follow_up(&participant.user_id, session_id);
        }

        Ok(Some(summary))
    }

    /// 会话记录被删除后，撤销仍挂在该会话上的后续提示
    pub fn cancel_follow_ups(&self, session_id: SessionId) -> usize {
        let cancelled = self.deps.scheduler.cancel_session(session_id);
        if cancelled > 0 {
            tracing::debug!(session_id = %session_id, cancelled, "撤销会话后续提示");
        }
        cancelled
    }

    fn schedule_follow_up(&self, user_id: &UserId, session_id: SessionId) {
        let users = self.deps.repositories.users.clone();
        let queue = self.deps.repositories.queue.clone();
        let outbox = self.deps.outbox.clone();
        let recipient = user_id.clone();

        self.deps.scheduler.schedule(
            user_id.clone(),
            session_id,
            self.deps.settings.follow_up_delay,
            async move {
                let idle = match users.find_by_id(&recipient).await {
                    Ok(Some(user)) => user.status.is_idle() && user.current_session.is_none(),
                    _ => false,
                };
                let queued = matches!(queue.find(&recipient).await, Ok(Some(_)));
                if idle && !queued {
                    outbox.quick_replies(&recipient, "Want to chat with someone new?", &["start"]);
                }
            },
        );
    }

    /// 转发一条消息给伙伴，返回会话内序号
    pub async fn relay(&self, sender_id: &UserId, text: &str) -> Result<u64, ApplicationError> {
        ChatMessage::validate_text(text)?;
        let sender = self.load_user(sender_id).await?;
        let session_id = match (sender.status, sender.current_session) {
            (UserStatus::Chatting, Some(session_id)) => session_id,
            _ => return Err(ApplicationError::NoActiveSession),
        };

        let session = self
            .deps
            .repositories
            .sessions
            .update_if(
                session_id,
                &|s: &ChatSession| s.active && s.has_participant(sender_id),
                &|s: &mut ChatSession| {
                    let _ = s.record_message();
                },
            )
            .await?
            .ok_or(ApplicationError::NoActiveSession)?;
        let sequence = session.message_count;

        let partner = session
            .partner_of(sender_id)
            .ok_or(ApplicationError::NoActiveSession)?;
        self.deps.outbox.text(&partner.user_id, text);

        let now = self.deps.clock.now();
        self.deps
            .repositories
            .messages
            .append(ChatMessage {
                session_id,
                sender_id: sender_id.clone(),
                text: text.to_owned(),
                sequence,
                sent_at: now,
            })
            .await?;
        self.deps
            .repositories
            .users
            .update_if(
                sender_id,
                &|_: &User| true,
                &|u: &mut User| u.messages_sent += 1,
            )
            .await?;

        Ok(sequence)
    }

    pub async fn relay_typing(&self, sender_id: &UserId, on: bool) -> Result<(), ApplicationError> {
        let sender = self.load_user(sender_id).await?;
        let session = self
            .active_session_of(&sender)
            .await?
            .ok_or(ApplicationError::NoActiveSession)?;
        if let Some(partner) = session.partner_of(sender_id) {
            self.deps.outbox.typing(&partner.user_id, on);
        }
        Ok(())
    }

    /// 为最近结束的会话中的伙伴评分，返回伙伴更新后的评分
    pub async fn rate(&self, user_id: &UserId, score: u8) -> Result<Rating, ApplicationError> {
        if !(1..=5).contains(&score) {
            return Err(ApplicationError::invalid_rating("score must be between 1 and 5"));
        }
        let now = self.deps.clock.now();
        let session = self
            .deps
            .repositories
            .sessions
            .latest_ended_by_participant(user_id)
            .await?
            .ok_or_else(|| ApplicationError::invalid_rating("no recent chat to rate"))?;

        let ended_at = session.ended_at.unwrap_or(session.started_at);
        if now - ended_at > self.deps.settings.rating_window {
            return Err(ApplicationError::invalid_rating("the rating window has closed"));
        }
        if session.has_rated(user_id) {
            return Err(ApplicationError::invalid_rating("you already rated this chat"));
        }
        let partner_id = session
            .partner_of(user_id)
            .ok_or_else(|| ApplicationError::invalid_rating("not a participant"))?
            .user_id
            .clone();

        self.deps
            .repositories
            .sessions
            .update_if(
                session.id,
                &|s: &ChatSession| !s.active && !s.has_rated(user_id),
                &|s: &mut ChatSession| {
                    let _ = s.add_rating(user_id.clone(), score, now);
                },
            )
            .await?
            .ok_or_else(|| ApplicationError::invalid_rating("you already rated this chat"))?;

        let partner = self
            .deps
            .repositories
            .users
            .update_if(
                &partner_id,
                &|_: &User| true,
                &|u: &mut User| {
                    let _ = u.rating.record(score);
                    u.updated_at = now;
                },
            )
            .await?
            .ok_or(ApplicationError::NotFound("user"))?;

        tracing::info!(
            session_id = %session.id,
            rater = %user_id,
            rated = %partner_id,
            score,
            "收到会话评分"
        );
        Ok(partner.rating)
    }
}
