//! 测试替身：记录所有出站事件和审核通知，便于断言
//!
//! 也供下游 crate 的集成测试使用。

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use config::AppConfig;
use domain::{Interests, SessionId, User, UserId, UserRepository};

use crate::clock::ManualClock;
use crate::memory::InMemoryStore;
use crate::notification::{ModerationEvent, NotificationError, NotificationSink};
use crate::services::{ChatServices, ChatServicesDependencies, StartOutcome};
use crate::transport::{OutboundEvent, Transport, TransportError};

const WAIT_LIMIT: Duration = Duration::from_secs(2);

#[derive(Default)]
pub struct RecordingTransport {
    events: Mutex<Vec<OutboundEvent>>,
    failures: AtomicU32,
}

impl RecordingTransport {
    /// 接下来的 `count` 次发送失败
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<OutboundEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn events_for(&self, user_id: &UserId) -> Vec<OutboundEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.recipient() == user_id)
            .collect()
    }

    pub fn texts_for(&self, user_id: &UserId) -> Vec<String> {
        self.events_for(user_id)
            .into_iter()
            .filter_map(|event| match event {
                OutboundEvent::Text { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn prompts_for(&self, user_id: &UserId) -> Vec<(String, Vec<String>)> {
        self.events_for(user_id)
            .into_iter()
            .filter_map(|event| match event {
                OutboundEvent::QuickReplies { text, options, .. } => Some((text, options)),
                _ => None,
            })
            .collect()
    }

    /// 等到用户至少收到 `count` 条文本
    pub async fn wait_for_texts(&self, user_id: &UserId, count: usize) -> Vec<String> {
        self.wait_until(|| self.texts_for(user_id).len() >= count)
            .await;
        self.texts_for(user_id)
    }

    pub async fn wait_for_text_containing(&self, user_id: &UserId, needle: &str) -> String {
        self.wait_until(|| self.texts_for(user_id).iter().any(|t| t.contains(needle)))
            .await;
        self.texts_for(user_id)
            .into_iter()
            .find(|t| t.contains(needle))
            .unwrap_or_default()
    }

    async fn wait_until(&self, ready: impl Fn() -> bool) {
        let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
        while !ready() {
            if tokio::time::Instant::now() >= deadline {
                panic!("timed out waiting for outbound events: {:?}", self.events());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn record(&self, event: OutboundEvent) -> Result<(), TransportError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::failed("simulated transport failure"));
        }
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
        Ok(())
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_text(&self, user_id: &UserId, text: &str) -> Result<(), TransportError> {
        self.record(OutboundEvent::Text {
            user_id: user_id.clone(),
            text: text.to_owned(),
        })
    }

    async fn send_quick_replies(
        &self,
        user_id: &UserId,
        text: &str,
        options: &[String],
    ) -> Result<(), TransportError> {
        self.record(OutboundEvent::QuickReplies {
            user_id: user_id.clone(),
            text: text.to_owned(),
            options: options.to_vec(),
        })
    }

    async fn send_typing_indicator(&self, user_id: &UserId, on: bool) -> Result<(), TransportError> {
        self.record(OutboundEvent::Typing {
            user_id: user_id.clone(),
            on,
        })
    }
}

#[derive(Default)]
pub struct RecordingNotificationSink {
    events: Mutex<Vec<ModerationEvent>>,
}

impl RecordingNotificationSink {
    pub fn events(&self) -> Vec<ModerationEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotificationSink {
    async fn notify(&self, event: ModerationEvent) -> Result<(), NotificationError> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
        Ok(())
    }
}

/// 基于内存存储的完整服务组装
pub struct TestHarness {
    pub store: InMemoryStore,
    pub transport: Arc<RecordingTransport>,
    pub notifier: Arc<RecordingNotificationSink>,
    pub clock: Arc<ManualClock>,
    pub services: ChatServices,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let notifier = Arc::new(RecordingNotificationSink::default());
        Self::build(config, notifier.clone(), notifier)
    }

    /// 使用自定义通知实现（例如总是失败的 mock）
    pub fn with_notifier(config: AppConfig, sink: Arc<dyn NotificationSink>) -> Self {
        Self::build(config, sink, Arc::new(RecordingNotificationSink::default()))
    }

    fn build(
        config: AppConfig,
        sink: Arc<dyn NotificationSink>,
        notifier: Arc<RecordingNotificationSink>,
    ) -> Self {
        let store = InMemoryStore::new();
        let transport = Arc::new(RecordingTransport::default());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let services = ChatServices::build(ChatServicesDependencies {
            repositories: store.repositories(),
            transport: transport.clone(),
            notifier: sink,
            clock: clock.clone(),
            config,
        });
        Self {
            store,
            transport,
            notifier,
            clock,
            services,
        }
    }

    /// 建档并返回用户 ID
    pub async fn user(&self, id: &str) -> UserId {
        self.user_with(id, &[]).await
    }

    pub async fn user_with(&self, id: &str, interests: &[&str]) -> UserId {
        let user_id = UserId::parse(id).expect("valid user id");
        self.services
            .directory
            .ensure_user(&user_id)
            .await
            .expect("user created");
        if !interests.is_empty() {
            self.services
                .directory
                .set_interests(&user_id, Interests::from_tags(interests.iter().copied()))
                .await
                .expect("interests set");
        }
        user_id
    }

    pub async fn load(&self, user_id: &UserId) -> User {
        self.store
            .users()
            .find_by_id(user_id)
            .await
            .expect("store available")
            .expect("user exists")
    }

    /// 两个用户先后 `start`，返回配对出的会话
    pub async fn pair(&self, first: &UserId, second: &UserId) -> SessionId {
        let sessions = &self.services.sessions;
        assert_eq!(
            sessions.start(first).await.expect("first start"),
            StartOutcome::Waiting
        );
        match sessions.start(second).await.expect("second start") {
            StartOutcome::Matched { session_id, .. } => session_id,
            StartOutcome::Waiting => panic!("{second} was not matched with {first}"),
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
