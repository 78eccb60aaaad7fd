//! 出站投递队列
//!
//! 每个收件人一个 FIFO 队列和一个投递任务：同一收件人的消息按入队顺序送达，
//! 投递失败按重试策略有限次重试后记录日志丢弃，调用方从不等待外部传输。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use domain::UserId;
use tokio::sync::mpsc;

use crate::retry::{retry_async, RetryPolicy};
use crate::transport::{OutboundEvent, Transport};

/// 投递任务空闲多久后退出
const WORKER_IDLE: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct Outbox {
    inner: Arc<OutboxInner>,
}

struct OutboxInner {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    queues: Mutex<HashMap<UserId, mpsc::UnboundedSender<OutboundEvent>>>,
}

impl Outbox {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(OutboxInner {
                transport,
                policy,
                queues: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn text(&self, user_id: &UserId, text: impl Into<String>) {
        self.push(OutboundEvent::Text {
            user_id: user_id.clone(),
            text: text.into(),
        });
    }

    pub fn quick_replies(&self, user_id: &UserId, text: impl Into<String>, options: &[&str]) {
        self.push(OutboundEvent::QuickReplies {
            user_id: user_id.clone(),
            text: text.into(),
            options: options.iter().map(|option| option.to_string()).collect(),
        });
    }

    pub fn typing(&self, user_id: &UserId, on: bool) {
        self.push(OutboundEvent::Typing {
            user_id: user_id.clone(),
            on,
        });
    }

    pub fn push(&self, event: OutboundEvent) {
        let recipient = event.recipient().clone();
        let mut queues = self
            .inner
            .queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let event = match queues.get(&recipient) {
            Some(sender) => match sender.send(event) {
                Ok(()) => return,
                Err(mpsc::error::SendError(event)) => event,
            },
            None => event,
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        // 接收端此时一定存在
        let _ = sender.send(event);
        queues.insert(recipient.clone(), sender);
        drop(queues);

        tokio::spawn(run_worker(self.inner.clone(), recipient, receiver));
    }
}

async fn run_worker(
    inner: Arc<OutboxInner>,
    recipient: UserId,
    mut receiver: mpsc::UnboundedReceiver<OutboundEvent>,
) {
    loop {
        match tokio::time::timeout(WORKER_IDLE, receiver.recv()).await {
            Ok(Some(event)) => deliver(&inner, event).await,
            Ok(None) => return,
            Err(_) => {
                let mut queues = inner
                    .queues
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                // 持锁检查：此刻没有新的入队，可以安全退出
                if receiver.is_empty() {
                    queues.remove(&recipient);
                    return;
                }
            }
        }
    }
}

async fn deliver(inner: &OutboxInner, event: OutboundEvent) {
    let transport = inner.transport.as_ref();
    let result = retry_async(&inner.policy, || async {
        match &event {
            OutboundEvent::Text { user_id, text } => transport.send_text(user_id, text).await,
            OutboundEvent::QuickReplies {
                user_id,
                text,
                options,
            } => transport.send_quick_replies(user_id, text, options).await,
            OutboundEvent::Typing { user_id, on } => {
                transport.send_typing_indicator(user_id, *on).await
            }
        }
    })
    .await;

    if let Err(err) = result {
        tracing::warn!(
            user_id = %event.recipient(),
            error = %err,
            "出站消息投递失败，已放弃"
        );
    }
}
