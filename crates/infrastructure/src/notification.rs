//! 通过 webhook 向运营渠道推送审核事件

use application::{
    retry_async, ModerationEvent, NotificationError, NotificationSink, RetryPolicy, Severity,
};
use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    severity: Severity,
    summary: String,
    event: &'a ModerationEvent,
}

/// 逐个地址投递，每个地址独立重试；至少一个地址成功即视为送达
pub struct WebhookNotificationSink {
    client: reqwest::Client,
    urls: Vec<String>,
    policy: RetryPolicy,
}

impl WebhookNotificationSink {
    pub fn new(urls: Vec<String>, policy: RetryPolicy) -> Self {
        Self {
            client: reqwest::Client::new(),
            urls,
            policy,
        }
    }

    async fn post(&self, url: &str, payload: &WebhookPayload<'_>) -> Result<(), reqwest::Error> {
        self.client
            .post(url)
            .json(payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for WebhookNotificationSink {
    async fn notify(&self, event: ModerationEvent) -> Result<(), NotificationError> {
        let payload = WebhookPayload {
            severity: event.severity(),
            summary: event.summary(),
            event: &event,
        };

        let mut delivered = 0usize;
        for url in &self.urls {
            match retry_async(&self.policy, || self.post(url, &payload)).await {
                Ok(()) => delivered += 1,
                Err(err) => tracing::warn!(url = %url, error = %err, "运营通知推送失败"),
            }
        }

        if delivered == 0 && !self.urls.is_empty() {
            return Err(NotificationError::failed(format!(
                "no webhook accepted the event ({} configured)",
                self.urls.len()
            )));
        }
        tracing::debug!(delivered, summary = %payload.summary, "运营通知已推送");
        Ok(())
    }
}
