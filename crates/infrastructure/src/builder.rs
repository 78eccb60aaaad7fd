use std::sync::Arc;

use application::{LogNotificationSink, NotificationSink, Repositories, RetryPolicy};
use config::{DatabaseConfig, DeliveryConfig, NotificationConfig};
use thiserror::Error;

use crate::{
    migrations::MIGRATOR,
    notification::WebhookNotificationSink,
    repository::{create_pg_pool, PgStore},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// 外部依赖的装配结果
#[derive(Clone)]
pub struct Infrastructure {
    pub store: PgStore,
}

impl Infrastructure {
    /// 连接数据库并执行迁移
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, InfrastructureError> {
        let pool = create_pg_pool(&config.url, config.max_connections).await?;
        MIGRATOR.run(&pool).await?;
        tracing::info!(max_connections = config.max_connections, "数据库已连接，迁移完成");

        Ok(Self {
            store: PgStore::new(pool),
        })
    }

    pub fn repositories(&self) -> Repositories {
        self.store.repositories()
    }
}

/// 配置了 webhook 时推送到运营渠道，否则只写日志
pub fn notification_sink(
    notifications: &NotificationConfig,
    delivery: &DeliveryConfig,
) -> Arc<dyn NotificationSink> {
    if notifications.webhook_urls.is_empty() {
        Arc::new(LogNotificationSink)
    } else {
        Arc::new(WebhookNotificationSink::new(
            notifications.webhook_urls.clone(),
            RetryPolicy::from_config(delivery),
        ))
    }
}
