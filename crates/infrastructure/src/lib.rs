//! 基础设施层实现。
//!
//! 提供 PostgreSQL 存储与运营通知 webhook 等适配器，实现应用/领域层定义的接口。

pub mod builder;
pub mod migrations;
pub mod notification;
pub mod repository;

pub use builder::{notification_sink, Infrastructure, InfrastructureError};
pub use migrations::MIGRATOR;
pub use notification::WebhookNotificationSink;
pub use repository::{create_pg_pool, PgStore};
