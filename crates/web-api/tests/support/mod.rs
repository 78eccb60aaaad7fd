use std::sync::Arc;

use application::{
    BroadcastTransport, ChatServices, ChatServicesDependencies, InMemoryStore,
    LogNotificationSink, SystemClock,
};
use axum::Router;
use config::AppConfig;
use web_api::{router, AppState};

pub fn build_router() -> Router {
    let mut config = AppConfig::default();
    // 测试里多数用户没有 WebSocket 连接，投递失败不必重试
    config.delivery.max_attempts = 1;
    config.delivery.backoff_base_ms = 0;

    let transport = BroadcastTransport::new(256);
    let services = ChatServices::build(ChatServicesDependencies {
        repositories: InMemoryStore::new().repositories(),
        transport: Arc::new(transport.clone()),
        notifier: Arc::new(LogNotificationSink),
        clock: Arc::new(SystemClock),
        config,
    });

    router(AppState::new(services, transport))
}
