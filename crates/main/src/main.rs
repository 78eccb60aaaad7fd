//! 主应用程序入口
//!
//! 加载配置，装配存储、通知渠道与用例服务，启动 Axum Web API 服务。

use std::sync::Arc;

use anyhow::Context;
use application::{
    BroadcastTransport, ChatServices, ChatServicesDependencies, Clock, InMemoryStore,
    Repositories, SystemClock, Transport,
};
use config::AppConfig;
use infrastructure::{notification_sink, Infrastructure};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

/// 出站事件广播通道容量
const BROADCAST_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load().context("加载配置失败")?;
    tracing::info!(config = %config.sanitize(), "配置已加载");

    let repositories = open_store(&config).await?;
    let notifier = notification_sink(&config.notifications, &config.delivery);
    let transport = BroadcastTransport::new(BROADCAST_CAPACITY);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let services = ChatServices::build(ChatServicesDependencies {
        repositories,
        transport: Arc::new(transport.clone()) as Arc<dyn Transport>,
        notifier,
        clock,
        config: config.clone(),
    });

    let app = router(AppState::new(services, transport))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("无法监听 {addr}"))?;

    tracing::info!("配对聊天服务启动在 http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("服务已停止");
    Ok(())
}

/// 配置了数据库时使用 PostgreSQL，否则使用进程内存储
async fn open_store(config: &AppConfig) -> anyhow::Result<Repositories> {
    match &config.database {
        Some(database) => {
            let infrastructure = Infrastructure::connect(database)
                .await
                .context("连接数据库失败")?;
            Ok(infrastructure.repositories())
        }
        None => {
            tracing::warn!("未配置数据库，使用进程内存储，重启后数据丢失");
            Ok(InMemoryStore::new().repositories())
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "无法监听退出信号");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到退出信号，开始关闭");
}
