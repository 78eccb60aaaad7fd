use application::{BroadcastTransport, ChatServices};

#[derive(Clone)]
pub struct AppState {
    pub services: ChatServices,
    /// WebSocket 连接从这里订阅出站事件
    pub transport: BroadcastTransport,
}

impl AppState {
    pub fn new(services: ChatServices, transport: BroadcastTransport) -> Self {
        Self {
            services,
            transport,
        }
    }
}
