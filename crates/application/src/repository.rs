use std::sync::Arc;

use domain::{
    MessageRepository, QueueRepository, ReportRepository, SessionRepository, UserRepository,
};

/// 各服务共用的存储句柄
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub queue: Arc<dyn QueueRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub reports: Arc<dyn ReportRepository>,
}
