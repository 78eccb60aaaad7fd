mod admin_service;
mod match_engine;
mod moderation;
#[cfg(test)]
mod moderation_tests;
mod orchestrator;
mod queue_pool;
mod session_manager;
mod user_directory;

use std::sync::Arc;

use config::AppConfig;

pub use admin_service::{AdminService, ReportDetail, UserSummary};
pub use match_engine::{MatchCandidate, MatchEngine};
pub use moderation::{
    suspension_message, ModerationGate, ModerationGateDependencies, ModerationSettings,
    ReportOutcome, MULTIPLE_REPORTS_REASON,
};
pub use orchestrator::{user_message, Command, CommandOutcome, Orchestrator, HELP_TEXT};
pub use queue_pool::{Candidates, QueuePool};
pub use session_manager::{
    SessionManager, SessionManagerDependencies, SessionSettings, SessionSummary, StartOutcome,
    StopOutcome, RATING_OPTIONS,
};
pub use user_directory::UserDirectory;

use crate::clock::Clock;
use crate::notification::NotificationSink;
use crate::outbox::Outbox;
use crate::repository::Repositories;
use crate::retry::RetryPolicy;
use crate::scheduler::FollowUpScheduler;
use crate::transport::Transport;

pub struct ChatServicesDependencies {
    pub repositories: Repositories,
    pub transport: Arc<dyn Transport>,
    pub notifier: Arc<dyn NotificationSink>,
    pub clock: Arc<dyn Clock>,
    pub config: AppConfig,
}

/// 组装好的全部用例服务
#[derive(Clone)]
pub struct ChatServices {
    pub directory: Arc<UserDirectory>,
    pub pool: Arc<QueuePool>,
    pub sessions: Arc<SessionManager>,
    pub moderation: Arc<ModerationGate>,
    pub orchestrator: Arc<Orchestrator>,
    pub admin: Arc<AdminService>,
    pub scheduler: Arc<FollowUpScheduler>,
}

impl ChatServices {
    pub fn build(deps: ChatServicesDependencies) -> Self {
        let ChatServicesDependencies {
            repositories,
            transport,
            notifier,
            clock,
            config,
        } = deps;

        let outbox = Outbox::new(transport, RetryPolicy::from_config(&config.delivery));
        let scheduler = Arc::new(FollowUpScheduler::new());
        let directory = Arc::new(UserDirectory::new(repositories.users.clone(), clock.clone()));
        let pool = Arc::new(QueuePool::new(
            repositories.queue.clone(),
            repositories.sessions.clone(),
        ));
        let engine = Arc::new(MatchEngine::new(pool.clone(), repositories.users.clone()));

        let sessions = Arc::new(SessionManager::new(SessionManagerDependencies {
            repositories: repositories.clone(),
            directory: directory.clone(),
            pool: pool.clone(),
            engine,
            outbox: outbox.clone(),
            scheduler: scheduler.clone(),
            clock: clock.clone(),
            settings: SessionSettings::from_config(&config.session, &config.matching),
        }));

        let moderation = Arc::new(ModerationGate::new(ModerationGateDependencies {
            repositories: repositories.clone(),
            sessions: sessions.clone(),
            pool: pool.clone(),
            notifier,
            outbox: outbox.clone(),
            clock: clock.clone(),
            settings: ModerationSettings::from_config(&config.moderation),
        }));

        let orchestrator = Arc::new(Orchestrator::new(
            directory.clone(),
            sessions.clone(),
            moderation.clone(),
            outbox,
        ));
        let admin = Arc::new(AdminService::new(
            repositories,
            moderation.clone(),
            sessions.clone(),
            clock,
        ));

        Self {
            directory,
            pool,
            sessions,
            moderation,
            orchestrator,
            admin,
            scheduler,
        }
    }
}
