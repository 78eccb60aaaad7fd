//! 应用层实现。
//!
//! 围绕领域模型的用例服务：排队匹配、会话生命周期、举报审核、运营后台，
//! 以及对外部协作方（消息传输、运营通知、时钟）的抽象。

pub mod clock;
pub mod error;
pub mod memory;
pub mod notification;
pub mod outbox;
pub mod pseudonym;
pub mod repository;
pub mod retry;
pub mod scheduler;
pub mod services;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ApplicationError, ApplicationResult};
pub use memory::InMemoryStore;
pub use notification::{
    LogNotificationSink, ModerationEvent, NotificationError, NotificationSink, Severity,
};
pub use outbox::Outbox;
pub use repository::Repositories;
pub use retry::{retry_async, Backoff, RetryError, RetryPolicy};
pub use scheduler::FollowUpScheduler;
pub use services::{
    AdminService, ChatServices, ChatServicesDependencies, Command, CommandOutcome,
    ModerationGate, Orchestrator, ReportDetail, ReportOutcome, SessionManager, SessionSummary,
    StartOutcome, StopOutcome, UserDirectory, UserSummary,
};
pub use transport::{
    BroadcastTransport, OutboundEvent, Transport, TransportError, UserSubscription,
};
