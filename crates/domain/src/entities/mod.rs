//! 领域实体定义
//!
//! 包含系统的核心实体：用户、排队记录、会话、消息、举报。

pub mod message;
pub mod queue_entry;
pub mod report;
pub mod session;
pub mod user;

pub use message::ChatMessage;
pub use queue_entry::QueueEntry;
pub use report::{ModerationAction, Report, ReportStatus, Resolution};
pub use session::{ChatSession, EndReason, Participant, SessionRating};
pub use user::{
    suspension_until, Priority, Rating, Suspension, SuspensionTerm, User, UserStatus, Warning,
};
