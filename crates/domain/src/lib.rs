//! 匿名配对聊天的核心领域模型
//!
//! 包含用户、排队记录、会话、消息、举报等实体，以及持久化存储接口。

pub mod entities;
pub mod errors;
pub mod repositories;
pub mod value_objects;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use repositories::*;
pub use value_objects::*;
