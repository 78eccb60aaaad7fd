//! 领域模型错误定义
//!
//! 定义了领域层与存储层的错误类型，提供清晰的错误上下文。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 参数不合法
    #[error("参数不合法: {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    /// 会话参与者必须是两个不同的用户
    #[error("会话参与者不能是同一个用户")]
    SelfPairing,

    /// 不能举报自己
    #[error("不能举报自己")]
    SelfReport,

    /// 评分超出 1-5 范围
    #[error("评分必须在 1 到 5 之间: {0}")]
    ScoreOutOfRange(u8),

    /// 会话已结束，不允许再修改
    #[error("会话已结束")]
    SessionEnded,

    /// 业务规则违反错误
    #[error("业务规则违反: {rule}")]
    BusinessRuleViolation { rule: String },
}

impl DomainError {
    /// 创建参数错误
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// 创建业务规则违反错误
    pub fn business_rule_violation(rule: impl Into<String>) -> Self {
        Self::BusinessRuleViolation { rule: rule.into() }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 存储层错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("record already exists")]
    Conflict,
    /// 条件更新在多次重试后仍然失败
    #[error("concurrent modification of {entity} {id}")]
    ConcurrentModification { entity: &'static str, id: String },
    #[error("storage unavailable: {message}")]
    Unavailable { message: String },
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn concurrent(entity: &'static str, id: impl ToString) -> Self {
        Self::ConcurrentModification {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;
