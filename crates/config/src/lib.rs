//! 统一配置中心
//!
//! 提供应用的全局配置管理，包括：
//! - 服务监听地址
//! - 数据库连接（未配置时使用内存存储）
//! - 匹配、会话、审核的业务参数
//! - 运营通知渠道与消息投递重试
//!
//! 加载顺序：内置默认值 -> 可选配置文件（`APP_CONFIG_FILE`）-> 环境变量（`APP_*`，`__` 分隔层级）。

use std::time::Duration;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct AppConfig {
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerConfig,
    /// 数据库配置，缺省时使用进程内存储
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    #[validate(nested)]
    pub matching: MatchingConfig,
    #[serde(default)]
    #[validate(nested)]
    pub session: SessionConfig,
    #[serde(default)]
    #[validate(nested)]
    pub moderation: ModerationConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    #[validate(nested)]
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    #[validate(length(min = 1))]
    pub url: String,
    #[serde(default = "default_max_connections")]
    #[validate(range(min = 1))]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

/// 匹配参数
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MatchingConfig {
    /// 匹配领取冲突时的最大重试次数
    #[validate(range(min = 1, max = 50))]
    pub claim_attempts: u32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self { claim_attempts: 5 }
    }
}

/// 会话参数
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SessionConfig {
    /// 会话结束后允许评分的时间窗口（秒）
    #[validate(range(min = 1))]
    pub rating_window_secs: u64,
    /// 会话结束后发送“再聊一次”提示的延迟（秒）
    pub follow_up_delay_secs: u64,
}

impl SessionConfig {
    pub fn rating_window(&self) -> Duration {
        Duration::from_secs(self.rating_window_secs)
    }

    pub fn follow_up_delay(&self) -> Duration {
        Duration::from_secs(self.follow_up_delay_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rating_window_secs: 5 * 60,
            follow_up_delay_secs: 3,
        }
    }
}

/// 审核参数
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ModerationConfig {
    /// 待处理举报达到该数量时自动封禁
    #[validate(range(min = 1))]
    pub report_threshold: u64,
    /// 自动封禁时长（小时）
    #[validate(range(min = 1))]
    pub auto_suspension_hours: u32,
    /// 举报理由命中任一关键词时立即永久封禁（大小写不敏感）
    pub critical_keywords: Vec<String>,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            report_threshold: 3,
            auto_suspension_hours: 24,
            critical_keywords: [
                "kill",
                "threat",
                "suicide",
                "bomb",
                "child",
                "minor",
                "underage",
                "blackmail",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// 运营通知渠道
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotificationConfig {
    /// webhook 地址列表，为空时只记录日志
    #[serde(default)]
    pub webhook_urls: Vec<String>,
}

/// 外部投递（消息平台、通知渠道）的重试参数
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DeliveryConfig {
    #[validate(range(min = 1, max = 10))]
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    /// 单次调用超时（毫秒）
    #[validate(range(min = 1))]
    pub timeout_ms: u64,
}

impl DeliveryConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 200,
            timeout_ms: 5_000,
        }
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
    #[error("invalid configuration: {0}")]
    Rule(String),
}

impl AppConfig {
    /// Load config with precedence: defaults -> optional file (APP_CONFIG_FILE) -> env (APP_*)
    pub fn load() -> Result<Self, ConfigError> {
        let mut fig = Figment::new().merge(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var("APP_CONFIG_FILE") {
            if path.ends_with(".yml") || path.ends_with(".yaml") {
                fig = fig.merge(Yaml::file(path));
            } else if path.ends_with(".json") {
                fig = fig.merge(Json::file(path));
            } else {
                fig = fig.merge(Toml::file(path));
            }
        }
        fig = fig.merge(Env::prefixed("APP_").split("__"));
        Self::extract(fig)
    }

    /// Parse from TOML/YAML/JSON string on top of defaults; format detected by simple heuristics
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        let base = Figment::new().merge(Serialized::defaults(AppConfig::default()));
        let fig = if s.trim_start().starts_with('{') {
            base.merge(Json::string(s))
        } else if s.contains('[') || s.contains('=') {
            base.merge(Toml::string(s))
        } else {
            base.merge(Yaml::string(s))
        };
        Self::extract(fig)
    }

    fn extract(fig: Figment) -> Result<Self, ConfigError> {
        let cfg: AppConfig = fig.extract().map_err(Box::new)?;
        cfg.check()?;
        Ok(cfg)
    }

    /// 验证配置有效性
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if let Some(database) = &self.database {
            if !database.url.starts_with("postgres://") && !database.url.starts_with("postgresql://")
            {
                return Err(ConfigError::Rule(
                    "database.url must be a postgres connection string".into(),
                ));
            }
        }
        if self
            .moderation
            .critical_keywords
            .iter()
            .any(|keyword| keyword.trim().is_empty())
        {
            return Err(ConfigError::Rule(
                "moderation.critical_keywords must not contain blank entries".into(),
            ));
        }
        if let Some(url) = self
            .notifications
            .webhook_urls
            .iter()
            .find(|url| !url.starts_with("http://") && !url.starts_with("https://"))
        {
            return Err(ConfigError::Rule(format!("invalid webhook url: {url}")));
        }
        Ok(())
    }

    /// Return a sanitized string representation (for logs)
    pub fn sanitize(&self) -> String {
        let mut text = format!("{:?}", self);
        if let Some(start) = text.find("postgres") {
            let end = text[start..]
                .find('"')
                .map(|i| start + i)
                .unwrap_or(text.len());
            text.replace_range(start..end, "postgres://[REDACTED]");
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.check().is_ok());
        assert_eq!(config.session.rating_window(), Duration::from_secs(300));
        assert_eq!(config.moderation.report_threshold, 3);
        assert!(config.database.is_none());
    }

    #[test]
    fn toml_overrides_defaults() {
        let config = AppConfig::from_str(
            r#"
            [server]
            host = "0.0.0.0"
            port = 9000

            [moderation]
            report_threshold = 5
            auto_suspension_hours = 12
            critical_keywords = ["threat"]
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.moderation.report_threshold, 5);
        assert_eq!(config.moderation.critical_keywords, vec!["threat".to_string()]);
        assert_eq!(config.session.rating_window_secs, 300);
    }

    #[test]
    fn json_and_yaml_are_detected() {
        let json = AppConfig::from_str(r#"{"matching": {"claim_attempts": 7}}"#).unwrap();
        assert_eq!(json.matching.claim_attempts, 7);

        let yaml = AppConfig::from_str("session:\n  rating_window_secs: 60\n  follow_up_delay_secs: 0\n")
            .unwrap();
        assert_eq!(yaml.session.rating_window_secs, 60);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(AppConfig::from_str(r#"{"matching": {"claim_attempts": 0}}"#).is_err());
        assert!(AppConfig::from_str(
            r#"{"database": {"url": "mysql://db", "max_connections": 2}}"#
        )
        .is_err());
        assert!(AppConfig::from_str(r#"{"notifications": {"webhook_urls": ["ftp://x"]}}"#).is_err());
    }

    #[test]
    fn env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "app.toml",
                r#"
                [server]
                host = "127.0.0.1"
                port = 8081
                "#,
            )?;
            jail.set_env("APP_CONFIG_FILE", "app.toml");
            jail.set_env("APP_SERVER__PORT", "9191");
            jail.set_env("APP_DATABASE__URL", "postgres://u:p@db:5432/pairchat");

            let config = AppConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.server.port, 9191);
            let database = config.database.as_ref().expect("database configured");
            assert_eq!(database.max_connections, 5);
            assert!(!config.sanitize().contains("u:p@db"));
            Ok(())
        });
    }
}
