//! 命令分发
//!
//! 把用户发来的文本解析为命令并交给对应服务；非命令文本在聊天中转发给伙伴。
//! 所有面向用户的回复都经 outbox 发出，返回值供调用方（HTTP 接口）展示结果。

use std::sync::Arc;

use domain::{Interests, Language, UserId, UserStatus};
use serde::Serialize;

use crate::error::ApplicationError;
use crate::outbox::Outbox;
use crate::services::moderation::{ModerationGate, ReportOutcome};
use crate::services::session_manager::{SessionManager, SessionSummary, StartOutcome, StopOutcome};
use crate::services::user_directory::UserDirectory;

pub const HELP_TEXT: &str = "Commands:\n\
start - find someone to chat with\n\
stop - leave the queue or end the chat\n\
next - end the chat and find someone new\n\
report <reason> - report your partner\n\
block - end the chat and never match this partner again\n\
rate <1-5> - rate your last partner\n\
interests <tags> - set interests, e.g. \"interests music, games\"\n\
lang <tag> - set your language, e.g. \"lang fr\"";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Next,
    Report(String),
    Block,
    Rate(u8),
    Interests(Interests),
    Language(Language),
    Help,
    /// 非命令文本，聊天中转发给伙伴
    Text(String),
}

impl Command {
    pub fn parse(input: &str) -> Result<Command, ApplicationError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ApplicationError::invalid_command("empty message"));
        }
        let body = input.strip_prefix('/').unwrap_or(input);
        let (word, rest) = match body.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (body, ""),
        };

        let command = match (word.to_lowercase().as_str(), rest.is_empty()) {
            ("start", true) => Command::Start,
            ("stop", true) => Command::Stop,
            ("next", true) => Command::Next,
            ("block", true) => Command::Block,
            ("help", true) => Command::Help,
            ("report", true) => {
                return Err(ApplicationError::invalid_command(
                    "tell us why you are reporting, e.g. \"report spam\"",
                ))
            }
            ("report", false) => Command::Report(rest.to_owned()),
            ("rate", _) => Command::Rate(parse_score(rest)?),
            ("interests", _) => Command::Interests(
                Interests::parse(rest)
                    .map_err(|err| ApplicationError::invalid_command(err.to_string()))?,
            ),
            ("lang", false) => Command::Language(
                Language::parse(rest)
                    .map_err(|err| ApplicationError::invalid_command(err.to_string()))?,
            ),
            ("lang", true) => {
                return Err(ApplicationError::invalid_command(
                    "give a language tag, e.g. \"lang en\"",
                ))
            }
            _ => Command::Text(input.to_owned()),
        };
        Ok(command)
    }
}

fn parse_score(raw: &str) -> Result<u8, ApplicationError> {
    match raw.parse::<u8>() {
        Ok(score) if (1..=5).contains(&score) => Ok(score),
        _ => Err(ApplicationError::invalid_rating(
            "rating must be a whole number from 1 to 5",
        )),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", content = "result", rename_all = "snake_case")]
pub enum CommandOutcome {
    Start(StartOutcome),
    Stop(StopOutcome),
    Report(ReportOutcome),
    Block(SessionSummary),
    Rate { partner_average: f64, partner_count: u32 },
    Interests { interests: Vec<String> },
    Language { language: String },
    Help,
    Relay { sequence: u64 },
}

pub struct Orchestrator {
    directory: Arc<UserDirectory>,
    sessions: Arc<SessionManager>,
    moderation: Arc<ModerationGate>,
    outbox: Outbox,
}

impl Orchestrator {
    pub fn new(
        directory: Arc<UserDirectory>,
        sessions: Arc<SessionManager>,
        moderation: Arc<ModerationGate>,
        outbox: Outbox,
    ) -> Self {
        Self {
            directory,
            sessions,
            moderation,
            outbox,
        }
    }

    /// 处理一条用户输入。出错时用户已收到对应提示，错误仍返回给调用方。
    pub async fn handle(
        &self,
        user_id: &UserId,
        input: &str,
    ) -> Result<CommandOutcome, ApplicationError> {
        let result = self.dispatch(user_id, input).await;
        if let Err(err) = &result {
            tracing::debug!(user_id = %user_id, error = %err, "命令执行失败");
            self.outbox.text(user_id, user_message(err));
        }
        result
    }

    async fn dispatch(
        &self,
        user_id: &UserId,
        input: &str,
    ) -> Result<CommandOutcome, ApplicationError> {
        let user = self.directory.ensure_user(user_id).await?;
        let command = Command::parse(input)?;
        let user = match command {
            Command::Help => user,
            _ => self.directory.admit(user).await?,
        };

        match command {
            Command::Start => {
                let outcome = self.sessions.start(user_id).await?;
                if outcome == StartOutcome::Waiting {
                    self.outbox
                        .text(user_id, "Looking for someone to chat with. Hang tight!");
                }
                Ok(CommandOutcome::Start(outcome))
            }
            Command::Stop => {
                let outcome = self.sessions.stop(user_id).await?;
                if outcome == StopOutcome::LeftQueue {
                    self.outbox.text(user_id, "You left the queue.");
                }
                Ok(CommandOutcome::Stop(outcome))
            }
            Command::Next => {
                let outcome = self.sessions.next(user_id).await?;
                if outcome == StartOutcome::Waiting {
                    self.outbox
                        .text(user_id, "Looking for someone new to chat with...");
                }
                Ok(CommandOutcome::Start(outcome))
            }
            Command::Report(reason) => {
                let session = self
                    .sessions
                    .active_session_of(&user)
                    .await?
                    .ok_or(ApplicationError::NoActiveSession)?;
                let partner = session
                    .partner_of(user_id)
                    .ok_or(ApplicationError::NoActiveSession)?
                    .user_id
                    .clone();
                let outcome = self
                    .moderation
                    .file_report(user_id, &partner, &reason)
                    .await?;
                if matches!(outcome, ReportOutcome::Suspended { .. }) {
                    self.outbox.text(
                        user_id,
                        "Thanks, your report was received and the moderators have acted on it.",
                    );
                }
                Ok(CommandOutcome::Report(outcome))
            }
            Command::Block => {
                let summary = self.sessions.block(user_id).await?;
                self.outbox
                    .text(user_id, "Blocked. You won't be matched with them again.");
                Ok(CommandOutcome::Block(summary))
            }
            Command::Rate(score) => {
                let rating = self.sessions.rate(user_id, score).await?;
                self.outbox.text(user_id, "Thanks for rating your partner!");
                Ok(CommandOutcome::Rate {
                    partner_average: rating.average,
                    partner_count: rating.count,
                })
            }
            Command::Interests(interests) => {
                let updated = self.directory.set_interests(user_id, interests).await?;
                let tags: Vec<String> = updated.interests.iter().cloned().collect();
                let reply = if tags.is_empty() {
                    "Interests cleared.".to_string()
                } else {
                    format!("Interests set to: {}.", tags.join(", "))
                };
                self.outbox.text(user_id, reply);
                Ok(CommandOutcome::Interests { interests: tags })
            }
            Command::Language(language) => {
                let updated = self.directory.set_language(user_id, language).await?;
                self.outbox
                    .text(user_id, format!("Language set to {}.", updated.language));
                Ok(CommandOutcome::Language {
                    language: updated.language.to_string(),
                })
            }
            Command::Help => {
                self.outbox.text(user_id, HELP_TEXT);
                Ok(CommandOutcome::Help)
            }
            Command::Text(text) => {
                if user.status != UserStatus::Chatting {
                    return Err(ApplicationError::NoActiveSession);
                }
                let sequence = self.sessions.relay(user_id, &text).await?;
                Ok(CommandOutcome::Relay { sequence })
            }
        }
    }

    pub async fn typing(&self, user_id: &UserId, on: bool) -> Result<(), ApplicationError> {
        self.sessions.relay_typing(user_id, on).await
    }
}

/// 面向终端用户的错误提示
pub fn user_message(err: &ApplicationError) -> String {
    match err {
        ApplicationError::AlreadyQueued => {
            "You're already in the queue. Send \"stop\" to leave it.".into()
        }
        ApplicationError::AlreadyChatting => {
            "You're already chatting. Send \"next\" for someone new.".into()
        }
        ApplicationError::NoMatch => "Nobody is available right now. Try again soon.".into(),
        ApplicationError::NoActiveSession => {
            "You're not in a chat. Send \"start\" to find someone.".into()
        }
        ApplicationError::NotAuthorizedAction(message)
        | ApplicationError::InvalidRating(message)
        | ApplicationError::InvalidCommand(message) => {
            let mut text = message.clone();
            if let Some(first) = text.get(..1).map(str::to_uppercase) {
                text.replace_range(..1, &first);
            }
            format!("{text}.")
        }
        ApplicationError::Suspended { reason } => {
            format!("Your account is suspended ({reason}).")
        }
        ApplicationError::Domain(err) => format!("That didn't work: {err}."),
        ApplicationError::NotFound(_)
        | ApplicationError::StoreUnavailable(_)
        | ApplicationError::Repository(_) => {
            "Something went wrong on our side. Please try again in a moment.".into()
        }
    }
}
