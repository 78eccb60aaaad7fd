//! 等待匹配的排队记录

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::entities::user::{Priority, User};
use crate::value_objects::{Interests, Language, Timestamp, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub user_id: UserId,
    pub interests: Interests,
    pub language: Language,
    pub priority: Priority,
    pub enqueued_at: Timestamp,
}

impl QueueEntry {
    pub fn for_user(user: &User, now: Timestamp) -> Self {
        Self {
            user_id: user.id.clone(),
            interests: user.interests.clone(),
            language: user.language.clone(),
            priority: user.priority(),
            enqueued_at: now,
        }
    }

    /// 候选排序：优先级高者在前，同优先级先入队者在前
    pub fn candidate_order(a: &QueueEntry, b: &QueueEntry) -> Ordering {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.enqueued_at.cmp(&b.enqueued_at))
            .then_with(|| a.user_id.cmp(&b.user_id))
    }

    pub fn accepts(&self, exclude: &UserId, language: &Language, interests: &Interests) -> bool {
        &self.user_id != exclude
            && &self.language == language
            && (interests.is_empty() || self.interests.overlaps(interests))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn entry(id: &str, priority: u8, offset_secs: i64) -> QueueEntry {
        QueueEntry {
            user_id: UserId::parse(id).unwrap(),
            interests: Interests::default(),
            language: Language::default(),
            priority: Priority(priority),
            enqueued_at: Utc::now() + Duration::seconds(offset_secs),
        }
    }

    #[test]
    fn priority_then_oldest_first() {
        let mut entries = vec![entry("c", 2, 0), entry("b", 5, 2), entry("a", 5, 1)];
        entries.sort_by(QueueEntry::candidate_order);
        let order: Vec<&str> = entries.iter().map(|e| e.user_id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }
}
