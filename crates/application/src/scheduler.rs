//! 延迟的会话后续动作（例如“再聊一次？”提示）
//!
//! 每个用户同一时刻最多一个待执行任务，以会话 ID 标记。用户开始新的排队或会话时取消。

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use domain::{SessionId, UserId};
use tokio::task::JoinHandle;

struct Scheduled {
    session_id: SessionId,
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct FollowUpScheduler {
    tasks: Arc<Mutex<HashMap<UserId, Scheduled>>>,
    generation: AtomicU64,
}

impl FollowUpScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 在 `delay` 后执行 `task`；同一用户已有的待执行任务被替换
    pub fn schedule<F>(&self, user_id: UserId, session_id: SessionId, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let tasks = self.tasks.clone();
        let owner = user_id.clone();

        let mut guard = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut tasks = tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                match tasks.get(&owner) {
                    Some(scheduled) if scheduled.generation == generation => {
                        tasks.remove(&owner);
                    }
                    // 已被取消或替换
                    _ => return,
                }
            }
            task.await;
        });

        if let Some(previous) = guard.insert(
            user_id,
            Scheduled {
                session_id,
                generation,
                handle,
            },
        ) {
            previous.handle.abort();
        }
    }

    /// 取消用户的待执行任务，返回是否确实取消了一个
    pub fn cancel_user(&self, user_id: &UserId) -> bool {
        let removed = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(user_id);
        match removed {
            Some(scheduled) => {
                scheduled.handle.abort();
                tracing::debug!(
                    user_id = %user_id,
                    session_id = %scheduled.session_id,
                    "取消会话后续提示"
                );
                true
            }
            None => false,
        }
    }

    /// 取消与某个会话相关的全部任务
    pub fn cancel_session(&self, session_id: SessionId) -> usize {
        let mut tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let users: Vec<UserId> = tasks
            .iter()
            .filter(|(_, scheduled)| scheduled.session_id == session_id)
            .map(|(user_id, _)| user_id.clone())
            .collect();
        for user_id in &users {
            if let Some(scheduled) = tasks.remove(user_id) {
                scheduled.handle.abort();
            }
        }
        users.len()
    }

    pub fn pending_for(&self, user_id: &UserId) -> Option<SessionId> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(user_id)
            .map(|scheduled| scheduled.session_id)
    }
}
