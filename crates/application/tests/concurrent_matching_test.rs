//! 并发匹配一致性测试
//!
//! 大量用户同时 `start`：每个用户最多出现在一个会话中，会话数为 floor(N/2)。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use application::testing::TestHarness;
use application::{ApplicationError, CommandOutcome, StartOutcome};
use config::AppConfig;
use domain::{Language, SessionId, UserId, UserStatus};

fn harness() -> Arc<TestHarness> {
    Arc::new(TestHarness::with_config(AppConfig::default()))
}

async fn start_all(h: &Arc<TestHarness>, ids: &[UserId]) {
    let handles: Vec<_> = ids
        .iter()
        .cloned()
        .map(|id| {
            let sessions = h.services.sessions.clone();
            tokio::spawn(async move { sessions.start(&id).await })
        })
        .collect();

    for result in futures::future::join_all(handles).await {
        let outcome = result.expect("task panicked").expect("start failed");
        assert!(matches!(
            outcome,
            StartOutcome::Waiting | StartOutcome::Matched { .. }
        ));
    }
}

async fn assert_consistent(h: &TestHarness, ids: &[UserId]) -> (usize, usize) {
    let mut by_session: HashMap<SessionId, Vec<UserId>> = HashMap::new();
    let mut waiting = 0;

    for id in ids {
        let user = h.load(id).await;
        match user.status {
            UserStatus::Chatting => {
                let session_id = user.current_session.expect("chatting without session");
                by_session.entry(session_id).or_default().push(user.id);
            }
            UserStatus::Waiting => {
                assert!(h.services.pool.is_queued(id).await.unwrap());
                waiting += 1;
            }
            other => panic!("unexpected status {other} for {id}"),
        }
    }

    let mut seen = HashSet::new();
    for (session_id, members) in &by_session {
        assert_eq!(members.len(), 2, "session {session_id} has {members:?}");
        for member in members {
            assert!(seen.insert(member.clone()), "{member} matched twice");
        }
    }
    assert_eq!(h.services.pool.len().await.unwrap() as usize, waiting);
    (by_session.len(), waiting)
}

async fn users(h: &TestHarness, count: usize) -> Vec<UserId> {
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        ids.push(h.user(&format!("user-{i}")).await);
    }
    ids
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn even_crowd_pairs_everyone() {
    let h = harness();
    let ids = users(&h, 40).await;

    start_all(&h, &ids).await;

    let (sessions, waiting) = assert_consistent(&h, &ids).await;
    assert_eq!(sessions, 20);
    assert_eq!(waiting, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn odd_crowd_leaves_one_waiting() {
    let h = harness();
    let ids = users(&h, 41).await;

    start_all(&h, &ids).await;

    let (sessions, waiting) = assert_consistent(&h, &ids).await;
    assert_eq!(sessions, 20);
    assert_eq!(waiting, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn large_crowds_never_strand_compatible_users() {
    for round in 0..5 {
        let h = harness();
        let ids = users(&h, 60).await;

        start_all(&h, &ids).await;

        let (sessions, waiting) = assert_consistent(&h, &ids).await;
        assert_eq!(sessions, 30, "round {round}: {waiting} still waiting");
        assert_eq!(waiting, 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_racing_a_match_leaves_no_half_session() {
    let h = harness();
    let ids = users(&h, 20).await;
    let (early, late) = ids.split_at(10);

    // 第 i 个早到用户只能与第 i 个晚到用户配对
    for (i, (a, b)) in early.iter().zip(late).enumerate() {
        let language = Language::parse(format!("l{i}")).unwrap();
        for id in [a, b] {
            h.services
                .directory
                .set_language(id, language.clone())
                .await
                .unwrap();
        }
    }
    start_all(&h, early).await;
    assert_eq!(h.services.pool.len().await.unwrap(), 10);

    let mut handles = Vec::new();
    for (a, b) in early.iter().cloned().zip(late.iter().cloned()) {
        let sessions = h.services.sessions.clone();
        handles.push(tokio::spawn(async move { sessions.stop(&a).await.map(|_| ()) }));
        let sessions = h.services.sessions.clone();
        handles.push(tokio::spawn(async move { sessions.start(&b).await.map(|_| ()) }));
    }
    for result in futures::future::join_all(handles).await {
        result.expect("task panicked").expect("command failed");
    }

    // 早到用户要么直接离开队列，要么其刚建立的会话被 stop 结束
    for id in early {
        let user = h.load(id).await;
        assert_eq!(user.status, UserStatus::Online, "{id} should be idle");
        assert!(user.current_session.is_none());
        assert!(!h.services.pool.is_queued(id).await.unwrap());
    }
    for id in late {
        let user = h.load(id).await;
        match user.status {
            UserStatus::Waiting => assert!(h.services.pool.is_queued(id).await.unwrap()),
            UserStatus::Online => {
                assert!(user.current_session.is_none());
                assert!(!h.services.pool.is_queued(id).await.unwrap());
            }
            other => panic!("unexpected status {other} for {id}"),
        }
    }
}

#[tokio::test]
async fn orchestrator_keeps_working_when_store_is_down() {
    let h = TestHarness::new();
    let id = UserId::parse("visitor").unwrap();
    h.store.set_unavailable(true);

    assert_eq!(
        h.services.orchestrator.handle(&id, "help").await.unwrap(),
        CommandOutcome::Help
    );
    let err = h
        .services
        .orchestrator
        .handle(&id, "start")
        .await
        .unwrap_err();
    assert!(matches!(err, ApplicationError::StoreUnavailable(_)));
    h.transport
        .wait_for_text_containing(&id, "Something went wrong")
        .await;
}
