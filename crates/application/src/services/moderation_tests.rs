//! 举报与封禁测试

use std::sync::Arc;

use config::AppConfig;
use domain::{
    EndReason, Report, ReportRepository, SessionId, SessionRepository, SuspensionTerm, UserId,
    UserStatus,
};

use crate::error::ApplicationError;
use crate::notification::{MockNotificationSink, ModerationEvent, NotificationError};
use crate::services::{ReportOutcome, MULTIPLE_REPORTS_REASON};
use crate::testing::TestHarness;

async fn ended_reason(h: &TestHarness, session_id: SessionId) -> Option<EndReason> {
    h.store
        .repositories()
        .sessions
        .find_by_id(session_id)
        .await
        .unwrap()
        .unwrap()
        .end_reason
}

async fn report(h: &TestHarness, reporter: &UserId, reported: &UserId, reason: &str) -> ReportOutcome {
    h.services
        .moderation
        .file_report(reporter, reported, reason)
        .await
        .unwrap()
}

#[tokio::test]
async fn reporting_requires_an_active_session() {
    let h = TestHarness::new();
    let alice = h.user("alice").await;
    let bob = h.user("bob").await;

    let err = h
        .services
        .moderation
        .file_report(&alice, &bob, "spam")
        .await
        .unwrap_err();
    assert!(matches!(err, ApplicationError::NoActiveSession));
}

#[tokio::test]
async fn only_the_current_partner_can_be_reported() {
    let h = TestHarness::new();
    let alice = h.user("alice").await;
    let bob = h.user("bob").await;
    let carol = h.user("carol").await;
    h.pair(&alice, &bob).await;

    let err = h
        .services
        .moderation
        .file_report(&alice, &carol, "spam")
        .await
        .unwrap_err();
    assert!(matches!(err, ApplicationError::NotAuthorizedAction(_)));
}

#[tokio::test]
async fn single_report_ends_the_chat_without_suspension() {
    let h = TestHarness::new();
    let alice = h.user("alice").await;
    let bob = h.user("bob").await;
    let session_id = h.pair(&alice, &bob).await;

    match report(&h, &alice, &bob, "rude").await {
        ReportOutcome::Filed { pending, .. } => assert_eq!(pending, 1),
        other => panic!("unexpected {other:?}"),
    }

    assert_eq!(ended_reason(&h, session_id).await, Some(EndReason::Reported));
    assert_eq!(h.load(&bob).await.status, UserStatus::Online);
    assert!(matches!(
        h.notifier.events().as_slice(),
        [ModerationEvent::NewReport { pending_reports: 1, .. }]
    ));
}

#[tokio::test]
async fn third_pending_report_suspends() {
    let h = TestHarness::new();
    let troll = h.user("troll").await;

    for (i, name) in ["r1", "r2", "r3"].into_iter().enumerate() {
        let reporter = h.user(name).await;
        let session_id = h.pair(&troll, &reporter).await;
        let outcome = report(&h, &reporter, &troll, "spam links").await;

        if i < 2 {
            assert!(matches!(outcome, ReportOutcome::Filed { .. }));
            assert_eq!(h.load(&troll).await.status, UserStatus::Online);
        } else {
            assert!(matches!(
                outcome,
                ReportOutcome::Suspended { critical: false, .. }
            ));
            assert_eq!(ended_reason(&h, session_id).await, Some(EndReason::Moderation));
        }
    }

    let troll_user = h.load(&troll).await;
    assert_eq!(troll_user.status, UserStatus::Suspended);
    assert!(troll_user.current_session.is_none());
    let suspension = troll_user.suspension.unwrap();
    assert_eq!(suspension.reason, MULTIPLE_REPORTS_REASON);
    assert!(matches!(suspension.term, SuspensionTerm::Timed { .. }));

    assert!(matches!(
        h.services.sessions.start(&troll).await,
        Err(ApplicationError::Suspended { .. })
    ));
    h.transport
        .wait_for_text_containing(&troll, "suspended until")
        .await;
}

#[tokio::test]
async fn critical_keyword_suspends_on_first_report() {
    let h = TestHarness::new();
    let alice = h.user("alice").await;
    let bob = h.user("bob").await;
    let session_id = h.pair(&alice, &bob).await;

    let outcome = report(&h, &alice, &bob, "He sent me a Threat").await;
    assert!(matches!(outcome, ReportOutcome::Suspended { critical: true, .. }));

    let bob_user = h.load(&bob).await;
    assert_eq!(bob_user.status, UserStatus::Suspended);
    assert_eq!(
        bob_user.suspension.map(|s| s.term),
        Some(SuspensionTerm::Permanent)
    );
    assert_eq!(ended_reason(&h, session_id).await, Some(EndReason::Moderation));
    assert_eq!(h.load(&alice).await.status, UserStatus::Online);

    let events = h.notifier.events();
    assert!(events
        .iter()
        .any(|event| matches!(event, ModerationEvent::CriticalReport { matched_keyword, .. } if matched_keyword == "threat")));
    assert!(events
        .iter()
        .any(|event| matches!(event, ModerationEvent::UserSuspended { .. })));

    h.transport
        .wait_for_text_containing(&alice, "ended by moderation")
        .await;
    h.transport
        .wait_for_text_containing(&bob, "permanently suspended")
        .await;
}

#[tokio::test]
async fn critical_keyword_past_stored_reason_limit_still_suspends() {
    let h = TestHarness::new();
    let alice = h.user("alice").await;
    let bob = h.user("bob").await;
    h.pair(&alice, &bob).await;

    let reason = format!("{} he said he will kill me", "x".repeat(Report::MAX_REASON_LEN));
    let outcome = report(&h, &alice, &bob, &reason).await;
    assert!(matches!(outcome, ReportOutcome::Suspended { critical: true, .. }));
    assert_eq!(h.load(&bob).await.status, UserStatus::Suspended);

    let ReportOutcome::Suspended { report_id, .. } = outcome else {
        unreachable!()
    };
    let stored = h
        .store
        .repositories()
        .reports
        .find_by_id(report_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.reason.chars().count(), Report::MAX_REASON_LEN);
}

#[tokio::test]
async fn suspension_survives_notification_failure() {
    let mut sink = MockNotificationSink::new();
    sink.expect_notify()
        .returning(|_| Err(NotificationError::failed("operator channel down")));
    let h = TestHarness::with_notifier(AppConfig::default(), Arc::new(sink));
    let alice = h.user("alice").await;
    let bob = h.user("bob").await;
    h.pair(&alice, &bob).await;

    let outcome = report(&h, &alice, &bob, "blackmail attempt").await;
    assert!(matches!(outcome, ReportOutcome::Suspended { critical: true, .. }));
    assert_eq!(h.load(&bob).await.status, UserStatus::Suspended);
}

#[tokio::test]
async fn suspending_a_waiting_user_removes_the_queue_entry() {
    let h = TestHarness::new();
    let alice = h.user("alice").await;
    h.services.sessions.start(&alice).await.unwrap();

    h.services
        .moderation
        .suspend(&alice, "ban evasion", SuspensionTerm::Permanent)
        .await
        .unwrap();

    assert!(!h.services.pool.is_queued(&alice).await.unwrap());
    assert_eq!(h.load(&alice).await.status, UserStatus::Suspended);
}

#[tokio::test]
async fn warning_is_recorded_and_delivered() {
    let h = TestHarness::new();
    let alice = h.user("alice").await;

    let warned = h
        .services
        .moderation
        .warn(&alice, "keep it friendly")
        .await
        .unwrap();
    assert_eq!(warned.warnings.len(), 1);
    assert_eq!(warned.status, UserStatus::Online);
    h.transport
        .wait_for_text_containing(&alice, "keep it friendly")
        .await;
}
