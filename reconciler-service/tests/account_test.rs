//! Account-collection behavior, including both branches of the
//! unknown-account decision.

mod common;

use common::*;
use chrono::Duration;
use reconciler_service::models::event::{OutboundEvent, ValidationFailure};
use reconciler_service::models::session::SessionState;

#[tokio::test]
async fn unknown_account_is_rejected_by_default() {
    let app = spawn_app();
    app.extractor.push_draft(receipt_draft());
    send_image(&app, "thread-a").await;
    send_reply(&app, "thread-a", "sim").await;

    let effects = send_reply(&app, "thread-a", "Banco Inexistente").await;
    assert_eq!(
        effects,
        vec![OutboundEvent::ValidationError(
            ValidationFailure::UnknownAccount {
                account: "Banco Inexistente".to_string()
            }
        )]
    );
    assert_eq!(
        session(&app, "thread-a").await.unwrap().state,
        SessionState::AwaitingAccount
    );
    assert_eq!(app.ledger.entry_count(), 0);

    // A valid answer afterwards still commits.
    let effects = send_reply(&app, "thread-a", "Nubank").await;
    assert!(matches!(effects[0], OutboundEvent::CommitSucceeded { .. }));
}

#[tokio::test]
async fn unknown_account_is_registered_when_configured() {
    let app = spawn_app_with(default_taxonomy(), Duration::minutes(30), true);
    app.extractor.push_draft(receipt_draft());
    send_image(&app, "thread-b").await;
    send_reply(&app, "thread-b", "sim").await;

    let effects = send_reply(&app, "thread-b", "Banco Novo").await;
    assert!(matches!(effects[0], OutboundEvent::CommitSucceeded { .. }));

    let rows = app.ledger.entries();
    assert!(rows.iter().all(|(_, r)| r.account == "Banco Novo"));
}

#[tokio::test]
async fn confirmation_with_account_in_the_same_reply_commits_directly() {
    let app = spawn_app();
    app.extractor.push_draft(receipt_draft());
    send_image(&app, "thread-c").await;

    let effects = send_reply(&app, "thread-c", "sim, conta Nubank").await;
    assert!(matches!(effects[0], OutboundEvent::CommitSucceeded { .. }));

    let rows = app.ledger.entries();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|(_, r)| r.account == "Nubank"));
}

#[tokio::test]
async fn account_answers_match_case_insensitively() {
    let app = spawn_app();
    app.extractor.push_draft(receipt_draft());
    send_image(&app, "thread-d").await;
    send_reply(&app, "thread-d", "ok").await;

    send_reply(&app, "thread-d", "NUBANK").await;
    let rows = app.ledger.entries();
    assert!(rows.iter().all(|(_, r)| r.account == "Nubank"));
}
