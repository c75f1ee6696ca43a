//! Gateway behavior: fresh-taxonomy re-validation, all-or-nothing commit,
//! bounded retry on transient store failures.

mod common;

use common::*;
use reconciler_service::models::event::OutboundEvent;
use reconciler_service::models::session::SessionState;
use reconciler_service::models::taxonomy::Taxonomy;
use reconciler_service::services::database::StoreError;

#[tokio::test]
async fn taxonomy_change_between_confirmation_and_commit_is_caught() {
    let app = spawn_app();
    app.extractor.push_draft(receipt_draft());
    send_image(&app, "thread-a").await;
    send_reply(&app, "thread-a", "sim").await;

    // The budget categories change while the user is answering the
    // account question; "limpeza" disappears.
    app.ledger.set_taxonomy(Taxonomy::new(
        vec!["alimentação".to_string(), "transporte".to_string()],
        vec![
            "Nubank".to_string(),
            "Conta A".to_string(),
            "Conta B".to_string(),
        ],
    ));

    let effects = send_reply(&app, "thread-a", "Nubank").await;
    assert!(matches!(effects[0], OutboundEvent::CommitFailed { .. }));
    assert_eq!(app.ledger.entry_count(), 0);
    assert_eq!(
        session(&app, "thread-a").await.unwrap().state,
        SessionState::AwaitingConfirmation
    );
}

#[tokio::test]
async fn rejected_commit_keeps_the_draft_and_allows_a_retry() {
    let app = spawn_app();
    app.extractor.push_draft(transfer_draft());
    send_text(
        &app,
        "thread-b",
        reconciler_service::models::draft::DraftKind::Transfer,
        "transferi 500",
    )
    .await;
    let before = session(&app, "thread-b").await.unwrap().draft.unwrap();

    app.ledger
        .push_failure(StoreError::Rejected("check constraint violated".to_string()));

    let effects = send_reply(&app, "thread-b", "sim").await;
    assert!(matches!(effects[0], OutboundEvent::CommitFailed { .. }));
    assert_eq!(app.ledger.entry_count(), 0);

    let after = session(&app, "thread-b").await.unwrap();
    assert_eq!(after.state, SessionState::AwaitingConfirmation);
    assert_eq!(after.draft.unwrap(), before);

    // Retrying without the failure commits both legs.
    let effects = send_reply(&app, "thread-b", "sim").await;
    assert!(matches!(effects[0], OutboundEvent::CommitSucceeded { .. }));
    assert_eq!(app.ledger.entry_count(), 2);
}

#[tokio::test]
async fn transient_store_failure_is_retried_within_the_same_commit() {
    let app = spawn_app();
    app.extractor.push_draft(transfer_draft());
    send_text(
        &app,
        "thread-c",
        reconciler_service::models::draft::DraftKind::Transfer,
        "transferi 500",
    )
    .await;

    app.ledger
        .push_failure(StoreError::Unavailable("connection reset".to_string()));

    let effects = send_reply(&app, "thread-c", "sim").await;
    assert!(matches!(effects[0], OutboundEvent::CommitSucceeded { .. }));
    assert_eq!(app.ledger.entry_count(), 2);
}

#[tokio::test]
async fn exhausted_transient_retries_surface_without_a_partial_commit() {
    let app = spawn_app();
    app.extractor.push_draft(transfer_draft());
    send_text(
        &app,
        "thread-d",
        reconciler_service::models::draft::DraftKind::Transfer,
        "transferi 500",
    )
    .await;

    // RetryConfig::quick allows the initial attempt plus two retries.
    for _ in 0..3 {
        app.ledger
            .push_failure(StoreError::Unavailable("connection reset".to_string()));
    }

    let effects = send_reply(&app, "thread-d", "sim").await;
    assert!(matches!(effects[0], OutboundEvent::CommitFailed { .. }));
    assert_eq!(app.ledger.entry_count(), 0);
    assert_eq!(
        session(&app, "thread-d").await.unwrap().state,
        SessionState::AwaitingConfirmation
    );

    let effects = send_reply(&app, "thread-d", "sim").await;
    assert!(matches!(effects[0], OutboundEvent::CommitSucceeded { .. }));
    assert_eq!(app.ledger.entry_count(), 2);
}
