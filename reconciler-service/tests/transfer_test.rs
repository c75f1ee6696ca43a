//! Transfer flows: two opposite-signed rows, no account-collection step.

mod common;

use common::*;
use reconciler_service::models::draft::{Draft, DraftKind};
use reconciler_service::models::event::{OutboundEvent, ValidationFailure};
use reconciler_service::models::patch::{AccountSlot, PatchOp};
use reconciler_service::models::session::SessionState;
use rust_decimal::Decimal;

#[tokio::test]
async fn transfer_commits_two_rows_summing_to_zero() {
    let app = spawn_app();
    app.extractor.push_draft(transfer_draft());

    let effects = send_text(
        &app,
        "thread-a",
        DraftKind::Transfer,
        "transferi 500 da conta a pra conta b",
    )
    .await;
    assert!(matches!(effects[0], OutboundEvent::DraftPresented(_)));

    // Transfers skip the account step entirely.
    let effects = send_reply(&app, "thread-a", "sim").await;
    match &effects[0] {
        OutboundEvent::CommitSucceeded { entry_ids } => assert_eq!(entry_ids.len(), 2),
        other => panic!("expected commit, got {:?}", other),
    }

    let rows = app.ledger.entries();
    assert_eq!(rows.len(), 2);
    let sum: Decimal = rows.iter().map(|(_, r)| r.value).sum();
    assert_eq!(sum, Decimal::ZERO);

    let five_hundred: Decimal = "500.00".parse().unwrap();
    assert_eq!(rows[0].1.value, -five_hundred);
    assert_eq!(rows[1].1.value, five_hundred);
    assert_eq!(rows[0].1.account, "Conta A");
    assert_eq!(rows[1].1.account, "Conta B");
    assert!(rows.iter().all(|(_, r)| r.entry_date.to_string() == "2024-05-01"));
    assert_eq!(rows[0].1.reference, rows[1].1.reference);
    assert!(rows[0].1.reference.is_some());
}

#[tokio::test]
async fn transfer_value_edit_changes_both_legs() {
    let app = spawn_app();
    app.extractor.push_draft(transfer_draft());
    send_text(&app, "thread-b", DraftKind::Transfer, "transferi 500").await;

    app.interpreter.push_patches(vec![PatchOp::SetTotal {
        value: "600.00".parse().unwrap(),
    }]);
    let effects = send_reply(&app, "thread-b", "o valor é 600").await;
    match &effects[0] {
        OutboundEvent::DraftPresented(summary) => {
            assert_eq!(summary.total, "600.00".parse::<Decimal>().unwrap());
        }
        other => panic!("expected draft presentation, got {:?}", other),
    }

    send_reply(&app, "thread-b", "pode seguir").await;
    let rows = app.ledger.entries();
    let magnitudes: Vec<Decimal> = rows.iter().map(|(_, r)| r.value.abs()).collect();
    assert_eq!(magnitudes, vec!["600.00".parse().unwrap(), "600.00".parse().unwrap()]);
}

#[tokio::test]
async fn editing_destination_to_equal_source_is_refused() {
    let app = spawn_app();
    app.extractor.push_draft(transfer_draft());
    send_text(&app, "thread-c", DraftKind::Transfer, "transferi 500").await;
    let before = session(&app, "thread-c").await.unwrap().draft.unwrap();

    app.interpreter.push_patches(vec![PatchOp::ChangeAccount {
        slot: AccountSlot::Destination,
        account: "Conta A".to_string(),
    }]);
    let effects = send_reply(&app, "thread-c", "destino conta a").await;
    assert!(matches!(
        effects[0],
        OutboundEvent::ValidationError(ValidationFailure::AmbiguousEdit { .. })
    ));

    let after = session(&app, "thread-c").await.unwrap();
    assert_eq!(after.draft.unwrap(), before);
    assert_eq!(after.state, SessionState::AwaitingConfirmation);
    match before {
        Draft::Transfer(t) => assert_eq!(t.destination_account, "Conta B"),
        _ => panic!("expected transfer"),
    }
}

#[tokio::test]
async fn transfer_description_edit_lands_on_both_rows() {
    let app = spawn_app();
    app.extractor.push_draft(transfer_draft());
    send_text(&app, "thread-d", DraftKind::Transfer, "transferi 500").await;

    app.interpreter.push_patches(vec![PatchOp::SetDescription {
        description: Some("reserva de emergência".to_string()),
    }]);
    send_reply(&app, "thread-d", "descrição reserva de emergência").await;
    send_reply(&app, "thread-d", "sim").await;

    let rows = app.ledger.entries();
    assert!(rows
        .iter()
        .all(|(_, r)| r.description == "reserva de emergência"));
}
