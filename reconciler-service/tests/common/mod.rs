//! Common test utilities for reconciler-service integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Once};

use bot_core::retry::RetryConfig;
use chrono::{Duration, NaiveDate};

use reconciler_service::models::draft::{
    ClassificationDraft, Draft, DraftKind, ExpenseDraft, Item, TransferDraft,
};
use reconciler_service::models::event::{InboundEvent, OutboundEvent};
use reconciler_service::models::session::Session;
use reconciler_service::models::taxonomy::Taxonomy;
use reconciler_service::services::database::MemoryLedger;
use reconciler_service::services::engine::Engine;
use reconciler_service::services::gateway::LedgerGateway;
use reconciler_service::services::providers::mock::{MockEditInterpreter, MockExtractionProvider};
use reconciler_service::services::reconciler::Reconciler;
use reconciler_service::services::session_store::{MemorySessionStore, SessionStore};

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,reconciler_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Test application: engine over in-memory stores and scripted providers.
pub struct TestApp {
    pub engine: Arc<Engine>,
    pub store: Arc<MemorySessionStore>,
    pub ledger: Arc<MemoryLedger>,
    pub extractor: Arc<MockExtractionProvider>,
    pub interpreter: Arc<MockEditInterpreter>,
}

pub fn default_taxonomy() -> Taxonomy {
    Taxonomy::new(
        vec![
            "alimentação".to_string(),
            "limpeza".to_string(),
            "transporte".to_string(),
        ],
        vec![
            "Nubank".to_string(),
            "Conta A".to_string(),
            "Conta B".to_string(),
        ],
    )
}

pub fn spawn_app() -> TestApp {
    spawn_app_with(default_taxonomy(), Duration::minutes(30), false)
}

pub fn spawn_app_with(
    taxonomy: Taxonomy,
    ttl: Duration,
    allow_unknown_accounts: bool,
) -> TestApp {
    init_tracing();

    let store = Arc::new(MemorySessionStore::new());
    let ledger = Arc::new(MemoryLedger::new(taxonomy));
    let extractor = Arc::new(MockExtractionProvider::new());
    let interpreter = Arc::new(MockEditInterpreter::new());

    let reconciler = Reconciler::new(
        extractor.clone(),
        interpreter.clone(),
        allow_unknown_accounts,
    );
    let gateway = LedgerGateway::new(
        ledger.clone(),
        ledger.clone(),
        RetryConfig::quick(),
        "custeio".to_string(),
        allow_unknown_accounts,
    );
    let engine = Arc::new(Engine::new(
        store.clone(),
        reconciler,
        gateway,
        ledger.clone(),
        ttl,
    ));

    TestApp {
        engine,
        store,
        ledger,
        extractor,
        interpreter,
    }
}

// -----------------------------------------------------------------------------
// Sample drafts
// -----------------------------------------------------------------------------

pub fn item(description: &str, value: &str, category: &str) -> Item {
    Item {
        description: description.to_string(),
        value: value.parse().expect("bad decimal in test fixture"),
        category: category.to_string(),
    }
}

/// The receipt from scenario A: Arroz 25.00 / Detergente 8.50.
pub fn receipt_draft() -> Draft {
    Draft::Classification(ClassificationDraft {
        establishment: "Supermercado".to_string(),
        purchase_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
        items: vec![
            item("Arroz", "25.00", "alimentação"),
            item("Detergente", "8.50", "limpeza"),
        ],
        account: None,
    })
}

/// The transfer from scenario C: 500.00 from Conta A to Conta B.
pub fn transfer_draft() -> Draft {
    Draft::Transfer(TransferDraft {
        value: "500.00".parse().unwrap(),
        source_account: "Conta A".to_string(),
        destination_account: "Conta B".to_string(),
        transfer_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
        description: None,
    })
}

pub fn expense_draft() -> Draft {
    Draft::Expense(ExpenseDraft {
        value: "47.90".parse().unwrap(),
        category: "transporte".to_string(),
        account: None,
        date: NaiveDate::from_ymd_opt(2024, 6, 2).unwrap(),
        description: Some("corrida".to_string()),
    })
}

// -----------------------------------------------------------------------------
// Event helpers
// -----------------------------------------------------------------------------

pub async fn send_image(app: &TestApp, thread: &str) -> Vec<OutboundEvent> {
    app.engine
        .handle_event(
            thread,
            "user-1",
            DraftKind::Classification,
            InboundEvent::ImageReceived(vec![0xff, 0xd8, 0xff]),
        )
        .await
        .expect("engine failed")
}

pub async fn send_text(
    app: &TestApp,
    thread: &str,
    kind: DraftKind,
    text: &str,
) -> Vec<OutboundEvent> {
    app.engine
        .handle_event(
            thread,
            "user-1",
            kind,
            InboundEvent::TextReceived(text.to_string()),
        )
        .await
        .expect("engine failed")
}

pub async fn send_reply(app: &TestApp, thread: &str, text: &str) -> Vec<OutboundEvent> {
    app.engine
        .handle_event(
            thread,
            "user-1",
            DraftKind::Classification,
            InboundEvent::ReplyReceived(text.to_string()),
        )
        .await
        .expect("engine failed")
}

pub async fn send_cancel(app: &TestApp, thread: &str) -> Vec<OutboundEvent> {
    app.engine
        .handle_event(
            thread,
            "user-1",
            DraftKind::Classification,
            InboundEvent::CancelRequested,
        )
        .await
        .expect("engine failed")
}

pub async fn session(app: &TestApp, thread: &str) -> Option<Session> {
    app.store.get(thread).await.expect("store failed")
}
