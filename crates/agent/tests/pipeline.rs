//! Full message flows against in-memory stores and a scripted model.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;

use payplan_agent::consultant::QueryAnswer;
use payplan_agent::prompts::INTENT_PROMPT;
use payplan_agent::{AgentRuntime, Completion, LlmClient, Reply, Workspace};
use payplan_core::config::AppConfig;
use payplan_core::domain::installment::{InstallmentId, TransactionType};
use payplan_core::errors::DomainError;
use payplan_store::{
    CalendarId, InMemoryEventStore, InMemoryTabularStore, InstallmentLedger, LedgerWorkbook,
    PaymentHistory,
};

/// Answers by utterance: one intent keyword and one extraction payload each.
#[derive(Default)]
struct ScriptedModel {
    answers: HashMap<String, (Completion, Completion)>,
}

impl ScriptedModel {
    fn on(mut self, utterance: &str, intent: &str, extraction: &str) -> Self {
        self.answers.insert(
            utterance.to_string(),
            (Completion::Text(intent.to_string()), Completion::Text(extraction.to_string())),
        );
        self
    }

    fn failing(mut self, utterance: &str, intent: Completion) -> Self {
        self.answers.insert(utterance.to_string(), (intent, Completion::Exhausted));
        self
    }
}

#[async_trait]
impl LlmClient for ScriptedModel {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Completion {
        match self.answers.get(user_prompt) {
            Some((intent, _)) if system_prompt == INTENT_PROMPT => intent.clone(),
            Some((_, extraction)) => extraction.clone(),
            None => Completion::Text("DESCONOCIDO".to_string()),
        }
    }
}

struct Harness {
    runtime: AgentRuntime,
    ledger: InstallmentLedger,
    history: PaymentHistory,
    events: Arc<InMemoryEventStore>,
    calendar: CalendarId,
}

async fn harness(model: ScriptedModel) -> Harness {
    let config = AppConfig::default();
    payplan_core::logging::init(&config.logging);
    let tables = Arc::new(InMemoryTabularStore::default());
    let events = Arc::new(InMemoryEventStore::default());
    let workbook = LedgerWorkbook::new(
        tables.clone(),
        config.ledger.pending_tab.clone(),
        config.ledger.history_tab.clone(),
    );
    let table_id = workbook.provision("Control de Pagos").await.expect("provision workbook");
    let calendar = CalendarId("primary".to_string());

    Harness {
        ledger: workbook.ledger(table_id.clone()),
        history: workbook.history(table_id.clone()),
        runtime: AgentRuntime::new(
            tables,
            events.clone(),
            Arc::new(model),
            config,
            Workspace { table_id, calendar_id: calendar.clone() },
        ),
        events,
        calendar,
    }
}

fn on_day(y: i32, m: u32, d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date").and_hms_opt(9, 0, 0).expect("valid time")
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

const PLAN_500: &str = "factura 500 por $150000 en 2 cuotas";
const PAY_500: &str = "pagué $120000 de la factura 500";

fn script() -> ScriptedModel {
    ScriptedModel::default()
        .on(
            "ingresame la factura 15744 por $150000 en 3 cuotas",
            "PLANIFICAR",
            r#"{"numero_factura": "15744", "monto_total": 150000.0, "monto_abono": 0.0, "fracciones": 3, "cuota_especifica": null}"#,
        )
        .on(
            PLAN_500,
            "PLANIFICAR",
            "```json\n{'numero_factura': '500', 'monto_total': 150000, 'fracciones': 2}\n```",
        )
        .on(
            PAY_500,
            "PAGAR",
            r#"{"numero_factura": "500", "monto_total": 0.0, "monto_abono": 120000.0, "fracciones": 1, "cuota_especifica": null}"#,
        )
        .on("pagué la factura 123", "PAGAR", r#"{"numero_factura": "N/A", "monto_abono": 0.0}"#)
        .on("ver mis deudas", "CONSULTA_DEUDAS", "")
        .on("consultar factura 500", "CONSULTA_FACTURA", "")
        .on("estadísticas", "CONSULTA_ESTADISTICAS", "")
        .failing("hola?", Completion::Exhausted)
}

#[tokio::test]
async fn planning_writes_rows_and_reminders() {
    let h = harness(script()).await;

    let reply = h
        .runtime
        .handle_message_at("ingresame la factura 15744 por $150000 en 3 cuotas", on_day(2025, 1, 1))
        .await;

    let Reply::Planned(report) = &reply else {
        panic!("expected plan reply, got {reply:?}");
    };
    assert_eq!(report.reminders.created, 3);

    let rows = h.ledger.installments().await.expect("rows");
    let dates: Vec<Option<NaiveDate>> = rows.iter().map(|row| row.due_date).collect();
    assert_eq!(dates, vec![Some(date(2025, 1, 31)), Some(date(2025, 3, 2)), Some(date(2025, 4, 1))]);
    assert!(rows.iter().all(|row| row.pending_amount == Decimal::from(50000)));

    let events = h.events.all_events(&h.calendar).await;
    assert_eq!(events.len(), 3);
    assert!(events[0].description.starts_with("[ID: 15744-1]"));
    assert!(reply.render().starts_with("Factura 15744 registrada por $150,000 COP en 3 cuotas:"));
}

#[tokio::test]
async fn payment_settles_first_installment_and_reduces_second() {
    let h = harness(script()).await;
    h.runtime.handle_message_at(PLAN_500, on_day(2025, 1, 1)).await;
    // The plan splits 75000 each; leave uneven balances instead.
    h.ledger.update_pending(&InstallmentId::new("500", 1), Decimal::from(100000)).await.expect("seed 1");
    h.ledger.update_pending(&InstallmentId::new("500", 2), Decimal::from(50000)).await.expect("seed 2");

    let reply = h.runtime.handle_message_at(PAY_500, on_day(2025, 1, 15)).await;

    let Reply::PaymentApplied(report) = &reply else {
        panic!("expected payment reply, got {reply:?}");
    };
    assert_eq!(report.excess, Decimal::ZERO);
    let rows = h.ledger.installments().await.expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, InstallmentId::new("500", 2));
    assert_eq!(rows[0].pending_amount, Decimal::from(30000));

    let history = h.history.entries().await.expect("history");
    let types: Vec<TransactionType> = history.iter().map(|entry| entry.transaction_type).collect();
    assert_eq!(types, vec![TransactionType::FullPayment, TransactionType::PartialPayment]);

    let events = h.events.all_events(&h.calendar).await;
    assert_eq!(events.len(), 1, "paid installment loses its reminder");
    assert_eq!(events[0].summary, "PAGO PENDIENTE - Factura 500, Cuota 2: $30,000 COP");
}

#[tokio::test]
async fn session_suppresses_repeated_delivery() {
    let h = harness(script()).await;
    h.runtime.handle_message_at(PLAN_500, on_day(2025, 1, 1)).await;

    let mut session = h.runtime.session();
    let first = session.handle_message_at(PAY_500, on_day(2025, 1, 15)).await;
    let second = session.handle_message_at(PAY_500, on_day(2025, 1, 15)).await;

    assert!(matches!(first, Reply::PaymentApplied(_)));
    assert_eq!(second, Reply::Duplicate { invoice_id: "500".to_string() });
    assert_eq!(h.history.entries().await.expect("history").len(), 2);
}

#[tokio::test]
async fn replanning_an_invoice_is_refused() {
    let h = harness(script()).await;
    h.runtime.handle_message_at(PLAN_500, on_day(2025, 1, 1)).await;

    let reply = h.runtime.handle_message_at(PLAN_500, on_day(2025, 1, 2)).await;

    assert_eq!(reply, Reply::Refused(DomainError::DuplicateInvoice { invoice_id: "500".to_string() }));
    assert_eq!(h.ledger.installments().await.expect("rows").len(), 2);
}

#[tokio::test]
async fn incomplete_extraction_changes_nothing() {
    let h = harness(script()).await;

    let reply = h.runtime.handle_message_at("pagué la factura 123", on_day(2025, 1, 1)).await;

    assert_eq!(reply, Reply::IncompleteExtraction);
    assert!(h.history.entries().await.expect("history").is_empty());
}

#[tokio::test]
async fn overloaded_model_is_reported_not_raised() {
    let h = harness(script()).await;
    let reply = h.runtime.handle_message_at("hola?", on_day(2025, 1, 1)).await;
    assert_eq!(reply, Reply::ServiceOverloaded);
    assert_eq!(reply.render(), "Los servicios de IA están sobrecargados. Intenta en 5-10 minutos.");
}

#[tokio::test]
async fn queries_reflect_ledger_and_history() {
    let h = harness(script()).await;
    h.runtime.handle_message_at(PLAN_500, on_day(2025, 1, 1)).await;
    h.runtime.handle_message_at(PAY_500, on_day(2025, 1, 15)).await;

    let Reply::Answer(QueryAnswer::Debts(debts)) = h.runtime.handle_message_at("ver mis deudas", on_day(2025, 1, 16)).await
    else {
        panic!("expected debts answer");
    };
    assert_eq!(debts.total_pending, Decimal::from(30000));

    let Reply::Answer(QueryAnswer::Invoice(details)) =
        h.runtime.handle_message_at("consultar factura 500", on_day(2025, 1, 16)).await
    else {
        panic!("expected invoice answer");
    };
    assert_eq!(details.invoice_total, Decimal::from(150000));
    assert_eq!(details.installments.len(), 1);

    let Reply::Answer(QueryAnswer::Statistics(stats)) =
        h.runtime.handle_message_at("estadísticas", on_day(2025, 1, 16)).await
    else {
        panic!("expected statistics answer");
    };
    assert_eq!(stats.total_paid, Decimal::from(120000));
    assert_eq!(stats.transactions, 2);
    assert_eq!(stats.active_invoices, 1);
}

#[tokio::test]
async fn unknown_utterance_is_not_understood() {
    let h = harness(script()).await;
    let reply = h.runtime.handle_message_at("cuéntame un chiste", on_day(2025, 1, 1)).await;
    assert_eq!(reply, Reply::NotUnderstood { raw_response: "DESCONOCIDO".to_string() });
}
