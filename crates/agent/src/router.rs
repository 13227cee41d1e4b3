//! Drives one message through classify, extract, plan, and persist.
//!
//! Stages run strictly in order; each one finishes with the message before
//! the next is started. Gateway sentinels, unparseable extractions and domain
//! conflicts end the pipeline with a [`Reply`]; store failures are returned as
//! errors for the runtime to map.

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use payplan_core::domain::message::{Intent, Message, MessageStatus};
use payplan_core::errors::{ApplicationError, DomainError};
use payplan_core::planner::InstallmentPlanner;
use payplan_store::InstallmentLedger;

use crate::classifier::IntentClassifier;
use crate::consultant::Consultant;
use crate::coordinator::{CoordinatorOutcome, LedgerCoordinator};
use crate::extractor::{DataExtractor, ExtractionError};
use crate::llm::GatewayFailure;
use crate::reply::Reply;

pub struct MessageRouter {
    classifier: IntentClassifier,
    extractor: DataExtractor,
    planner: InstallmentPlanner,
    coordinator: LedgerCoordinator,
    consultant: Consultant,
    ledger: InstallmentLedger,
}

impl MessageRouter {
    pub fn new(
        classifier: IntentClassifier,
        extractor: DataExtractor,
        planner: InstallmentPlanner,
        coordinator: LedgerCoordinator,
        consultant: Consultant,
        ledger: InstallmentLedger,
    ) -> Self {
        Self { classifier, extractor, planner, coordinator, consultant, ledger }
    }

    pub async fn route(&mut self, user_input: &str, now: NaiveDateTime) -> Result<Reply, ApplicationError> {
        let mut message = Message::new(user_input, now.date());

        let classification = match self.classifier.classify(message.user_input()).await {
            Ok(classification) => classification,
            Err(failure) => return Ok(gateway_reply(failure)),
        };
        if classification.intent == Intent::Unknown {
            info!(event_name = "agent.router.not_understood", "intent not recognised");
            return Ok(Reply::NotUnderstood { raw_response: classification.raw_response });
        }
        message.intent = Some(classification.intent);
        message.transition_to(MessageStatus::IntentClassified)?;

        if let Some(kind) = classification.intent.query_kind() {
            message.data.query_kind = Some(kind);
            let answer = self.consultant.answer(kind, message.user_input()).await?;
            return Ok(Reply::Answer(answer));
        }

        match self.extractor.extract(message.user_input()).await {
            Ok(fields) => fields.apply_to(&mut message),
            Err(ExtractionError::Gateway(failure)) => return Ok(gateway_reply(failure)),
            Err(ExtractionError::Malformed { raw_response, .. }) => {
                return Ok(Reply::MalformedExtraction { raw_response });
            }
        }
        if message.extraction_incomplete() {
            info!(
                event_name = "agent.router.incomplete_extraction",
                invoice = %message.data.invoice_number,
                amount = %message.relevant_amount(),
                "extracted data is incomplete"
            );
            return Ok(Reply::IncompleteExtraction);
        }

        if message.intent == Some(Intent::Plan) {
            if let Err(error) = self.plan(&mut message).await? {
                return Ok(Reply::Refused(error));
            }
        }

        let outcome = match self.coordinator.handle(&message, now).await {
            Ok(outcome) => outcome,
            Err(ApplicationError::Domain(error)) => {
                warn!(event_name = "agent.router.refused", error = %error, "mutation refused");
                return Ok(Reply::Refused(error));
            }
            Err(error) => return Err(error),
        };

        if message.intent == Some(Intent::Pay) {
            message.transition_to(MessageStatus::PostPayment)?;
        }
        debug!(event_name = "agent.router.completed", status = message.status.as_str(), "message handled");

        Ok(match outcome {
            CoordinatorOutcome::Duplicate => Reply::Duplicate { invoice_id: message.data.invoice_number },
            CoordinatorOutcome::Planned(report) => Reply::Planned(report),
            CoordinatorOutcome::PaymentApplied(report) => Reply::PaymentApplied(report),
            CoordinatorOutcome::UnplannedPayment { invoice_id, amount } => {
                Reply::UnplannedPayment { invoice_id, amount }
            }
        })
    }

    /// Fills due dates and amounts. The inner result carries plan refusals,
    /// the outer one store failures.
    async fn plan(&self, message: &mut Message) -> Result<Result<(), DomainError>, ApplicationError> {
        let occupancy = self.ledger.occupancy().await?;
        let data = &message.data;
        let plan = match self.planner.plan(data.total_amount, data.installment_count, data.current_date, occupancy)
        {
            Ok(plan) => plan,
            Err(error) => return Ok(Err(error)),
        };
        if plan.has_non_positive_amount() {
            return Ok(Err(DomainError::InvalidPlan(format!(
                "{} over {} installments leaves an installment without amount",
                data.total_amount, data.installment_count
            ))));
        }

        info!(
            event_name = "agent.router.planned",
            invoice = %data.invoice_number,
            installments = plan.len(),
            "installment plan computed"
        );
        message.data.due_dates = plan.due_dates;
        message.data.installment_amounts = plan.amounts;
        message.transition_to(MessageStatus::Planned)?;
        Ok(Ok(()))
    }
}

fn gateway_reply(failure: GatewayFailure) -> Reply {
    match failure {
        GatewayFailure::InvalidCredential => Reply::InvalidCredential,
        GatewayFailure::Exhausted => Reply::ServiceOverloaded,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveDateTime};

    use payplan_core::config::ReminderConfig;
    use payplan_core::errors::DomainError;
    use payplan_core::planner::{InstallmentPlanner, PlannerConfig};
    use payplan_store::{CalendarId, InMemoryEventStore, InMemoryTabularStore, InstallmentLedger, LedgerWorkbook};

    use super::MessageRouter;
    use crate::classifier::IntentClassifier;
    use crate::consultant::Consultant;
    use crate::coordinator::LedgerCoordinator;
    use crate::extractor::DataExtractor;
    use crate::llm::{Completion, LlmClient};
    use crate::prompts::INTENT_PROMPT;
    use crate::reminders::ReminderSynchronizer;
    use crate::reply::Reply;

    /// Answers intent and extraction prompts from separate queues.
    #[derive(Default)]
    struct PromptScript {
        intents: Mutex<VecDeque<Completion>>,
        extractions: Mutex<VecDeque<Completion>>,
    }

    impl PromptScript {
        fn new(intents: Vec<Completion>, extractions: Vec<Completion>) -> Self {
            Self { intents: Mutex::new(intents.into()), extractions: Mutex::new(extractions.into()) }
        }
    }

    #[async_trait]
    impl LlmClient for PromptScript {
        async fn complete(&self, system_prompt: &str, _user_prompt: &str) -> Completion {
            let queue = if system_prompt == INTENT_PROMPT { &self.intents } else { &self.extractions };
            queue.lock().expect("script lock").pop_front().unwrap_or(Completion::Exhausted)
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 1).expect("valid date").and_hms_opt(8, 0, 0).expect("valid time")
    }

    fn text(value: &str) -> Completion {
        Completion::Text(value.to_string())
    }

    async fn router(llm: PromptScript) -> (MessageRouter, InstallmentLedger) {
        let llm: Arc<dyn LlmClient> = Arc::new(llm);
        let workbook = LedgerWorkbook::new(
            Arc::new(InMemoryTabularStore::default()),
            "Deuda Pendiente",
            "Historial de Pagos",
        );
        let table = workbook.provision("Control").await.expect("provision");
        let reminders = ReminderSynchronizer::new(
            Arc::new(InMemoryEventStore::default()),
            CalendarId("primary".into()),
            ReminderConfig::default(),
        );
        let ledger = workbook.ledger(table.clone());
        let router = MessageRouter::new(
            IntentClassifier::new(llm.clone()),
            DataExtractor::new(llm),
            InstallmentPlanner::new(PlannerConfig::default()),
            LedgerCoordinator::new(ledger.clone(), workbook.history(table.clone()), reminders),
            Consultant::new(ledger.clone(), workbook.history(table)),
            ledger.clone(),
        );
        (router, ledger)
    }

    #[tokio::test]
    async fn plan_message_reaches_the_ledger() {
        let (mut router, ledger) = router(PromptScript::new(
            vec![text("PLANIFICAR")],
            vec![text(r#"{"numero_factura": "15744", "monto_total": 150000, "fracciones": 3}"#)],
        ))
        .await;

        let reply = router.route("factura 15744 por $150000 en 3 cuotas", now()).await.expect("route");

        let Reply::Planned(report) = reply else {
            panic!("expected plan reply, got {reply:?}");
        };
        assert_eq!(report.installments.len(), 3);
        assert_eq!(report.installments[0].due_date, NaiveDate::from_ymd_opt(2025, 1, 31));
        assert_eq!(ledger.installments().await.expect("rows").len(), 3);
    }

    #[tokio::test]
    async fn unknown_intent_skips_extraction() {
        let script = PromptScript::new(vec![text("No estoy seguro")], vec![]);
        let (mut router, _) = router(script).await;

        let reply = router.route("hola", now()).await.expect("route");
        assert_eq!(reply, Reply::NotUnderstood { raw_response: "No estoy seguro".to_string() });
    }

    #[tokio::test]
    async fn zero_amount_extraction_is_incomplete() {
        let (mut router, ledger) = router(PromptScript::new(
            vec![text("PAGAR")],
            vec![text(r#"{"numero_factura": "123", "monto_abono": 0}"#)],
        ))
        .await;

        assert_eq!(router.route("pagué la factura 123", now()).await.expect("route"), Reply::IncompleteExtraction);
        assert!(ledger.installments().await.expect("rows").is_empty());
    }

    #[tokio::test]
    async fn exhausted_gateway_reports_overload() {
        let (mut router, _) = router(PromptScript::new(vec![text("PAGAR")], vec![Completion::Exhausted])).await;
        assert_eq!(router.route("pagué 10 de la factura 1", now()).await.expect("route"), Reply::ServiceOverloaded);

        let (mut router, _) = self::router(PromptScript::new(vec![Completion::InvalidCredential], vec![])).await;
        assert_eq!(router.route("ver mis deudas", now()).await.expect("route"), Reply::InvalidCredential);
    }

    #[tokio::test]
    async fn tiny_total_over_many_installments_is_refused() {
        let (mut router, ledger) = router(PromptScript::new(
            vec![text("PLANIFICAR")],
            vec![text(r#"{"numero_factura": "7", "monto_total": 60, "fracciones": 3}"#)],
        ))
        .await;

        let reply = router.route("factura 7 por $60 en 3 cuotas", now()).await.expect("route");
        assert!(matches!(reply, Reply::Refused(DomainError::InvalidPlan(_))), "got {reply:?}");
        assert!(ledger.installments().await.expect("rows").is_empty());
    }

    #[tokio::test]
    async fn absurd_installment_count_is_refused_before_planning() {
        let (mut router, ledger) = router(PromptScript::new(
            vec![text("PLANIFICAR")],
            vec![text(r#"{"numero_factura": "9", "monto_total": 150000, "fracciones": 4294967295}"#)],
        ))
        .await;

        let reply = router.route("factura 9 por $150000 en muchas cuotas", now()).await.expect("route");
        assert!(matches!(reply, Reply::Refused(DomainError::InvalidPlan(_))), "got {reply:?}");
        assert!(ledger.installments().await.expect("rows").is_empty());
    }
}
