//! Read-only answers for the informational intents.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use rust_decimal::Decimal;
use tracing::info;

use payplan_core::domain::installment::Installment;
use payplan_core::domain::message::{QueryKind, MISSING_INVOICE};
use payplan_store::{InstallmentLedger, PaymentHistory, StoreError};

#[derive(Clone, Debug, PartialEq)]
pub struct InvoiceDetails {
    pub invoice_id: String,
    pub invoice_total: Decimal,
    pub total_pending: Decimal,
    pub installments: Vec<Installment>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DebtSummary {
    /// Pending installments, earliest due date first.
    pub installments: Vec<Installment>,
    pub total_pending: Decimal,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Statistics {
    pub total_pending: Decimal,
    pub pending_installments: usize,
    pub active_invoices: usize,
    pub total_paid: Decimal,
    pub transactions: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub enum QueryAnswer {
    Invoice(InvoiceDetails),
    InvoiceNotFound { invoice_id: String },
    Debts(DebtSummary),
    Statistics(Statistics),
}

pub struct Consultant {
    ledger: InstallmentLedger,
    history: PaymentHistory,
}

impl Consultant {
    pub fn new(ledger: InstallmentLedger, history: PaymentHistory) -> Self {
        Self { ledger, history }
    }

    pub async fn answer(&self, kind: QueryKind, user_input: &str) -> Result<QueryAnswer, StoreError> {
        info!(event_name = "agent.consultant.query", kind = kind.as_str(), "answering query");
        match kind {
            QueryKind::SpecificInvoice => {
                let invoice_id =
                    invoice_number_in(user_input).unwrap_or_else(|| MISSING_INVOICE.to_string());
                Ok(match self.invoice(&invoice_id).await? {
                    Some(details) => QueryAnswer::Invoice(details),
                    None => QueryAnswer::InvoiceNotFound { invoice_id },
                })
            }
            QueryKind::PendingDebts => Ok(QueryAnswer::Debts(self.pending_debts().await?)),
            QueryKind::Statistics => Ok(QueryAnswer::Statistics(self.statistics().await?)),
        }
    }

    pub async fn invoice(&self, invoice_id: &str) -> Result<Option<InvoiceDetails>, StoreError> {
        let installments: Vec<Installment> = self
            .ledger
            .installments()
            .await?
            .into_iter()
            .filter(|installment| installment.id.belongs_to(invoice_id))
            .collect();

        let Some(first) = installments.first() else {
            return Ok(None);
        };
        Ok(Some(InvoiceDetails {
            invoice_id: invoice_id.to_string(),
            invoice_total: first.invoice_total,
            total_pending: installments.iter().map(|installment| installment.pending_amount).sum(),
            installments,
        }))
    }

    pub async fn pending_debts(&self) -> Result<DebtSummary, StoreError> {
        let mut installments: Vec<Installment> =
            self.ledger.installments().await?.into_iter().filter(Installment::is_pending).collect();
        // Undated rows go last.
        installments.sort_by_key(|installment| (installment.due_date.is_none(), installment.due_date));
        let total_pending = installments.iter().map(|installment| installment.pending_amount).sum();
        Ok(DebtSummary { installments, total_pending })
    }

    pub async fn statistics(&self) -> Result<Statistics, StoreError> {
        let pending: Vec<Installment> =
            self.ledger.installments().await?.into_iter().filter(Installment::is_pending).collect();
        let history = self.history.entries().await?;

        let invoices: BTreeSet<&str> = pending.iter().map(|installment| installment.id.invoice_id()).collect();
        Ok(Statistics {
            total_pending: pending.iter().map(|installment| installment.pending_amount).sum(),
            pending_installments: pending.len(),
            active_invoices: invoices.len(),
            total_paid: history.iter().map(|entry| entry.amount_applied).sum(),
            transactions: history.len(),
        })
    }
}

fn digit_run() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d+").expect("digit pattern compiles"))
}

/// First run of digits in the utterance.
pub fn invoice_number_in(user_input: &str) -> Option<String> {
    digit_run().find(user_input).map(|found| found.as_str().to_string())
}
