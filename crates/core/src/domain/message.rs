use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

pub const MISSING_INVOICE: &str = "N/A";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Intent {
    Plan,
    Pay,
    InvoiceQuery,
    DebtsQuery,
    StatisticsQuery,
    Unknown,
}

impl Intent {
    /// Every keyword the classifier may answer with, in prompt order.
    pub const KEYWORDS: [Intent; 5] =
        [Self::Plan, Self::Pay, Self::InvoiceQuery, Self::DebtsQuery, Self::StatisticsQuery];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "PLANIFICAR",
            Self::Pay => "PAGAR",
            Self::InvoiceQuery => "CONSULTA_FACTURA",
            Self::DebtsQuery => "CONSULTA_DEUDAS",
            Self::StatisticsQuery => "CONSULTA_ESTADISTICAS",
            Self::Unknown => "DESCONOCIDO",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PLANIFICAR" => Some(Self::Plan),
            "PAGAR" => Some(Self::Pay),
            "CONSULTA_FACTURA" => Some(Self::InvoiceQuery),
            "CONSULTA_DEUDAS" => Some(Self::DebtsQuery),
            "CONSULTA_ESTADISTICAS" => Some(Self::StatisticsQuery),
            "DESCONOCIDO" => Some(Self::Unknown),
            _ => None,
        }
    }

    pub fn is_mutating(&self) -> bool {
        matches!(self, Self::Plan | Self::Pay)
    }

    pub fn query_kind(&self) -> Option<QueryKind> {
        match self {
            Self::InvoiceQuery => Some(QueryKind::SpecificInvoice),
            Self::DebtsQuery => Some(QueryKind::PendingDebts),
            Self::StatisticsQuery => Some(QueryKind::Statistics),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageStatus {
    Initial,
    IntentClassified,
    Planned,
    PostPayment,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "INITIAL",
            Self::IntentClassified => "INTENT_CLASSIFIED",
            Self::Planned => "PLANNED",
            Self::PostPayment => "POST_ABONO",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryKind {
    SpecificInvoice,
    PendingDebts,
    Statistics,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SpecificInvoice => "FACTURA_ESPECIFICA",
            Self::PendingDebts => "DEUDAS_PENDIENTES",
            Self::Statistics => "ESTADISTICAS",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageData {
    pub total_amount: Decimal,
    pub pending_amount: Decimal,
    pub installment_count: u32,
    pub payment_amount: Decimal,
    pub current_date: NaiveDate,
    pub due_dates: Vec<NaiveDate>,
    pub installment_amounts: Vec<Decimal>,
    pub invoice_number: String,
    pub specific_installment: Option<u32>,
    pub query_kind: Option<QueryKind>,
}

impl MessageData {
    pub fn new(current_date: NaiveDate) -> Self {
        Self {
            total_amount: Decimal::ZERO,
            pending_amount: Decimal::ZERO,
            installment_count: 1,
            payment_amount: Decimal::ZERO,
            current_date,
            due_dates: Vec::new(),
            installment_amounts: Vec::new(),
            invoice_number: MISSING_INVOICE.to_string(),
            specific_installment: None,
            query_kind: None,
        }
    }
}

/// Work item handed from stage to stage by the router.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    user_input: String,
    pub intent: Option<Intent>,
    pub status: MessageStatus,
    pub data: MessageData,
}

impl Message {
    pub fn new(user_input: impl Into<String>, current_date: NaiveDate) -> Self {
        Self {
            user_input: user_input.into(),
            intent: None,
            status: MessageStatus::Initial,
            data: MessageData::new(current_date),
        }
    }

    pub fn user_input(&self) -> &str {
        &self.user_input
    }

    pub fn can_transition_to(&self, next: MessageStatus) -> bool {
        matches!(
            (self.status, next),
            (MessageStatus::Initial, MessageStatus::IntentClassified)
                | (MessageStatus::IntentClassified, MessageStatus::Planned)
                | (MessageStatus::IntentClassified, MessageStatus::PostPayment)
        )
    }

    pub fn transition_to(&mut self, next: MessageStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvariantViolation(format!(
            "message cannot move from {} to {}",
            self.status.as_str(),
            next.as_str()
        )))
    }

    /// Amount extraction must have produced for this intent to be actionable.
    pub fn relevant_amount(&self) -> Decimal {
        match self.intent {
            Some(Intent::Plan) => self.data.total_amount,
            _ => self.data.payment_amount,
        }
    }

    /// The "N/A" invoice and a zero amount both mean extraction failed.
    pub fn extraction_incomplete(&self) -> bool {
        let invoice = self.data.invoice_number.trim();
        invoice.is_empty()
            || invoice == MISSING_INVOICE
            || self.relevant_amount() <= Decimal::ZERO
            || (self.intent == Some(Intent::Plan) && self.data.installment_count == 0)
    }
}
