use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// `{invoice_id}-{sequence}` for planned installments, or the bare invoice id
/// for rows registered without a plan.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstallmentId {
    invoice_id: String,
    sequence: Option<u32>,
}

impl InstallmentId {
    pub fn new(invoice_id: impl Into<String>, sequence: u32) -> Self {
        Self { invoice_id: invoice_id.into(), sequence: Some(sequence) }
    }

    pub fn bare(invoice_id: impl Into<String>) -> Self {
        Self { invoice_id: invoice_id.into(), sequence: None }
    }

    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(DomainError::InvalidInstallmentId(raw.to_string()));
        }

        match raw.rsplit_once('-') {
            Some((invoice_id, sequence)) if !invoice_id.is_empty() => {
                let sequence = sequence
                    .parse::<u32>()
                    .map_err(|_| DomainError::InvalidInstallmentId(raw.to_string()))?;
                if sequence == 0 {
                    return Err(DomainError::InvalidInstallmentId(raw.to_string()));
                }
                Ok(Self::new(invoice_id, sequence))
            }
            Some(_) => Err(DomainError::InvalidInstallmentId(raw.to_string())),
            None => Ok(Self::bare(raw)),
        }
    }

    pub fn invoice_id(&self) -> &str {
        &self.invoice_id
    }

    pub fn sequence(&self) -> Option<u32> {
        self.sequence
    }

    pub fn is_bare(&self) -> bool {
        self.sequence.is_none()
    }

    pub fn belongs_to(&self, invoice_id: &str) -> bool {
        self.invoice_id == invoice_id
    }
}

impl fmt::Display for InstallmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sequence {
            Some(sequence) => write!(f, "{}-{}", self.invoice_id, sequence),
            None => f.write_str(&self.invoice_id),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallmentStatus {
    Pending,
    Paid,
}

impl InstallmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDIENTE",
            Self::Paid => "PAGADA",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDIENTE" => Some(Self::Pending),
            "PAGADA" => Some(Self::Paid),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentKind {
    Single,
    Fractioned,
}

impl PaymentKind {
    pub fn for_count(installment_count: u32) -> Self {
        if installment_count > 1 {
            Self::Fractioned
        } else {
            Self::Single
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Single => "Total",
            Self::Fractioned => "Fraccionado",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "Total" => Some(Self::Single),
            "Fraccionado" => Some(Self::Fractioned),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Installment {
    /// `None` when the cell could not be read back from the sheet.
    pub registered_on: Option<NaiveDate>,
    pub id: InstallmentId,
    pub invoice_total: Decimal,
    pub pending_amount: Decimal,
    pub original_amount: Decimal,
    pub due_date: Option<NaiveDate>,
    pub kind: PaymentKind,
    pub status: InstallmentStatus,
}

impl Installment {
    pub fn is_pending(&self) -> bool {
        self.status == InstallmentStatus::Pending
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    PartialPayment,
    FullPayment,
    UnplannedPayment,
}

impl TransactionType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::PartialPayment => "Abono Parcial",
            Self::FullPayment => "Pago Completo",
            Self::UnplannedPayment => "Pago Sin Planificación",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "Abono Parcial" => Some(Self::PartialPayment),
            "Pago Completo" => Some(Self::FullPayment),
            "Pago Sin Planificación" => Some(Self::UnplannedPayment),
            _ => None,
        }
    }

    pub fn for_remaining(remaining_after: Decimal) -> Self {
        if remaining_after > Decimal::ZERO {
            Self::PartialPayment
        } else {
            Self::FullPayment
        }
    }
}

/// Append-only record in the history tab.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentHistoryEntry {
    pub recorded_at: NaiveDateTime,
    pub installment_id: String,
    pub transaction_type: TransactionType,
    pub amount_applied: Decimal,
    pub remaining_after: Decimal,
    pub notes: String,
}
