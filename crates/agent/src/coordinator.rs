//! Registers planned invoices and applies payments to the ledger.
//!
//! One coordinator belongs to one run context. Its dedup set and cache are
//! private to it; the cache is rebuilt from the store at the start of every
//! mutating call and updated in step with each write the coordinator makes.

use std::collections::{HashMap, HashSet};

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use tracing::{info, warn};

use payplan_core::domain::installment::{
    Installment, InstallmentId, InstallmentStatus, PaymentHistoryEntry, PaymentKind,
    TransactionType,
};
use payplan_core::domain::message::{Intent, Message, MessageStatus, MISSING_INVOICE};
use payplan_core::errors::{ApplicationError, DomainError};
use payplan_core::money::round_cents;
use payplan_store::{InstallmentLedger, PaymentHistory, StoreError};

use crate::reminders::{ReminderReport, ReminderSynchronizer};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub invoice_id: String,
    pub intent: Intent,
    pub status: MessageStatus,
    pub payment_amount: Decimal,
}

impl IdempotencyKey {
    pub fn for_message(message: &Message) -> Option<Self> {
        Some(Self {
            invoice_id: message.data.invoice_number.trim().to_string(),
            intent: message.intent?,
            status: message.status,
            payment_amount: message.data.payment_amount.normalize(),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CacheState {
    Pending,
    Paid,
    Planned,
}

#[derive(Clone, Debug)]
struct CacheEntry {
    pending: Decimal,
    due_date: Option<NaiveDate>,
    state: CacheState,
}

impl CacheEntry {
    fn marker(state: CacheState, pending: Decimal) -> Self {
        Self { pending, due_date: None, state }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlanReport {
    pub invoice_id: String,
    pub total_amount: Decimal,
    pub installments: Vec<Installment>,
    pub reminders: ReminderReport,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppliedPayment {
    pub installment_id: InstallmentId,
    pub previous_pending: Decimal,
    pub applied: Decimal,
    pub remaining: Decimal,
}

impl AppliedPayment {
    pub fn settled(&self) -> bool {
        self.remaining <= Decimal::ZERO
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentReport {
    pub invoice_id: String,
    pub payment_amount: Decimal,
    pub applications: Vec<AppliedPayment>,
    /// Left over once no pending installment remains. Reported, never applied.
    pub excess: Decimal,
    pub reminders: ReminderReport,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CoordinatorOutcome {
    /// Same idempotency key already handled by this coordinator.
    Duplicate,
    Planned(PlanReport),
    PaymentApplied(PaymentReport),
    UnplannedPayment { invoice_id: String, amount: Decimal },
}

pub struct LedgerCoordinator {
    ledger: InstallmentLedger,
    history: PaymentHistory,
    reminders: ReminderSynchronizer,
    processed: HashSet<IdempotencyKey>,
    cache: HashMap<InstallmentId, CacheEntry>,
}

impl LedgerCoordinator {
    pub fn new(
        ledger: InstallmentLedger,
        history: PaymentHistory,
        reminders: ReminderSynchronizer,
    ) -> Self {
        Self { ledger, history, reminders, processed: HashSet::new(), cache: HashMap::new() }
    }

    pub async fn handle(
        &mut self,
        message: &Message,
        now: NaiveDateTime,
    ) -> Result<CoordinatorOutcome, ApplicationError> {
        let invoice_id = message.data.invoice_number.trim().to_string();
        if invoice_id.is_empty() || invoice_id == MISSING_INVOICE {
            return Err(DomainError::InvariantViolation("message carries no invoice number".into()).into());
        }
        let Some(key) = IdempotencyKey::for_message(message) else {
            return Err(DomainError::InvariantViolation("message has no intent".into()).into());
        };
        if !self.processed.insert(key) {
            info!(event_name = "agent.coordinator.duplicate", invoice_id = %invoice_id, "message already processed");
            return Ok(CoordinatorOutcome::Duplicate);
        }

        self.resync().await?;

        match message.intent {
            Some(Intent::Plan) => self.register_plan(&invoice_id, message, now).await,
            Some(Intent::Pay) => self.apply_payment(&invoice_id, message, now).await,
            Some(other) => Err(DomainError::InvariantViolation(format!(
                "{} is not a ledger mutation",
                other.as_str()
            ))
            .into()),
            None => Err(DomainError::InvariantViolation("message has no intent".into()).into()),
        }
    }

    /// Rebuilds the cache from the ledger and history tabs, keeping the
    /// markers this coordinator set itself.
    async fn resync(&mut self) -> Result<(), StoreError> {
        let installments = self.ledger.installments().await?;
        let history = self.history.entries().await?;

        let mut fresh: HashMap<InstallmentId, CacheEntry> = self
            .cache
            .drain()
            .filter(|(_, entry)| entry.state != CacheState::Pending)
            .collect();

        for entry in history.iter().filter(|entry| entry.remaining_after <= Decimal::ZERO) {
            // Unplanned payments are logged under the invoice id itself, which may contain hyphens.
            let id = if entry.transaction_type == TransactionType::UnplannedPayment {
                Some(InstallmentId::bare(entry.installment_id.trim()))
            } else {
                InstallmentId::parse(&entry.installment_id).ok()
            };
            if let Some(id) = id {
                fresh.entry(id).or_insert_with(|| CacheEntry::marker(CacheState::Paid, Decimal::ZERO));
            }
        }

        for installment in installments {
            let entry = match installment.status {
                InstallmentStatus::Pending => CacheEntry {
                    pending: installment.pending_amount,
                    due_date: installment.due_date,
                    state: CacheState::Pending,
                },
                InstallmentStatus::Paid => CacheEntry::marker(CacheState::Paid, Decimal::ZERO),
            };
            fresh.insert(installment.id, entry);
        }

        self.cache = fresh;
        Ok(())
    }

    fn known_ids(&self, invoice_id: &str) -> impl Iterator<Item = (&InstallmentId, &CacheEntry)> + '_ {
        let invoice_id = invoice_id.to_string();
        self.cache.iter().filter(move |(id, _)| id.belongs_to(&invoice_id))
    }

    fn pending_ids(&self, invoice_id: &str) -> Vec<InstallmentId> {
        let mut ids: Vec<InstallmentId> = self
            .known_ids(invoice_id)
            .filter(|(_, entry)| entry.state == CacheState::Pending)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn is_pending(&self, id: &InstallmentId) -> bool {
        self.cache.get(id).is_some_and(|entry| entry.state == CacheState::Pending)
    }

    fn invoice_settled(&self, invoice_id: &str) -> bool {
        let bare_paid = self
            .cache
            .get(&InstallmentId::bare(invoice_id))
            .is_some_and(|entry| entry.state == CacheState::Paid);
        let any_paid = self.known_ids(invoice_id).any(|(_, entry)| entry.state == CacheState::Paid);
        bare_paid || (any_paid && self.pending_ids(invoice_id).is_empty())
    }

    async fn register_plan(
        &mut self,
        invoice_id: &str,
        message: &Message,
        now: NaiveDateTime,
    ) -> Result<CoordinatorOutcome, ApplicationError> {
        if self.known_ids(invoice_id).next().is_some() {
            warn!(event_name = "agent.coordinator.duplicate_invoice", invoice_id, "invoice already registered");
            return Err(DomainError::DuplicateInvoice { invoice_id: invoice_id.to_string() }.into());
        }

        let data = &message.data;
        let count = data.due_dates.len();
        if count == 0 || count != data.installment_amounts.len() {
            return Err(DomainError::InvalidPlan(format!(
                "plan has {} due dates and {} amounts",
                count,
                data.installment_amounts.len()
            ))
            .into());
        }

        let kind = PaymentKind::for_count(count as u32);
        let installments: Vec<Installment> = data
            .due_dates
            .iter()
            .zip(&data.installment_amounts)
            .enumerate()
            .map(|(index, (due_date, amount))| Installment {
                registered_on: Some(now.date()),
                id: InstallmentId::new(invoice_id, index as u32 + 1),
                invoice_total: data.total_amount,
                pending_amount: *amount,
                original_amount: *amount,
                due_date: Some(*due_date),
                kind,
                status: InstallmentStatus::Pending,
            })
            .collect();

        self.ledger.append(&installments).await?;
        for installment in &installments {
            self.cache.insert(
                installment.id.clone(),
                CacheEntry {
                    pending: installment.pending_amount,
                    due_date: installment.due_date,
                    state: CacheState::Pending,
                },
            );
        }
        self.cache.insert(
            InstallmentId::bare(invoice_id),
            CacheEntry::marker(CacheState::Planned, data.total_amount),
        );
        info!(
            event_name = "agent.coordinator.invoice_planned",
            invoice_id,
            installments = installments.len(),
            total = %data.total_amount,
            "invoice registered"
        );

        let mut reminders = ReminderReport::default();
        for (installment, due_date) in installments.iter().zip(&data.due_dates) {
            reminders.merge(
                self.reminders.ensure_planned(&installment.id, installment.pending_amount, *due_date).await,
            );
        }

        Ok(CoordinatorOutcome::Planned(PlanReport {
            invoice_id: invoice_id.to_string(),
            total_amount: data.total_amount,
            installments,
            reminders,
        }))
    }

    async fn apply_payment(
        &mut self,
        invoice_id: &str,
        message: &Message,
        now: NaiveDateTime,
    ) -> Result<CoordinatorOutcome, ApplicationError> {
        let amount = message.data.payment_amount;
        if self.invoice_settled(invoice_id) {
            warn!(event_name = "agent.coordinator.already_paid", invoice_id, "invoice already paid");
            return Err(DomainError::InvoiceAlreadyPaid { invoice_id: invoice_id.to_string() }.into());
        }

        let bare = InstallmentId::bare(invoice_id);
        let pending = self.pending_ids(invoice_id);
        let target = match message.data.specific_installment {
            Some(sequence) => {
                let id = InstallmentId::new(invoice_id, sequence);
                if !self.is_pending(&id) {
                    return Err(DomainError::InstallmentNotPending { installment_id: id.to_string() }.into());
                }
                Some(id)
            }
            None if self.is_pending(&bare) => Some(bare.clone()),
            None => pending.iter().find(|id| !id.is_bare()).cloned(),
        };

        if amount <= Decimal::ZERO {
            return Err(DomainError::InvariantViolation("payment amount must be positive".into()).into());
        }

        let Some(target) = target else {
            return self.record_unplanned(invoice_id, amount, now).await;
        };

        let queue: Vec<InstallmentId> = pending.into_iter().skip_while(|id| *id != target).collect();
        let mut remaining_payment = amount;
        let mut applications = Vec::new();
        let mut reminders = ReminderReport::default();

        for id in queue {
            if remaining_payment <= Decimal::ZERO {
                break;
            }
            let Some(entry) = self.cache.get(&id).cloned() else {
                continue;
            };

            let applied = remaining_payment.min(entry.pending);
            let new_pending = round_cents(entry.pending - applied);

            self.history
                .record(&PaymentHistoryEntry {
                    recorded_at: now,
                    installment_id: id.to_string(),
                    transaction_type: TransactionType::for_remaining(new_pending),
                    amount_applied: applied,
                    remaining_after: new_pending,
                    notes: format!("Abono de ${:.2}. Monto anterior: ${:.2}", applied, entry.pending),
                })
                .await?;

            if new_pending > Decimal::ZERO {
                if !self.ledger.update_pending(&id, new_pending).await? {
                    warn!(event_name = "agent.coordinator.row_missing", installment_id = %id, "installment row disappeared before update");
                }
                self.cache.insert(id.clone(), CacheEntry { pending: new_pending, ..entry.clone() });
            } else {
                if !self.ledger.remove(&id).await? {
                    warn!(event_name = "agent.coordinator.row_missing", installment_id = %id, "installment row disappeared before delete");
                }
                self.cache.insert(id.clone(), CacheEntry::marker(CacheState::Paid, Decimal::ZERO));
            }

            if let Some(due_date) = entry.due_date {
                reminders.merge(self.reminders.sync(&id, new_pending, due_date).await);
            }

            info!(
                event_name = "agent.coordinator.payment_applied",
                installment_id = %id,
                applied = %applied,
                remaining = %new_pending,
                "payment applied to installment"
            );
            remaining_payment -= applied;
            applications.push(AppliedPayment {
                installment_id: id,
                previous_pending: entry.pending,
                applied,
                remaining: new_pending,
            });
        }

        let excess = remaining_payment.max(Decimal::ZERO);
        if excess > Decimal::ZERO {
            warn!(event_name = "agent.coordinator.excess_payment", invoice_id, excess = %excess, "payment exceeds pending installments");
        }

        Ok(CoordinatorOutcome::PaymentApplied(PaymentReport {
            invoice_id: invoice_id.to_string(),
            payment_amount: amount,
            applications,
            excess,
            reminders,
        }))
    }

    async fn record_unplanned(
        &mut self,
        invoice_id: &str,
        amount: Decimal,
        now: NaiveDateTime,
    ) -> Result<CoordinatorOutcome, ApplicationError> {
        self.history
            .record(&PaymentHistoryEntry {
                recorded_at: now,
                installment_id: invoice_id.to_string(),
                transaction_type: TransactionType::UnplannedPayment,
                amount_applied: amount,
                remaining_after: Decimal::ZERO,
                notes: format!("Pago de factura no registrada previamente. Monto: ${:.2}", amount),
            })
            .await?;
        self.cache
            .insert(InstallmentId::bare(invoice_id), CacheEntry::marker(CacheState::Paid, Decimal::ZERO));
        info!(event_name = "agent.coordinator.unplanned_payment", invoice_id, amount = %amount, "payment recorded without plan");

        Ok(CoordinatorOutcome::UnplannedPayment { invoice_id: invoice_id.to_string(), amount })
    }
}
