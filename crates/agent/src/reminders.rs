//! Calendar reminders that mirror installment state.
//!
//! Every failure here is logged and counted, never returned: the ledger write
//! that triggered the sync has already happened and stays authoritative.

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use payplan_core::config::ReminderConfig;
use payplan_core::domain::installment::InstallmentId;
use payplan_core::money::format_pesos;
use payplan_store::{CalendarEvent, CalendarId, EventStore, EventWindow, NewEvent};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReminderReport {
    pub created: u32,
    pub removed: u32,
    pub skipped: u32,
    pub failures: u32,
}

impl ReminderReport {
    pub fn merge(&mut self, other: ReminderReport) {
        self.created += other.created;
        self.removed += other.removed;
        self.skipped += other.skipped;
        self.failures += other.failures;
    }
}

pub struct ReminderSynchronizer {
    events: Arc<dyn EventStore>,
    calendar: CalendarId,
    config: ReminderConfig,
}

impl ReminderSynchronizer {
    pub fn new(events: Arc<dyn EventStore>, calendar: CalendarId, config: ReminderConfig) -> Self {
        Self { events, calendar, config }
    }

    /// Creates the reminder for a freshly planned installment unless one
    /// already exists on its due date.
    pub async fn ensure_planned(
        &self,
        id: &InstallmentId,
        amount: Decimal,
        due_date: NaiveDate,
    ) -> ReminderReport {
        let mut report = ReminderReport::default();
        let window = EventWindow {
            start: due_date,
            end: due_date + Duration::days(1),
            query: Some(id.to_string()),
        };

        match self.events.list_events(&self.calendar, &window).await {
            Ok(existing) if existing.iter().any(|event| references(event, id)) => {
                debug!(event_name = "agent.reminders.already_present", installment_id = %id, "reminder already exists");
                report.skipped += 1;
                return report;
            }
            Ok(_) => {}
            Err(error) => {
                warn!(event_name = "agent.reminders.lookup_failed", installment_id = %id, error = %error, "reminder lookup failed");
                report.failures += 1;
            }
        }

        self.create(id, amount, due_date, &mut report).await;
        report
    }

    /// Replaces whatever reminders track `id` with one showing `new_pending`,
    /// or with none once the installment is paid off.
    pub async fn sync(
        &self,
        id: &InstallmentId,
        new_pending: Decimal,
        due_date: NaiveDate,
    ) -> ReminderReport {
        let mut report = ReminderReport::default();
        let radius = Duration::days(i64::from(self.config.search_window_days));
        let window =
            EventWindow { start: due_date - radius, end: due_date + radius, query: None };

        match self.events.list_events(&self.calendar, &window).await {
            Ok(events) => {
                for event in events.iter().filter(|event| references(event, id)) {
                    match self.events.delete_event(&self.calendar, &event.id).await {
                        Ok(()) => report.removed += 1,
                        Err(error) => {
                            warn!(event_name = "agent.reminders.delete_failed", installment_id = %id, error = %error, "could not delete reminder");
                            report.failures += 1;
                        }
                    }
                }
            }
            Err(error) => {
                warn!(event_name = "agent.reminders.lookup_failed", installment_id = %id, error = %error, "reminder lookup failed");
                report.failures += 1;
            }
        }

        if new_pending > Decimal::ZERO {
            self.create(id, new_pending, due_date, &mut report).await;
        }
        report
    }

    pub fn event_for(&self, id: &InstallmentId, amount: Decimal, due_date: NaiveDate) -> NewEvent {
        NewEvent {
            summary: summary(id, amount),
            description: description(id, amount),
            date: due_date,
            reminder_minutes: self.config.lead_minutes,
        }
    }

    async fn create(
        &self,
        id: &InstallmentId,
        amount: Decimal,
        due_date: NaiveDate,
        report: &mut ReminderReport,
    ) {
        match self.events.insert_event(&self.calendar, self.event_for(id, amount, due_date)).await {
            Ok(_) => report.created += 1,
            Err(error) => {
                warn!(event_name = "agent.reminders.create_failed", installment_id = %id, error = %error, "could not create reminder");
                report.failures += 1;
            }
        }
    }
}

pub fn summary(id: &InstallmentId, amount: Decimal) -> String {
    match id.sequence() {
        Some(sequence) => format!(
            "PAGO PENDIENTE - Factura {}, Cuota {}: ${} COP",
            id.invoice_id(),
            sequence,
            format_pesos(amount)
        ),
        None => format!("PAGO PENDIENTE - Factura {}: ${} COP", id.invoice_id(), format_pesos(amount)),
    }
}

pub fn description(id: &InstallmentId, amount: Decimal) -> String {
    match id.sequence() {
        Some(sequence) => format!(
            "[ID: {id}] Pago de cuota #{sequence} de Factura {}. Monto PENDIENTE: ${} COP.",
            id.invoice_id(),
            format_pesos(amount)
        ),
        None => format!(
            "[ID: {id}] Pago de Factura {}. Monto PENDIENTE: ${} COP.",
            id.invoice_id(),
            format_pesos(amount)
        ),
    }
}

/// Explicit id tag, or for sequenced ids the invoice + installment wording
/// of reminders written before the tag existed.
pub fn references(event: &CalendarEvent, id: &InstallmentId) -> bool {
    let Some(sequence) = id.sequence() else {
        return event.mentions(&format!("[ID: {id}]"));
    };

    let tagged = [&event.summary, &event.description]
        .iter()
        .any(|text| contains_token(text, &id.to_string()));
    let invoice = format!("Factura {}", id.invoice_id());
    let legacy = (contains_token(&event.summary, &invoice)
        && contains_token(&event.summary, &format!("Cuota {sequence}")))
        || (contains_token(&event.description, &invoice)
            && contains_token(&event.description, &format!("#{sequence}")));
    tagged || legacy
}

/// Substring match that refuses to run into adjacent digits, so `Cuota 1`
/// does not match `Cuota 12`.
fn contains_token(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(|ch| ch.is_ascii_digit()) && !after.is_some_and(|ch| ch.is_ascii_digit())
    })
}
