//! The structured report returned for every message, and its Spanish rendering.

use std::fmt::{self, Write as _};

use chrono::NaiveDate;
use rust_decimal::Decimal;

use payplan_core::dates::format_date;
use payplan_core::errors::{DomainError, InterfaceError};
use payplan_core::money::format_pesos;

use crate::consultant::QueryAnswer;
use crate::coordinator::{PaymentReport, PlanReport};
use crate::reminders::ReminderReport;

const FORMAT_HINT: &str = "Ejemplo: 'Factura 12345 por $500000 en 3 cuotas'";
const RAW_PREVIEW_CHARS: usize = 200;

#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Planned(PlanReport),
    PaymentApplied(PaymentReport),
    UnplannedPayment { invoice_id: String, amount: Decimal },
    Duplicate { invoice_id: String },
    Refused(DomainError),
    IncompleteExtraction,
    MalformedExtraction { raw_response: String },
    NotUnderstood { raw_response: String },
    ServiceOverloaded,
    InvalidCredential,
    Answer(QueryAnswer),
    Failed(InterfaceError),
}

impl Reply {
    /// True when the ledger was written.
    pub fn mutated(&self) -> bool {
        matches!(self, Self::Planned(_) | Self::PaymentApplied(_) | Self::UnplannedPayment { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Planned(_) => "planned",
            Self::PaymentApplied(_) => "payment_applied",
            Self::UnplannedPayment { .. } => "unplanned_payment",
            Self::Duplicate { .. } => "duplicate",
            Self::Refused(_) => "refused",
            Self::IncompleteExtraction => "incomplete_extraction",
            Self::MalformedExtraction { .. } => "malformed_extraction",
            Self::NotUnderstood { .. } => "not_understood",
            Self::ServiceOverloaded => "service_overloaded",
            Self::InvalidCredential => "invalid_credential",
            Self::Answer(_) => "answer",
            Self::Failed(_) => "failed",
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = self.write_to(&mut out);
        out
    }

    fn write_to(&self, out: &mut String) -> fmt::Result {
        match self {
            Self::Planned(report) => write_plan(out, report),
            Self::PaymentApplied(report) => write_payment(out, report),
            Self::UnplannedPayment { invoice_id, amount } => write!(
                out,
                "La factura {invoice_id} no tenía cuotas registradas. Pago de ${} COP registrado como pago sin planificación.",
                format_pesos(*amount)
            ),
            Self::Duplicate { invoice_id } => write!(
                out,
                "Esta solicitud para la factura {invoice_id} ya fue procesada. No se aplicaron cambios."
            ),
            Self::Refused(error) => write_refusal(out, error),
            Self::IncompleteExtraction => write!(out, "Datos incompletos. Verifica el formato.\n{FORMAT_HINT}"),
            Self::MalformedExtraction { raw_response } => write!(
                out,
                "No se pudieron extraer los datos. Intenta reformular.\nRespuesta recibida: {}",
                preview(raw_response)
            ),
            Self::NotUnderstood { raw_response } => {
                write!(out, "No pude entender tu solicitud.\n{FORMAT_HINT}")?;
                if !raw_response.trim().is_empty() {
                    write!(out, "\nRespuesta del modelo: {}", preview(raw_response))?;
                }
                Ok(())
            }
            Self::ServiceOverloaded => {
                out.write_str("Los servicios de IA están sobrecargados. Intenta en 5-10 minutos.")
            }
            Self::InvalidCredential => {
                out.write_str("La clave del servicio de IA es inválida. Revisa la configuración.")
            }
            Self::Answer(answer) => write_answer(out, answer),
            Self::Failed(error) => write_failure(out, error),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn preview(raw: &str) -> String {
    raw.trim().chars().take(RAW_PREVIEW_CHARS).collect()
}

fn due_label(due_date: Option<NaiveDate>) -> String {
    due_date.map(format_date).unwrap_or_else(|| "sin fecha".to_string())
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

fn write_plan(out: &mut String, report: &PlanReport) -> fmt::Result {
    let count = report.installments.len();
    write!(
        out,
        "Factura {} registrada por ${} COP en {count} cuota{}:",
        report.invoice_id,
        format_pesos(report.total_amount),
        plural(count)
    )?;
    for installment in &report.installments {
        write!(
            out,
            "\n  Cuota {}: ${} COP - vence {}",
            installment.id,
            format_pesos(installment.original_amount),
            due_label(installment.due_date)
        )?;
    }
    write_reminder_warning(out, &report.reminders)
}

fn write_payment(out: &mut String, report: &PaymentReport) -> fmt::Result {
    write!(
        out,
        "Pago de ${} COP aplicado a la factura {}:",
        format_pesos(report.payment_amount),
        report.invoice_id
    )?;
    for application in &report.applications {
        write!(
            out,
            "\n  Cuota {}: ${} -> ${} COP",
            application.installment_id,
            format_pesos(application.previous_pending),
            format_pesos(application.remaining)
        )?;
        if application.settled() {
            out.write_str(" (pagada)")?;
        }
    }
    if report.excess > Decimal::ZERO {
        write!(
            out,
            "\nExcedente de ${} COP sin aplicar: no hay más cuotas pendientes.",
            format_pesos(report.excess)
        )?;
    }
    write_reminder_warning(out, &report.reminders)
}

fn write_reminder_warning(out: &mut String, reminders: &ReminderReport) -> fmt::Result {
    if reminders.failures == 0 {
        return Ok(());
    }
    write!(
        out,
        "\nAviso: {} operación(es) de recordatorio fallaron; el registro quedó guardado.",
        reminders.failures
    )
}

fn write_refusal(out: &mut String, error: &DomainError) -> fmt::Result {
    match error {
        DomainError::DuplicateInvoice { invoice_id } => {
            write!(out, "La factura {invoice_id} ya existe en el sistema.")
        }
        DomainError::InvoiceAlreadyPaid { invoice_id } => {
            write!(out, "La factura {invoice_id} ya fue pagada completamente.")
        }
        DomainError::InstallmentNotPending { installment_id } => {
            write!(out, "La cuota {installment_id} no existe o ya fue pagada.")
        }
        DomainError::InvalidPlan(reason) => write!(out, "No se pudo planificar la factura: {reason}."),
        other => write!(out, "No se pudo procesar la solicitud: {other}."),
    }
}

fn write_failure(out: &mut String, error: &InterfaceError) -> fmt::Result {
    let text = match error {
        InterfaceError::ServiceUnavailable { .. } => {
            "El registro de pagos no está disponible en este momento. Intenta de nuevo en unos minutos."
        }
        InterfaceError::BadRequest { .. } => "La solicitud no se pudo procesar. Revisa los datos de la factura.",
        InterfaceError::Internal { .. } => "Ocurrió un error inesperado.",
    };
    write!(out, "{text} (ref: {})", error.correlation_id())
}

fn write_answer(out: &mut String, answer: &QueryAnswer) -> fmt::Result {
    match answer {
        QueryAnswer::Invoice(details) => {
            write!(
                out,
                "Factura {}\nMonto total: ${} COP\nTotal pendiente: ${} COP\nCuotas: {}",
                details.invoice_id,
                format_pesos(details.invoice_total),
                format_pesos(details.total_pending),
                details.installments.len()
            )?;
            for installment in &details.installments {
                write!(
                    out,
                    "\n  {:<12} cuota ${:>12} pendiente ${:>12}  vence {}  {}",
                    installment.id.to_string(),
                    format_pesos(installment.original_amount),
                    format_pesos(installment.pending_amount),
                    due_label(installment.due_date),
                    installment.status.as_str()
                )?;
            }
            Ok(())
        }
        QueryAnswer::InvoiceNotFound { invoice_id } => {
            write!(out, "No se encontró la factura {invoice_id}.")
        }
        QueryAnswer::Debts(summary) if summary.installments.is_empty() => {
            out.write_str("No hay deudas pendientes.")
        }
        QueryAnswer::Debts(summary) => {
            write!(
                out,
                "Deudas pendientes: {} cuota{}\nMonto total adeudado: ${} COP",
                summary.installments.len(),
                plural(summary.installments.len()),
                format_pesos(summary.total_pending)
            )?;
            for installment in &summary.installments {
                write!(
                    out,
                    "\n  {:<12} ${:>12} COP  vence {}",
                    installment.id.to_string(),
                    format_pesos(installment.pending_amount),
                    due_label(installment.due_date)
                )?;
            }
            Ok(())
        }
        QueryAnswer::Statistics(stats) => write!(
            out,
            "Facturas activas: {}\nCuotas pendientes: {}\nTotal pendiente: ${} COP\nTotal pagado: ${} COP\nTransacciones realizadas: {}",
            stats.active_invoices,
            stats.pending_installments,
            format_pesos(stats.total_pending),
            format_pesos(stats.total_paid),
            stats.transactions
        ),
    }
}
