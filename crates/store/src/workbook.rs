use std::sync::Arc;

use tracing::info;

use crate::history::PaymentHistory;
use crate::ledger::InstallmentLedger;
use crate::tabular::{TabSpec, TableId, TabularStore};
use crate::StoreError;

pub const PENDING_HEADERS: [&str; 8] = [
    "Fecha Registro",
    "Cuota ID",
    "Monto Total Factura",
    "Monto Pendiente Actual",
    "Monto Cuota Original",
    "Fecha Vencimiento",
    "Tipo de Pago",
    "Estado",
];

pub const HISTORY_HEADERS: [&str; 6] = [
    "Fecha y Hora Pago",
    "Cuota ID",
    "Tipo Transacción",
    "Monto Pagado",
    "Saldo Restante",
    "Observaciones",
];

/// Knows the tab names of a ledger table and hands out typed views of it.
#[derive(Clone)]
pub struct LedgerWorkbook {
    store: Arc<dyn TabularStore>,
    pending_tab: String,
    history_tab: String,
}

impl LedgerWorkbook {
    pub fn new(
        store: Arc<dyn TabularStore>,
        pending_tab: impl Into<String>,
        history_tab: impl Into<String>,
    ) -> Self {
        Self { store, pending_tab: pending_tab.into(), history_tab: history_tab.into() }
    }

    /// Creates a table with both tabs and their header rows.
    pub async fn provision(&self, title: &str) -> Result<TableId, StoreError> {
        let table = self
            .store
            .create_table(
                title,
                vec![
                    TabSpec::new(self.pending_tab.clone(), &PENDING_HEADERS),
                    TabSpec::new(self.history_tab.clone(), &HISTORY_HEADERS),
                ],
            )
            .await?;
        info!(event_name = "store.workbook.provisioned", table_id = %table, title, "ledger table provisioned");
        Ok(table)
    }

    pub fn ledger(&self, table: TableId) -> InstallmentLedger {
        InstallmentLedger::new(self.store.clone(), table, self.pending_tab.clone())
    }

    pub fn history(&self, table: TableId) -> PaymentHistory {
        PaymentHistory::new(self.store.clone(), table, self.history_tab.clone())
    }
}
