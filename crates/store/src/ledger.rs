//! Typed access to the pending-installments tab.
//!
//! Column layout: registration date, installment id, invoice total, pending
//! amount, original installment amount, due date, payment kind, status.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::debug;

use payplan_core::dates::{format_date, normalize_sheet_date};
use payplan_core::domain::installment::{
    Installment, InstallmentId, InstallmentStatus, PaymentKind,
};
use payplan_core::money::{parse_amount, to_cell};
use payplan_core::planner::{occupancy_from_dates, Occupancy};

use crate::tabular::{Row, TableId, TabularStore};
use crate::StoreError;

pub const REGISTERED_COLUMN: usize = 0;
pub const ID_COLUMN: usize = 1;
pub const TOTAL_COLUMN: usize = 2;
pub const PENDING_COLUMN: usize = 3;
pub const ORIGINAL_COLUMN: usize = 4;
pub const DUE_DATE_COLUMN: usize = 5;
pub const KIND_COLUMN: usize = 6;
pub const STATUS_COLUMN: usize = 7;

#[derive(Clone, Debug, PartialEq)]
pub struct LedgerRow {
    /// Position in the tab, header included.
    pub row_index: usize,
    pub installment: Installment,
}

#[derive(Clone)]
pub struct InstallmentLedger {
    store: Arc<dyn TabularStore>,
    table: TableId,
    tab: String,
}

impl InstallmentLedger {
    pub fn new(store: Arc<dyn TabularStore>, table: TableId, tab: impl Into<String>) -> Self {
        Self { store, table, tab: tab.into() }
    }

    pub fn tab(&self) -> &str {
        &self.tab
    }

    pub async fn list(&self) -> Result<Vec<LedgerRow>, StoreError> {
        let rows = self.store.read_rows(&self.table, &self.tab).await?;
        Ok(rows
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(row_index, row)| {
                let installment = decode_row(row);
                if installment.is_none() {
                    debug!(event_name = "store.ledger.row_skipped", row_index, "skipping unreadable ledger row");
                }
                installment.map(|installment| LedgerRow { row_index, installment })
            })
            .collect())
    }

    pub async fn installments(&self) -> Result<Vec<Installment>, StoreError> {
        Ok(self.list().await?.into_iter().map(|row| row.installment).collect())
    }

    /// Counts due dates straight from the cells, so rows that fail to decode
    /// elsewhere still occupy their day.
    pub async fn occupancy(&self) -> Result<Occupancy, StoreError> {
        let rows = self.store.read_rows(&self.table, &self.tab).await?;
        Ok(occupancy_from_dates(
            rows.iter()
                .skip(1)
                .filter_map(|row| row.get(DUE_DATE_COLUMN))
                .filter_map(|cell| normalize_sheet_date(cell)),
        ))
    }

    pub async fn append(&self, installments: &[Installment]) -> Result<(), StoreError> {
        if installments.is_empty() {
            return Ok(());
        }
        let rows = installments.iter().map(encode_row).collect();
        self.store.append_rows(&self.table, &self.tab, rows).await
    }

    /// Rewrites only the pending-amount cell. Returns false when the id is gone.
    pub async fn update_pending(
        &self,
        id: &InstallmentId,
        pending_amount: Decimal,
    ) -> Result<bool, StoreError> {
        let Some(row_index) = self.find_row(id).await? else {
            return Ok(false);
        };
        self.store
            .update_cells(&self.table, &self.tab, row_index, PENDING_COLUMN, vec![to_cell(pending_amount)])
            .await?;
        Ok(true)
    }

    pub async fn remove(&self, id: &InstallmentId) -> Result<bool, StoreError> {
        let Some(row_index) = self.find_row(id).await? else {
            return Ok(false);
        };
        self.store.delete_rows(&self.table, &self.tab, row_index, row_index + 1).await?;
        Ok(true)
    }

    async fn find_row(&self, id: &InstallmentId) -> Result<Option<usize>, StoreError> {
        let wanted = id.to_string();
        let rows = self.store.read_rows(&self.table, &self.tab).await?;
        Ok(rows
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, row)| row.get(ID_COLUMN).is_some_and(|cell| cell.trim() == wanted))
            .map(|(row_index, _)| row_index))
    }
}

pub fn encode_row(installment: &Installment) -> Row {
    vec![
        installment.registered_on.map(format_date).unwrap_or_default(),
        installment.id.to_string(),
        to_cell(installment.invoice_total),
        to_cell(installment.pending_amount),
        to_cell(installment.original_amount),
        installment.due_date.map(format_date).unwrap_or_default(),
        installment.kind.label().to_string(),
        installment.status.as_str().to_string(),
    ]
}

/// Only the id, pending amount and status must be readable. Other cells are
/// edited by hand often enough that a damaged one must not hide the row.
pub fn decode_row(row: &Row) -> Option<Installment> {
    let cell = |index: usize| row.get(index).map(String::as_str).unwrap_or("");

    let id = InstallmentId::parse(cell(ID_COLUMN)).ok()?;
    let pending_amount = parse_amount(cell(PENDING_COLUMN))?;
    let status = InstallmentStatus::parse(cell(STATUS_COLUMN))?;
    let original_amount = parse_amount(cell(ORIGINAL_COLUMN)).unwrap_or(pending_amount);

    Some(Installment {
        registered_on: normalize_sheet_date(cell(REGISTERED_COLUMN)),
        id,
        invoice_total: parse_amount(cell(TOTAL_COLUMN)).unwrap_or(original_amount),
        pending_amount,
        original_amount,
        due_date: normalize_sheet_date(cell(DUE_DATE_COLUMN)),
        kind: PaymentKind::parse(cell(KIND_COLUMN)).unwrap_or(PaymentKind::Single),
        status,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use payplan_core::domain::installment::{
        Installment, InstallmentId, InstallmentStatus, PaymentKind,
    };

    use super::{decode_row, encode_row, InstallmentLedger};
    use crate::tabular::{TableId, TabularStore};
    use crate::workbook::LedgerWorkbook;
    use crate::InMemoryTabularStore;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn installment(sequence: u32, pending: i64, due: NaiveDate) -> Installment {
        Installment {
            registered_on: Some(date(2025, 1, 1)),
            id: InstallmentId::new("500", sequence),
            invoice_total: Decimal::from(150000),
            pending_amount: Decimal::from(pending),
            original_amount: Decimal::from(pending),
            due_date: Some(due),
            kind: PaymentKind::Fractioned,
            status: InstallmentStatus::Pending,
        }
    }

    async fn ledger() -> (Arc<InMemoryTabularStore>, TableId, InstallmentLedger) {
        let store = Arc::new(InMemoryTabularStore::default());
        let workbook = LedgerWorkbook::new(store.clone(), "Deuda Pendiente", "Historial de Pagos");
        let table = workbook.provision("Control").await.expect("provision");
        let ledger = workbook.ledger(table.clone());
        (store, table, ledger)
    }

    #[test]
    fn row_codec_uses_ledger_vocabulary() {
        let row = encode_row(&installment(2, 50000, date(2025, 3, 2)));
        assert_eq!(
            row,
            vec!["2025-01-01", "500-2", "150000", "50000", "50000", "2025-03-02", "Fraccionado", "PENDIENTE"]
        );
        assert_eq!(decode_row(&row), Some(installment(2, 50000, date(2025, 3, 2))));
    }

    #[test]
    fn decodes_sheet_formatted_cells_and_skips_short_rows() {
        let row: Vec<String> =
            ["45658", "500-1", "$150,000", "100000.50", "100000", "31/01/2025", "Total", "pendiente"]
                .iter()
                .map(|c| (*c).to_string())
                .collect();
        let decoded = decode_row(&row).expect("decoded");
        assert_eq!(decoded.registered_on, Some(date(2025, 1, 1)));
        assert_eq!(decoded.pending_amount, Decimal::new(10000050, 2));
        assert_eq!(decoded.due_date, Some(date(2025, 1, 31)));

        assert_eq!(decode_row(&row[..5].to_vec()), None);
    }

    #[test]
    fn damaged_side_cells_keep_the_row() {
        let row: Vec<String> = ["", "500-1", "n/d", "100000", "", "pronto", "???", "PENDIENTE"]
            .iter()
            .map(|c| (*c).to_string())
            .collect();
        let decoded = decode_row(&row).expect("row with readable id, pending and status");
        assert_eq!(decoded.id, InstallmentId::new("500", 1));
        assert_eq!(decoded.pending_amount, Decimal::from(100000));
        assert_eq!(decoded.original_amount, Decimal::from(100000));
        assert_eq!(decoded.invoice_total, Decimal::from(100000));
        assert_eq!(decoded.registered_on, None);
        assert_eq!(decoded.due_date, None);
        assert_eq!(decoded.kind, PaymentKind::Single);
        assert!(decoded.is_pending());

        let mut unreadable_pending = row.clone();
        unreadable_pending[3] = "cien mil".to_string();
        assert_eq!(decode_row(&unreadable_pending), None);
    }

    #[tokio::test]
    async fn huge_serial_due_date_is_ignored_by_occupancy() {
        let (store, table, ledger) = ledger().await;
        let row: Vec<String> = ["45658", "500-1", "1000", "1000", "1000", "200000000000000", "Total", "PENDIENTE"]
            .iter()
            .map(|c| (*c).to_string())
            .collect();
        store.append_rows(&table, "Deuda Pendiente", vec![row]).await.expect("append raw row");

        assert!(ledger.occupancy().await.expect("occupancy").is_empty());
        let rows = ledger.installments().await.expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].due_date, None);
    }

    #[tokio::test]
    async fn updates_and_removes_by_installment_id() {
        let (_, _, ledger) = ledger().await;
        ledger
            .append(&[installment(1, 100000, date(2025, 1, 31)), installment(2, 50000, date(2025, 3, 2))])
            .await
            .expect("append");

        assert!(ledger.remove(&InstallmentId::new("500", 1)).await.expect("remove"));
        assert!(ledger.update_pending(&InstallmentId::new("500", 2), Decimal::from(30000)).await.expect("update"));
        assert!(!ledger.remove(&InstallmentId::new("500", 9)).await.expect("missing id"));

        let rows = ledger.list().await.expect("list");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row_index, 1);
        assert_eq!(rows[0].installment.pending_amount, Decimal::from(30000));
        assert_eq!(rows[0].installment.original_amount, Decimal::from(50000));
    }

    #[tokio::test]
    async fn occupancy_counts_raw_due_date_cells() {
        let (store, table, ledger) = ledger().await;
        ledger
            .append(&[installment(1, 100, date(2025, 1, 31)), installment(2, 100, date(2025, 1, 31))])
            .await
            .expect("append");
        let partial: Vec<String> =
            ["", "", "", "", "", "2025-02-01"].iter().map(|c| (*c).to_string()).collect();
        store.append_rows(&table, "Deuda Pendiente", vec![partial]).await.expect("append partial row");

        let occupancy = ledger.occupancy().await.expect("occupancy");
        assert_eq!(occupancy.get(&date(2025, 1, 31)), Some(&2));
        assert_eq!(occupancy.get(&date(2025, 2, 1)), Some(&1));
        assert_eq!(ledger.list().await.expect("list").len(), 2);
    }
}
