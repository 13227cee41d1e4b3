use std::sync::Arc;

use chrono::NaiveDateTime;

use payplan_core::domain::installment::{PaymentHistoryEntry, TransactionType};
use payplan_core::money::{parse_amount, to_cell};

use crate::tabular::{Row, TableId, TabularStore};
use crate::StoreError;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Append-only payment history tab.
#[derive(Clone)]
pub struct PaymentHistory {
    store: Arc<dyn TabularStore>,
    table: TableId,
    tab: String,
}

impl PaymentHistory {
    pub fn new(store: Arc<dyn TabularStore>, table: TableId, tab: impl Into<String>) -> Self {
        Self { store, table, tab: tab.into() }
    }

    pub async fn record(&self, entry: &PaymentHistoryEntry) -> Result<(), StoreError> {
        self.store.append_rows(&self.table, &self.tab, vec![encode_entry(entry)]).await
    }

    pub async fn entries(&self) -> Result<Vec<PaymentHistoryEntry>, StoreError> {
        let rows = self.store.read_rows(&self.table, &self.tab).await?;
        Ok(rows.iter().skip(1).filter_map(decode_entry).collect())
    }
}

pub fn encode_entry(entry: &PaymentHistoryEntry) -> Row {
    vec![
        entry.recorded_at.format(TIMESTAMP_FORMAT).to_string(),
        entry.installment_id.clone(),
        entry.transaction_type.label().to_string(),
        to_cell(entry.amount_applied),
        to_cell(entry.remaining_after),
        entry.notes.clone(),
    ]
}

pub fn decode_entry(row: &Row) -> Option<PaymentHistoryEntry> {
    if row.len() < 5 {
        return None;
    }
    Some(PaymentHistoryEntry {
        recorded_at: NaiveDateTime::parse_from_str(row[0].trim(), TIMESTAMP_FORMAT).ok()?,
        installment_id: row[1].trim().to_string(),
        transaction_type: TransactionType::parse(&row[2])?,
        amount_applied: parse_amount(&row[3])?,
        remaining_after: parse_amount(&row[4])?,
        notes: row.get(5).cloned().unwrap_or_default(),
    })
}
