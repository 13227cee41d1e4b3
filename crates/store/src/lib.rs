pub mod events;
pub mod history;
pub mod ledger;
pub mod memory;
pub mod tabular;
pub mod workbook;

use thiserror::Error;

use payplan_core::errors::ApplicationError;

pub use events::{CalendarEvent, CalendarId, EventId, EventStore, EventWindow, NewEvent};
pub use history::PaymentHistory;
pub use ledger::{InstallmentLedger, LedgerRow};
pub use memory::{InMemoryEventStore, InMemoryTabularStore};
pub use tabular::{Row, TabSpec, TableId, TabularStore};
pub use workbook::{LedgerWorkbook, HISTORY_HEADERS, PENDING_HEADERS};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("table `{0}` was not found")]
    TableNotFound(String),
    #[error("tab `{tab}` was not found in table `{table}`")]
    TabNotFound { table: String, tab: String },
    #[error("row {row} is out of range for tab `{tab}`")]
    RowOutOfRange { tab: String, row: usize },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("event `{0}` was not found")]
    EventNotFound(String),
}

impl From<StoreError> for ApplicationError {
    fn from(value: StoreError) -> Self {
        ApplicationError::Persistence(value.to_string())
    }
}
