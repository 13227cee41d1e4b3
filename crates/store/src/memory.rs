use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::RwLock;

use crate::events::{CalendarEvent, CalendarId, EventId, EventStore, EventWindow, NewEvent};
use crate::tabular::{Row, TabSpec, TableId, TabularStore};
use crate::StoreError;

#[derive(Default)]
struct Table {
    tabs: HashMap<String, Vec<Row>>,
}

#[derive(Default)]
pub struct InMemoryTabularStore {
    tables: RwLock<HashMap<String, Table>>,
    next_id: AtomicU64,
    unavailable: AtomicBool,
}

impl InMemoryTabularStore {
    /// Makes every subsequent call fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("tabular store is offline".to_string()));
        }
        Ok(())
    }
}

fn tab_mut<'a>(
    tables: &'a mut HashMap<String, Table>,
    table: &TableId,
    tab: &str,
) -> Result<&'a mut Vec<Row>, StoreError> {
    tables
        .get_mut(&table.0)
        .ok_or_else(|| StoreError::TableNotFound(table.0.clone()))?
        .tabs
        .get_mut(tab)
        .ok_or_else(|| StoreError::TabNotFound { table: table.0.clone(), tab: tab.to_string() })
}

#[async_trait::async_trait]
impl TabularStore for InMemoryTabularStore {
    async fn read_rows(&self, table: &TableId, tab: &str) -> Result<Vec<Row>, StoreError> {
        self.check_available()?;
        let tables = self.tables.read().await;
        let rows = tables
            .get(&table.0)
            .ok_or_else(|| StoreError::TableNotFound(table.0.clone()))?
            .tabs
            .get(tab)
            .ok_or_else(|| StoreError::TabNotFound {
                table: table.0.clone(),
                tab: tab.to_string(),
            })?;
        Ok(rows.clone())
    }

    async fn append_rows(
        &self,
        table: &TableId,
        tab: &str,
        rows: Vec<Row>,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        tab_mut(&mut tables, table, tab)?.extend(rows);
        Ok(())
    }

    async fn update_cells(
        &self,
        table: &TableId,
        tab: &str,
        row_index: usize,
        first_column: usize,
        values: Row,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        let rows = tab_mut(&mut tables, table, tab)?;
        let row = rows
            .get_mut(row_index)
            .ok_or_else(|| StoreError::RowOutOfRange { tab: tab.to_string(), row: row_index })?;

        let needed = first_column + values.len();
        if row.len() < needed {
            row.resize(needed, String::new());
        }
        for (offset, value) in values.into_iter().enumerate() {
            row[first_column + offset] = value;
        }
        Ok(())
    }

    async fn delete_rows(
        &self,
        table: &TableId,
        tab: &str,
        start: usize,
        end: usize,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        let rows = tab_mut(&mut tables, table, tab)?;
        if start >= end || end > rows.len() {
            return Err(StoreError::RowOutOfRange { tab: tab.to_string(), row: end });
        }
        rows.drain(start..end);
        Ok(())
    }

    async fn create_table(&self, title: &str, tabs: Vec<TabSpec>) -> Result<TableId, StoreError> {
        self.check_available()?;
        let sequence = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let slug: String = title
            .chars()
            .map(|ch| if ch.is_ascii_alphanumeric() { ch.to_ascii_lowercase() } else { '-' })
            .collect();
        let id = TableId(format!("{slug}-{sequence}"));

        let table = Table {
            tabs: tabs.into_iter().map(|spec| (spec.name, vec![spec.headers])).collect(),
        };
        self.tables.write().await.insert(id.0.clone(), table);
        Ok(id)
    }
}

#[derive(Default)]
pub struct InMemoryEventStore {
    calendars: RwLock<HashMap<String, Vec<CalendarEvent>>>,
    next_id: AtomicU64,
    unavailable: AtomicBool,
}

impl InMemoryEventStore {
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Every event in the calendar, ordered by date.
    pub async fn all_events(&self, calendar: &CalendarId) -> Vec<CalendarEvent> {
        let calendars = self.calendars.read().await;
        let mut events = calendars.get(&calendar.0).cloned().unwrap_or_default();
        events.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.0.cmp(&b.id.0)));
        events
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("event store is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl EventStore for InMemoryEventStore {
    async fn list_events(
        &self,
        calendar: &CalendarId,
        window: &EventWindow,
    ) -> Result<Vec<CalendarEvent>, StoreError> {
        self.check_available()?;
        let calendars = self.calendars.read().await;
        let events = calendars
            .get(&calendar.0)
            .map(|events| {
                events
                    .iter()
                    .filter(|event| window.contains(event.date))
                    .filter(|event| window.query.as_deref().map_or(true, |q| event.mentions(q)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(events)
    }

    async fn insert_event(
        &self,
        calendar: &CalendarId,
        event: NewEvent,
    ) -> Result<EventId, StoreError> {
        self.check_available()?;
        let id = EventId(format!("evt-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1));
        let stored = CalendarEvent {
            id: id.clone(),
            summary: event.summary,
            description: event.description,
            date: event.date,
            reminder_minutes: event.reminder_minutes,
        };
        self.calendars.write().await.entry(calendar.0.clone()).or_default().push(stored);
        Ok(id)
    }

    async fn delete_event(&self, calendar: &CalendarId, id: &EventId) -> Result<(), StoreError> {
        self.check_available()?;
        let mut calendars = self.calendars.write().await;
        let events = calendars
            .get_mut(&calendar.0)
            .ok_or_else(|| StoreError::EventNotFound(id.0.clone()))?;
        let before = events.len();
        events.retain(|event| &event.id != id);
        if events.len() == before {
            return Err(StoreError::EventNotFound(id.0.clone()));
        }
        Ok(())
    }
}
