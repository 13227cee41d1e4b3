use std::fmt;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::StoreError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CalendarId(pub String);

impl fmt::Display for CalendarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

/// All-day event with a single reminder `reminder_minutes` before it starts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    pub summary: String,
    pub description: String,
    pub date: NaiveDate,
    pub reminder_minutes: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: EventId,
    pub summary: String,
    pub description: String,
    pub date: NaiveDate,
    pub reminder_minutes: u32,
}

impl CalendarEvent {
    pub fn mentions(&self, needle: &str) -> bool {
        self.summary.contains(needle) || self.description.contains(needle)
    }
}

/// Day window `[start, end)` with an optional free-text filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub query: Option<String>,
}

impl EventWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn list_events(
        &self,
        calendar: &CalendarId,
        window: &EventWindow,
    ) -> Result<Vec<CalendarEvent>, StoreError>;

    async fn insert_event(&self, calendar: &CalendarId, event: NewEvent)
        -> Result<EventId, StoreError>;

    async fn delete_event(&self, calendar: &CalendarId, id: &EventId) -> Result<(), StoreError>;
}
