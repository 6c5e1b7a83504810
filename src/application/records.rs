use crate::domain::models::{StudySpot, StudySpotDraft, Task, TaskDraft, TimerDurations, TimerSettings};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOrder {
    NewestFirst,
    OldestFirst,
}

/// A record kind the dual-mode store can hold: where it lives on each
/// backend, how it is ordered, and how drafts become rows.
pub trait StoreRecord: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Draft: Send + Sync;

    const TABLE: &'static str;
    const LOCAL_SLOT: &'static str;
    const ID_PREFIX: &'static str;
    const ORDER: RecordOrder;

    fn id(&self) -> &str;

    /// A record that never leaves the device; timestamps and id come from here.
    fn from_local_draft(draft: &Self::Draft, id: String, owner_id: &str, now: DateTime<Utc>) -> Self;

    /// Insert body for the hosted table; the service assigns id and timestamps.
    fn insert_row(draft: &Self::Draft, owner_id: &str) -> Value;

    /// Columns sent with an update.
    fn update_row(&self) -> Value;

    fn touch(&mut self, now: DateTime<Utc>);
}

impl StoreRecord for Task {
    type Draft = TaskDraft;

    const TABLE: &'static str = "tasks";
    const LOCAL_SLOT: &'static str = "productivityHubTasks";
    const ID_PREFIX: &'static str = "tsk";
    const ORDER: RecordOrder = RecordOrder::NewestFirst;

    fn id(&self) -> &str {
        &self.id
    }

    fn from_local_draft(draft: &TaskDraft, id: String, owner_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id: owner_id.to_string(),
            text: draft.text.clone(),
            completed: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn insert_row(draft: &TaskDraft, owner_id: &str) -> Value {
        json!({
            "user_id": owner_id,
            "text": draft.text,
            "completed": false,
        })
    }

    fn update_row(&self) -> Value {
        json!({
            "text": self.text,
            "completed": self.completed,
            "updated_at": self.updated_at,
        })
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

impl StoreRecord for TimerSettings {
    type Draft = TimerDurations;

    const TABLE: &'static str = "pomodoro_settings";
    const LOCAL_SLOT: &'static str = "productivityHubPomodoroSettings";
    const ID_PREFIX: &'static str = "set";
    const ORDER: RecordOrder = RecordOrder::OldestFirst;

    fn id(&self) -> &str {
        &self.id
    }

    fn from_local_draft(draft: &TimerDurations, id: String, owner_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id: owner_id.to_string(),
            work_duration: draft.work_duration,
            short_break_duration: draft.short_break_duration,
            long_break_duration: draft.long_break_duration,
            sessions_until_long_break: draft.sessions_until_long_break,
            created_at: now,
            updated_at: now,
        }
    }

    fn insert_row(draft: &TimerDurations, owner_id: &str) -> Value {
        json!({
            "user_id": owner_id,
            "work_duration": draft.work_duration,
            "short_break_duration": draft.short_break_duration,
            "long_break_duration": draft.long_break_duration,
            "sessions_until_long_break": draft.sessions_until_long_break,
        })
    }

    fn update_row(&self) -> Value {
        json!({
            "work_duration": self.work_duration,
            "short_break_duration": self.short_break_duration,
            "long_break_duration": self.long_break_duration,
            "sessions_until_long_break": self.sessions_until_long_break,
            "updated_at": self.updated_at,
        })
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

impl StoreRecord for StudySpot {
    type Draft = StudySpotDraft;

    const TABLE: &'static str = "study_spots";
    const LOCAL_SLOT: &'static str = "productivityHubFavoriteSpots";
    const ID_PREFIX: &'static str = "spt";
    const ORDER: RecordOrder = RecordOrder::OldestFirst;

    fn id(&self) -> &str {
        &self.id
    }

    fn from_local_draft(draft: &StudySpotDraft, id: String, owner_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id: owner_id.to_string(),
            name: draft.name.clone(),
            address: draft.address.clone(),
            latitude: 0.0,
            longitude: 0.0,
            has_wifi: draft.amenities.wifi,
            has_food: draft.amenities.food,
            has_drinks: draft.amenities.drinks,
            has_charging: draft.amenities.charging,
            notes: draft.notes.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    fn insert_row(draft: &StudySpotDraft, owner_id: &str) -> Value {
        json!({
            "user_id": owner_id,
            "name": draft.name,
            "address": draft.address,
            "latitude": 0.0,
            "longitude": 0.0,
            "has_wifi": draft.amenities.wifi,
            "has_food": draft.amenities.food,
            "has_drinks": draft.amenities.drinks,
            "has_charging": draft.amenities.charging,
            "notes": draft.notes,
        })
    }

    fn update_row(&self) -> Value {
        json!({
            "name": self.name,
            "address": self.address,
            "has_wifi": self.has_wifi,
            "has_food": self.has_food,
            "has_drinks": self.has_drinks,
            "has_charging": self.has_charging,
            "notes": self.notes,
            "updated_at": self.updated_at,
        })
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}
