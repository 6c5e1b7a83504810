use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Owner id stamped on records that only ever live in device-local storage.
pub const LOCAL_OWNER_ID: &str = "local";

pub const DEFAULT_WORK_SECONDS: u32 = 25 * 60;
pub const DEFAULT_SHORT_BREAK_SECONDS: u32 = 5 * 60;
pub const DEFAULT_LONG_BREAK_SECONDS: u32 = 15 * 60;
pub const DEFAULT_SESSIONS_UNTIL_LONG_BREAK: u32 = 4;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionUser {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub token_type: String,
    pub user: SessionUser,
}

impl Session {
    pub fn is_valid_at(&self, now: DateTime<Utc>, leeway_seconds: i64) -> bool {
        self.expires_at > now + Duration::seconds(leeway_seconds)
            && !self.access_token.trim().is_empty()
    }

    pub fn owner_id(&self) -> &str {
        &self.user.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub user_id: String,
    pub text: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDraft {
    pub text: String,
}

impl TaskDraft {
    /// Returns `None` for blank input; the text itself is kept as typed.
    pub fn new(text: &str) -> Option<Self> {
        if text.trim().is_empty() {
            return None;
        }
        Some(Self {
            text: text.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimerDurations {
    pub work_duration: u32,
    pub short_break_duration: u32,
    pub long_break_duration: u32,
    pub sessions_until_long_break: u32,
}

impl Default for TimerDurations {
    fn default() -> Self {
        Self {
            work_duration: DEFAULT_WORK_SECONDS,
            short_break_duration: DEFAULT_SHORT_BREAK_SECONDS,
            long_break_duration: DEFAULT_LONG_BREAK_SECONDS,
            sessions_until_long_break: DEFAULT_SESSIONS_UNTIL_LONG_BREAK,
        }
    }
}

impl TimerDurations {
    pub fn validate(&self) -> Result<(), String> {
        if self.work_duration == 0 {
            return Err("settings.work_duration must be > 0".to_string());
        }
        if self.short_break_duration == 0 {
            return Err("settings.short_break_duration must be > 0".to_string());
        }
        if self.long_break_duration == 0 {
            return Err("settings.long_break_duration must be > 0".to_string());
        }
        if self.sessions_until_long_break == 0 {
            return Err("settings.sessions_until_long_break must be > 0".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimerSettings {
    pub id: String,
    pub user_id: String,
    pub work_duration: u32,
    pub short_break_duration: u32,
    pub long_break_duration: u32,
    pub sessions_until_long_break: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TimerSettings {
    pub fn durations(&self) -> TimerDurations {
        TimerDurations {
            work_duration: self.work_duration,
            short_break_duration: self.short_break_duration,
            long_break_duration: self.long_break_duration,
            sessions_until_long_break: self.sessions_until_long_break,
        }
    }

    pub fn apply_durations(&mut self, durations: TimerDurations) {
        self.work_duration = durations.work_duration;
        self.short_break_duration = durations.short_break_duration;
        self.long_break_duration = durations.long_break_duration;
        self.sessions_until_long_break = durations.sessions_until_long_break;
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Facet {
    Wifi,
    Food,
    Drinks,
    Charging,
}

impl Facet {
    /// Declaration order; search keywords are appended in this order.
    pub const ALL: [Facet; 4] = [Facet::Wifi, Facet::Food, Facet::Drinks, Facet::Charging];

    pub fn keyword(self) -> &'static str {
        match self {
            Self::Wifi => "wifi",
            Self::Food => "food",
            Self::Drinks => "coffee",
            Self::Charging => "power outlets",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "wifi" | "wi-fi" => Some(Self::Wifi),
            "food" => Some(Self::Food),
            "drinks" => Some(Self::Drinks),
            "charging" => Some(Self::Charging),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Filter {
    pub wifi: bool,
    pub food: bool,
    pub drinks: bool,
    pub charging: bool,
}

impl Filter {
    pub fn is_enabled(&self, facet: Facet) -> bool {
        match facet {
            Facet::Wifi => self.wifi,
            Facet::Food => self.food,
            Facet::Drinks => self.drinks,
            Facet::Charging => self.charging,
        }
    }

    pub fn toggle(&mut self, facet: Facet) {
        let slot = match facet {
            Facet::Wifi => &mut self.wifi,
            Facet::Food => &mut self.food,
            Facet::Drinks => &mut self.drinks,
            Facet::Charging => &mut self.charging,
        };
        *slot = !*slot;
    }

    pub fn enabled_facets(&self) -> impl Iterator<Item = Facet> + '_ {
        Facet::ALL
            .into_iter()
            .filter(move |facet| self.is_enabled(*facet))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StudySpot {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub address: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub has_wifi: bool,
    pub has_food: bool,
    pub has_drinks: bool,
    pub has_charging: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StudySpot {
    pub fn amenities(&self) -> Filter {
        Filter {
            wifi: self.has_wifi,
            food: self.has_food,
            drinks: self.has_drinks,
            charging: self.has_charging,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudySpotDraft {
    pub name: String,
    pub address: Option<String>,
    pub amenities: Filter,
    pub notes: Option<String>,
}

impl StudySpotDraft {
    pub fn new(name: &str, address: Option<&str>, amenities: Filter, notes: Option<&str>) -> Option<Self> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            address: normalize_optional(address),
            amenities,
            notes: normalize_optional(notes),
        })
    }
}

fn normalize_optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}
