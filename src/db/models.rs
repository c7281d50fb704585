use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Allow-listed bot user.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One day's recorded hours, keyed by (user_id, work_date).
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct WorkEntry {
    pub user_id: i64,
    pub work_date: NaiveDate,
    pub start_min: i32,
    pub end_min: i32,
    pub break_min: i32,
}

/// A recently used start/end/break triple offered back as a quick-pick.
/// At most four are retained per user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Template {
    pub start_min: i32,
    pub end_min: i32,
    pub break_min: i32,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserSettings {
    pub user_id: i64,
    pub baseline_date: NaiveDate,
    pub baseline_worked_min: i32,
    /// Minutes past local midnight; 0 disables the reminder.
    pub reminder_minutes: i32,
    /// IANA zone name, validated before it is ever persisted.
    pub timezone: String,
    pub updated_at: DateTime<Utc>,
}

impl UserSettings {
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(chrono_tz::UTC)
    }
}
