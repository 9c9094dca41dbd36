use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered guest. `name` is the registry key; lookups are
/// case-insensitive while the stored spelling is preserved.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GuestRecord {
    pub name: String,
    pub phone: String,
    pub seat: String,
    pub image_url: Option<String>,
    pub checked_in: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row of a roster import. Field aliases match the spreadsheet headers
/// the import tooling produces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportRow {
    #[serde(alias = "Name")]
    pub name: String,
    #[serde(alias = "Phone")]
    pub phone: String,
    #[serde(default, alias = "Seat", alias = "Seat Number")]
    pub seat: Option<String>,
    #[serde(default, alias = "ImageURL", alias = "Image URL")]
    pub image_url: Option<String>,
}

/// One row of a bulk broadcast. Consumed directly for a one-off send;
/// never written to the registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BroadcastRow {
    #[serde(alias = "Name")]
    pub name: String,
    #[serde(alias = "Phone")]
    pub phone: String,
    #[serde(default, alias = "Seat", alias = "Seat Number")]
    pub seat: Option<String>,
    #[serde(default, alias = "ImageURL", alias = "Image URL")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    SentWithMedia,
    SentTextOnly,
    Skipped,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::SentWithMedia => "sent-with-media",
            Outcome::SentTextOnly => "sent-text-only",
            Outcome::Skipped => "skipped",
            Outcome::Failed => "failed",
        }
    }

    pub fn is_sent(&self) -> bool {
        matches!(self, Outcome::SentWithMedia | Outcome::SentTextOnly)
    }
}

/// Per-recipient outcome of one send attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResult {
    pub recipient: String,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastStatus {
    Running,
    Completed,
    Cancelled,
}

impl BroadcastStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BroadcastStatus::Running => "running",
            BroadcastStatus::Completed => "completed",
            BroadcastStatus::Cancelled => "cancelled",
        }
    }
}

/// Aggregate outcome of one bulk broadcast. `total` counts every row
/// considered, including skipped ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkReport {
    pub id: Uuid,
    pub status: BroadcastStatus,
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    pub failures: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BulkReport {
    pub fn new(total: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: BroadcastStatus::Running,
            total,
            sent: 0,
            failed: 0,
            skipped: 0,
            failures: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn record(&mut self, result: &DispatchResult) {
        match result.outcome {
            Outcome::SentWithMedia | Outcome::SentTextOnly => self.sent += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed => {
                self.failed += 1;
                self.failures.push(result.recipient.clone());
            }
        }
    }

    pub fn finish(&mut self, status: BroadcastStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}
