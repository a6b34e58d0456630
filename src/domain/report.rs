use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReportReason {
    Spam,
    Harassment,
    Inappropriate,
    Fraud,
    Other,
}

impl ReportReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Spam => "spam",
            Self::Harassment => "harassment",
            Self::Inappropriate => "inappropriate",
            Self::Fraud => "fraud",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ReportReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spam" => Ok(Self::Spam),
            "harassment" => Ok(Self::Harassment),
            "inappropriate" => Ok(Self::Inappropriate),
            "fraud" => Ok(Self::Fraud),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown report reason: {other}")),
        }
    }
}

/// A report filed against a single message or a whole conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub id: Uuid,
    pub reporter_id: Uuid,
    pub appointment_id: Uuid,
    pub message_id: Option<Uuid>,
    pub reason: ReportReason,
    pub details: Option<String>,
    pub created_at: OffsetDateTime,
}
