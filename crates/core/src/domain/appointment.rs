use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::conversation::ConversationId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppointmentId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Cancelled,
    NoShow,
    Rescheduled,
}

/// A booked store visit. The conversation link is optional so that deleting
/// a conversation never takes the appointment with it. Slot uniqueness is
/// advisory: the external calendar read at validation time is the only
/// conflict check, there is no database constraint on (date, time).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    pub conversation_id: Option<ConversationId>,
    pub customer_name: String,
    pub phone_number: String,
    pub vehicle: Option<String>,
    pub city: String,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: String,
    pub status: AppointmentStatus,
    pub created_by: String,
    pub calendar_row: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::NoShow => "no_show",
            Self::Rescheduled => "rescheduled",
        }
    }
}

impl std::str::FromStr for AppointmentStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "scheduled" => Ok(Self::Scheduled),
            "confirmed" => Ok(Self::Confirmed),
            "cancelled" => Ok(Self::Cancelled),
            "no_show" => Ok(Self::NoShow),
            "rescheduled" => Ok(Self::Rescheduled),
            other => Err(DomainError::UnknownVariant {
                field: "appointment.status",
                value: other.to_string(),
            }),
        }
    }
}
