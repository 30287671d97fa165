use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use leadflow_core::domain::appointment::{Appointment, AppointmentId, AppointmentStatus};
use leadflow_core::domain::conversation::{Conversation, ConversationId, ConversationMode};
use leadflow_core::domain::message::Message;

pub mod appointment;
pub mod conversation;
pub mod memory;
pub mod message;

pub use appointment::SqlAppointmentRepository;
pub use conversation::SqlConversationRepository;
pub use memory::{
    InMemoryAppointmentRepository, InMemoryConversationRepository, InMemoryMessageRepository,
};
pub use message::SqlMessageRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find_active_by_phone(
        &self,
        phone_number: &str,
    ) -> Result<Option<Conversation>, RepositoryError>;

    async fn save(&self, conversation: Conversation) -> Result<(), RepositoryError>;

    /// All active conversations, optionally filtered by handling mode.
    async fn list_active(
        &self,
        mode: Option<ConversationMode>,
    ) -> Result<Vec<Conversation>, RepositoryError>;

    /// Close active conversations not touched since `cutoff`, returning how
    /// many were closed.
    async fn close_stale(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn append(&self, message: Message) -> Result<(), RepositoryError>;

    /// The most recent `limit` messages of a conversation, returned in
    /// chronological order.
    async fn recent(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError>;

    async fn last_customer_message_at(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<DateTime<Utc>>, RepositoryError>;

    async fn last_bot_message_at(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<DateTime<Utc>>, RepositoryError>;

    /// Bot messages in the conversation whose content carries the given
    /// marker text. Used to cap follow-ups and reschedule offers.
    async fn count_bot_messages_containing(
        &self,
        conversation_id: &ConversationId,
        marker: &str,
    ) -> Result<u32, RepositoryError>;
}

#[async_trait]
pub trait AppointmentRepository: Send + Sync {
    async fn insert(&self, appointment: Appointment) -> Result<(), RepositoryError>;

    async fn set_calendar_row(
        &self,
        id: &AppointmentId,
        calendar_row: i64,
    ) -> Result<(), RepositoryError>;

    async fn update_status(
        &self,
        id: &AppointmentId,
        status: AppointmentStatus,
    ) -> Result<(), RepositoryError>;

    /// Slot times already held by scheduled or confirmed appointments on
    /// the given date.
    async fn booked_times_on(&self, date: NaiveDate) -> Result<Vec<String>, RepositoryError>;

    /// Appointments still `scheduled` whose date fell inside
    /// `[since, before)`. These are visits nobody confirmed; the follow-up
    /// sweep reclassifies them as no-shows.
    async fn list_missed(
        &self,
        since: NaiveDate,
        before: NaiveDate,
    ) -> Result<Vec<Appointment>, RepositoryError>;

    /// Every appointment ever booked from this phone, oldest first.
    async fn list_by_phone(&self, phone_number: &str)
        -> Result<Vec<Appointment>, RepositoryError>;
}

pub(crate) fn parse_rfc3339(
    context: &str,
    value: &str,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| RepositoryError::Decode(format!("invalid {context} timestamp: {err}")))
}

pub(crate) fn parse_naive_date(context: &str, value: &str) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|err| RepositoryError::Decode(format!("invalid {context} date: {err}")))
}
