//! In-memory repositories backing engine tests and the default wiring of
//! components that do not need durable storage.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;

use leadflow_core::domain::appointment::{Appointment, AppointmentId, AppointmentStatus};
use leadflow_core::domain::conversation::{Conversation, ConversationId, ConversationMode};
use leadflow_core::domain::message::{Message, MessageSender};

use super::{
    AppointmentRepository, ConversationRepository, MessageRepository, RepositoryError,
};

#[derive(Default)]
pub struct InMemoryConversationRepository {
    conversations: RwLock<HashMap<String, Conversation>>,
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn find_active_by_phone(
        &self,
        phone_number: &str,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let conversations = self.conversations.read().await;
        Ok(conversations
            .values()
            .filter(|conv| {
                conv.phone_number == phone_number
                    && conv.status == leadflow_core::ConversationStatus::Active
            })
            .max_by(|a, b| a.created_at.cmp(&b.created_at))
            .cloned())
    }

    async fn save(&self, conversation: Conversation) -> Result<(), RepositoryError> {
        let mut conversations = self.conversations.write().await;
        conversations.insert(conversation.id.0.clone(), conversation);
        Ok(())
    }

    async fn list_active(
        &self,
        mode: Option<ConversationMode>,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let conversations = self.conversations.read().await;
        let mut active: Vec<Conversation> = conversations
            .values()
            .filter(|conv| conv.status == leadflow_core::ConversationStatus::Active)
            .filter(|conv| mode.map_or(true, |mode| conv.mode == mode))
            .cloned()
            .collect();
        active.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(active)
    }

    async fn close_stale(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut conversations = self.conversations.write().await;
        let mut closed = 0;
        for conversation in conversations.values_mut() {
            if conversation.status == leadflow_core::ConversationStatus::Active
                && conversation.updated_at < cutoff
            {
                conversation.status = leadflow_core::ConversationStatus::Closed;
                conversation.updated_at = Utc::now();
                closed += 1;
            }
        }
        Ok(closed)
    }
}

#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: RwLock<Vec<Message>>,
}

#[async_trait::async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn append(&self, message: Message) -> Result<(), RepositoryError> {
        let mut messages = self.messages.write().await;
        messages.push(message);
        Ok(())
    }

    async fn recent(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let messages = self.messages.read().await;
        let mut matching: Vec<Message> = messages
            .iter()
            .filter(|message| &message.conversation_id == conversation_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let skip = matching.len().saturating_sub(limit as usize);
        Ok(matching.split_off(skip))
    }

    async fn last_customer_message_at(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<DateTime<Utc>>, RepositoryError> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .filter(|message| {
                &message.conversation_id == conversation_id
                    && message.sender == MessageSender::Customer
            })
            .map(|message| message.created_at)
            .max())
    }

    async fn last_bot_message_at(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<DateTime<Utc>>, RepositoryError> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .filter(|message| {
                &message.conversation_id == conversation_id
                    && message.sender == MessageSender::Bot
            })
            .map(|message| message.created_at)
            .max())
    }

    async fn count_bot_messages_containing(
        &self,
        conversation_id: &ConversationId,
        marker: &str,
    ) -> Result<u32, RepositoryError> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .filter(|message| {
                &message.conversation_id == conversation_id
                    && message.sender == MessageSender::Bot
                    && message.content.contains(marker)
            })
            .count() as u32)
    }
}

#[derive(Default)]
pub struct InMemoryAppointmentRepository {
    appointments: RwLock<HashMap<String, Appointment>>,
}

impl InMemoryAppointmentRepository {
    /// Every stored appointment, oldest first.
    pub async fn all(&self) -> Vec<Appointment> {
        let appointments = self.appointments.read().await;
        let mut all: Vec<Appointment> = appointments.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }
}

#[async_trait::async_trait]
impl AppointmentRepository for InMemoryAppointmentRepository {
    async fn insert(&self, appointment: Appointment) -> Result<(), RepositoryError> {
        let mut appointments = self.appointments.write().await;
        appointments.insert(appointment.id.0.clone(), appointment);
        Ok(())
    }

    async fn set_calendar_row(
        &self,
        id: &AppointmentId,
        calendar_row: i64,
    ) -> Result<(), RepositoryError> {
        let mut appointments = self.appointments.write().await;
        if let Some(appointment) = appointments.get_mut(&id.0) {
            appointment.calendar_row = Some(calendar_row);
            appointment.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_status(
        &self,
        id: &AppointmentId,
        status: AppointmentStatus,
    ) -> Result<(), RepositoryError> {
        let mut appointments = self.appointments.write().await;
        if let Some(appointment) = appointments.get_mut(&id.0) {
            appointment.status = status;
            appointment.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn booked_times_on(&self, date: NaiveDate) -> Result<Vec<String>, RepositoryError> {
        let appointments = self.appointments.read().await;
        let mut times: Vec<String> = appointments
            .values()
            .filter(|appointment| {
                appointment.scheduled_date == date
                    && matches!(
                        appointment.status,
                        AppointmentStatus::Scheduled | AppointmentStatus::Confirmed
                    )
            })
            .map(|appointment| appointment.scheduled_time.clone())
            .collect();
        times.sort();
        Ok(times)
    }

    async fn list_missed(
        &self,
        since: NaiveDate,
        before: NaiveDate,
    ) -> Result<Vec<Appointment>, RepositoryError> {
        let appointments = self.appointments.read().await;
        let mut missed: Vec<Appointment> = appointments
            .values()
            .filter(|appointment| {
                appointment.status == AppointmentStatus::Scheduled
                    && appointment.scheduled_date >= since
                    && appointment.scheduled_date < before
            })
            .cloned()
            .collect();
        missed.sort_by(|a, b| {
            (a.scheduled_date, &a.scheduled_time).cmp(&(b.scheduled_date, &b.scheduled_time))
        });
        Ok(missed)
    }

    async fn list_by_phone(
        &self,
        phone_number: &str,
    ) -> Result<Vec<Appointment>, RepositoryError> {
        let appointments = self.appointments.read().await;
        let mut visits: Vec<Appointment> = appointments
            .values()
            .filter(|appointment| appointment.phone_number == phone_number)
            .cloned()
            .collect();
        visits.sort_by(|a, b| {
            (a.scheduled_date, &a.scheduled_time).cmp(&(b.scheduled_date, &b.scheduled_time))
        });
        Ok(visits)
    }
}
