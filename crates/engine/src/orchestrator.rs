use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use leadflow_agent::{AgentAction, AgentContext, AgentService, ExtractedLead, PriorAppointment};
use leadflow_core::schedule::dates::parse_date;
use leadflow_core::{
    ApplicationError, BusinessHours, Conversation, ConversationId, ConversationMode,
    ConversationStatus, Intention, LeadRecord, LeadTemperature, LeadTracker, LeadUpdate, Message,
    MessageId, MessageSender, OperatorNotifier, TimeOfDay,
};
use leadflow_db::repositories::{
    AppointmentRepository, ConversationRepository, MessageRepository, RepositoryError,
};
use leadflow_whatsapp::{InboundMessage, Outbox};

use crate::booking::{BookingRequest, BookingService};
use crate::AvailabilityService;

const RESTATE_SLOT_REPLY: &str =
    "Não consegui entender a data e o horário que você prefere. Pode me dizer de novo? \
     Por exemplo: amanhã às 10:00.";

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub bot_name: String,
    pub brand_name: String,
    pub hours: BusinessHours,
    /// Messages from the same phone arriving faster than this are dropped.
    pub rate_limit: Duration,
    /// Transcript window handed to the model.
    pub history_window: u32,
    /// Offset applied to UTC before any business-hours or date decision.
    pub utc_offset_minutes: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bot_name: "LeadFlow".to_string(),
            brand_name: "LeadFlow Motors".to_string(),
            hours: BusinessHours::default(),
            rate_limit: Duration::from_secs(2),
            history_window: 15,
            utc_offset_minutes: -180,
        }
    }
}

/// Drives one conversation turn end to end: persist the inbound message,
/// ask the model, apply its action, persist and deliver the reply. Turns
/// for the same phone are serialized through a per-phone lock so two quick
/// messages cannot interleave their reads and writes.
pub struct Orchestrator {
    config: EngineConfig,
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    appointments: Arc<dyn AppointmentRepository>,
    agent: Arc<AgentService>,
    availability: Arc<AvailabilityService>,
    booking: Arc<BookingService>,
    outbox: Arc<Outbox>,
    lead_tracker: Arc<dyn LeadTracker>,
    notifier: Arc<dyn OperatorNotifier>,
    phone_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    last_accepted: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        appointments: Arc<dyn AppointmentRepository>,
        agent: Arc<AgentService>,
        availability: Arc<AvailabilityService>,
        booking: Arc<BookingService>,
        outbox: Arc<Outbox>,
        lead_tracker: Arc<dyn LeadTracker>,
        notifier: Arc<dyn OperatorNotifier>,
    ) -> Self {
        Self {
            config,
            conversations,
            messages,
            appointments,
            agent,
            availability,
            booking,
            outbox,
            lead_tracker,
            notifier,
            phone_locks: Mutex::new(HashMap::new()),
            last_accepted: Mutex::new(HashMap::new()),
        }
    }

    pub async fn process_incoming_message(
        &self,
        inbound: InboundMessage,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        self.process_message(inbound, now, false).await
    }

    /// Same turn pipeline with the business-hours gate skipped. For callers
    /// that replay messages or run outside store hours on purpose.
    pub async fn process_bypassing_hours(
        &self,
        inbound: InboundMessage,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        self.process_message(inbound, now, true).await
    }

    async fn process_message(
        &self,
        inbound: InboundMessage,
        now: DateTime<Utc>,
        bypass_hours_gate: bool,
    ) -> Result<(), ApplicationError> {
        let phone_number = inbound.phone_number.clone();
        let lock = self.lock_for(&phone_number).await;
        let result = {
            let _guard = lock.lock().await;
            self.run_turn(inbound, now, bypass_hours_gate).await
        };
        drop(lock);
        self.discard_idle_lock(&phone_number).await;
        result
    }

    async fn run_turn(
        &self,
        inbound: InboundMessage,
        now: DateTime<Utc>,
        bypass_hours_gate: bool,
    ) -> Result<(), ApplicationError> {
        if self.is_rate_limited(&inbound.phone_number, now).await {
            debug!(phone = %inbound.phone_number, "dropping rate-limited message");
            return Ok(());
        }

        let local_now = self.local_time(now);
        let mut conversation = self.find_or_create_conversation(&inbound.phone_number, now).await?;

        let customer_message = new_message(
            &conversation.id,
            MessageSender::Customer,
            inbound.body.clone(),
            now,
        );
        // Fail closed: a turn whose inbound message cannot be recorded sends
        // nothing out.
        self.messages.append(customer_message).await.map_err(persistence)?;

        // A human took over; the bot only keeps the transcript.
        if conversation.mode == ConversationMode::Human {
            debug!(phone = %inbound.phone_number, "conversation in human mode, message stored only");
            return Ok(());
        }

        if !bypass_hours_gate && !self.config.hours.is_open_at(local_now) {
            let notice = self.off_hours_notice();
            self.finish_turn(&mut conversation, notice, now).await?;
            return Ok(());
        }

        let history = self
            .messages
            .recent(&conversation.id, self.config.history_window)
            .await
            .map_err(persistence)?;
        let availability = self.availability.upcoming(local_now).await;
        let prior_appointments = self.prior_appointments(&inbound.phone_number).await;
        let context = AgentContext::for_conversation(
            &self.config.bot_name,
            &self.config.brand_name,
            &conversation,
            &history,
            availability,
            prior_appointments,
            local_now.date(),
        );
        let response = self.agent.respond(&context).await;

        let was_hot = conversation.lead_temperature == LeadTemperature::Hot;
        merge_extracted(&mut conversation, &response.extracted);

        let reply = match response.action {
            AgentAction::None => response.reply,
            AgentAction::FollowUp => {
                // Re-engagement is the sweeper's job; the reply goes out as is.
                debug!(phone = %inbound.phone_number, "model deferred to a later follow-up");
                response.reply
            }
            AgentAction::Transfer => {
                conversation.mode = ConversationMode::Human;
                info!(phone = %inbound.phone_number, "handing conversation to a human");
                self.notifier.notify_transfer(&inbound.phone_number, &inbound.body).await;
                response.reply
            }
            AgentAction::Close => {
                conversation.status = ConversationStatus::Closed;
                info!(phone = %inbound.phone_number, "conversation closed by the model");
                response.reply
            }
            AgentAction::Schedule => {
                self.handle_schedule(&conversation, &response.extracted, response.reply, local_now)
                    .await?
            }
        };

        self.finish_turn(&mut conversation, reply, now).await?;

        self.push_lead_update(&conversation).await;
        if !was_hot && conversation.lead_temperature == LeadTemperature::Hot {
            let summary = format!(
                "{} interessado em {}",
                conversation.customer_name.as_deref().unwrap_or("Lead"),
                conversation.vehicle.as_deref().unwrap_or("veículo não informado"),
            );
            self.notifier.notify_hot_lead(&inbound.phone_number, &summary).await;
        }

        Ok(())
    }

    /// An operator speaks through the bot's number. Puts the conversation in
    /// human mode so the model stops answering, and records who took over.
    pub async fn send_human_message(
        &self,
        phone_number: &str,
        body: &str,
        agent_label: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        let lock = self.lock_for(phone_number).await;
        let result = {
            let _guard = lock.lock().await;
            self.record_human_message(phone_number, body, agent_label, now).await
        };
        drop(lock);
        self.discard_idle_lock(phone_number).await;
        result
    }

    async fn record_human_message(
        &self,
        phone_number: &str,
        body: &str,
        agent_label: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        let mut conversation = self
            .conversations
            .find_active_by_phone(phone_number)
            .await
            .map_err(persistence)?
            .ok_or_else(|| ApplicationError::NoActiveConversation(phone_number.to_string()))?;

        conversation.mode = ConversationMode::Human;
        if !agent_label.trim().is_empty() {
            conversation.assigned_to = agent_label.trim().to_string();
        }
        conversation.updated_at = now;
        self.conversations.save(conversation.clone()).await.map_err(persistence)?;

        self.messages
            .append(new_message(&conversation.id, MessageSender::Agent, body.to_string(), now))
            .await
            .map_err(persistence)?;
        self.outbox.deliver(phone_number, body).await;
        Ok(())
    }

    /// Hands the conversation back to the model after a human stint.
    pub async fn return_to_ai(
        &self,
        phone_number: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        let lock = self.lock_for(phone_number).await;
        let result = {
            let _guard = lock.lock().await;
            self.restore_ai_mode(phone_number, now).await
        };
        drop(lock);
        self.discard_idle_lock(phone_number).await;
        result
    }

    async fn restore_ai_mode(
        &self,
        phone_number: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        let mut conversation = self
            .conversations
            .find_active_by_phone(phone_number)
            .await
            .map_err(persistence)?
            .ok_or_else(|| ApplicationError::NoActiveConversation(phone_number.to_string()))?;

        conversation.mode = ConversationMode::Ai;
        conversation.assigned_to = self.config.bot_name.clone();
        conversation.updated_at = now;
        self.conversations.save(conversation).await.map_err(persistence)?;
        info!(phone = %phone_number, "conversation returned to the assistant");
        Ok(())
    }

    async fn handle_schedule(
        &self,
        conversation: &Conversation,
        extracted: &ExtractedLead,
        model_reply: String,
        local_now: NaiveDateTime,
    ) -> Result<String, ApplicationError> {
        // Booking needs the full lead sheet plus an explicit slot; with
        // anything missing the model's own reply keeps the funnel moving.
        let (Some(customer_name), Some(date_phrase), Some(time_phrase)) = (
            conversation.customer_name.clone(),
            extracted.desired_date.as_deref(),
            extracted.desired_time.as_deref(),
        ) else {
            return Ok(model_reply);
        };
        if conversation.vehicle.is_none() {
            return Ok(model_reply);
        }

        let parsed_date = parse_date(date_phrase, local_now.date());
        let parsed_time = time_phrase.parse::<TimeOfDay>().ok();
        let (Some(date), Some(time)) = (parsed_date, parsed_time) else {
            debug!(
                phone = %conversation.phone_number,
                date_phrase,
                time_phrase,
                "could not parse requested slot, asking the customer to restate"
            );
            return Ok(RESTATE_SLOT_REPLY.to_string());
        };

        let request = BookingRequest {
            conversation_id: conversation.id.clone(),
            customer_name,
            phone_number: conversation.phone_number.clone(),
            vehicle: conversation.vehicle.clone(),
            city: conversation.city.clone().unwrap_or_default(),
            date,
            time,
        };
        let outcome = self.booking.book(request, local_now).await?;
        Ok(outcome.reply().to_string())
    }

    /// Persist the conversation and the reply, then hand the reply to the
    /// outbox. A turn whose writes fail sends nothing out.
    async fn finish_turn(
        &self,
        conversation: &mut Conversation,
        reply: String,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        conversation.updated_at = now;
        self.conversations.save(conversation.clone()).await.map_err(persistence)?;
        self.messages
            .append(new_message(&conversation.id, MessageSender::Bot, reply.clone(), now))
            .await
            .map_err(persistence)?;

        self.outbox.deliver(&conversation.phone_number, &reply).await;
        Ok(())
    }

    async fn find_or_create_conversation(
        &self,
        phone_number: &str,
        now: DateTime<Utc>,
    ) -> Result<Conversation, ApplicationError> {
        if let Some(existing) = self
            .conversations
            .find_active_by_phone(phone_number)
            .await
            .map_err(persistence)?
        {
            return Ok(existing);
        }

        let conversation = Conversation {
            id: ConversationId(Uuid::new_v4().to_string()),
            phone_number: phone_number.to_string(),
            status: ConversationStatus::Active,
            mode: ConversationMode::Ai,
            assigned_to: self.config.bot_name.clone(),
            customer_name: None,
            vehicle: None,
            city: None,
            intention: Intention::Unset,
            lead_temperature: LeadTemperature::Warm,
            created_at: now,
            updated_at: now,
        };
        self.conversations.save(conversation.clone()).await.map_err(persistence)?;
        info!(phone = %phone_number, "new conversation opened");

        if let Err(tracker_error) = self
            .lead_tracker
            .register_lead(LeadRecord {
                phone_number: phone_number.to_string(),
                customer_name: None,
                vehicle: None,
                city: None,
                intention: Intention::Unset,
                temperature: LeadTemperature::Warm,
            })
            .await
        {
            warn!(phone = %phone_number, error = %tracker_error, "lead registration failed");
        }

        Ok(conversation)
    }

    /// Earlier visits from this phone, for the model's context. Best-effort:
    /// a failed lookup degrades to an empty history, never aborts the turn.
    async fn prior_appointments(&self, phone_number: &str) -> Vec<PriorAppointment> {
        match self.appointments.list_by_phone(phone_number).await {
            Ok(visits) => visits
                .into_iter()
                .map(|visit| PriorAppointment {
                    date: visit.scheduled_date,
                    time: visit.scheduled_time,
                    status: visit.status.as_str().to_string(),
                })
                .collect(),
            Err(repository_error) => {
                warn!(
                    phone = %phone_number,
                    error = %repository_error,
                    "prior appointment lookup failed"
                );
                Vec::new()
            }
        }
    }

    async fn push_lead_update(&self, conversation: &Conversation) {
        let update = LeadUpdate {
            customer_name: conversation.customer_name.clone(),
            vehicle: conversation.vehicle.clone(),
            city: conversation.city.clone(),
            intention: Some(conversation.intention),
            temperature: Some(conversation.lead_temperature),
            status: None,
        };
        if let Err(tracker_error) =
            self.lead_tracker.update_lead(&conversation.phone_number, update).await
        {
            warn!(
                phone = %conversation.phone_number,
                error = %tracker_error,
                "lead update failed"
            );
        }
    }

    async fn lock_for(&self, phone_number: &str) -> Arc<Mutex<()>> {
        let mut locks = self.phone_locks.lock().await;
        locks.entry(phone_number.to_string()).or_default().clone()
    }

    /// Drops the per-phone lock once nobody else holds it, so the table only
    /// carries phones with a turn in flight.
    async fn discard_idle_lock(&self, phone_number: &str) {
        let mut locks = self.phone_locks.lock().await;
        if locks.get(phone_number).is_some_and(|entry| Arc::strong_count(entry) == 1) {
            locks.remove(phone_number);
        }
    }

    async fn is_rate_limited(&self, phone_number: &str, now: DateTime<Utc>) -> bool {
        let window = chrono::Duration::from_std(self.config.rate_limit)
            .unwrap_or_else(|_| chrono::Duration::seconds(2));
        let mut last = self.last_accepted.lock().await;
        // Entries outside the window can no longer limit anything.
        last.retain(|_, accepted_at| now - *accepted_at < window);
        if last.contains_key(phone_number) {
            return true;
        }
        last.insert(phone_number.to_string(), now);
        false
    }

    fn local_time(&self, now: DateTime<Utc>) -> NaiveDateTime {
        let offset = FixedOffset::east_opt(self.config.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix());
        now.with_timezone(&offset).naive_local()
    }

    fn off_hours_notice(&self) -> String {
        format!(
            "Olá! No momento estamos fora do nosso horário de atendimento (das {} às {}). \
             Pode deixar sua mensagem que te respondo assim que a loja abrir!",
            self.config.hours.start, self.config.hours.end
        )
    }
}

fn merge_extracted(conversation: &mut Conversation, extracted: &ExtractedLead) {
    if let Some(name) = non_empty(&extracted.customer_name) {
        conversation.customer_name = Some(name);
    }
    if let Some(vehicle) = non_empty(&extracted.vehicle) {
        conversation.vehicle = Some(vehicle);
    }
    if let Some(city) = non_empty(&extracted.city) {
        conversation.city = Some(city);
    }
    if let Some(intention) = extracted.intention {
        if intention != Intention::Unset {
            conversation.intention = intention;
        }
    }
    if let Some(temperature) = extracted.temperature {
        conversation.lead_temperature = temperature;
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|trimmed| !trimmed.is_empty())
        .map(str::to_string)
}

fn new_message(
    conversation_id: &ConversationId,
    sender: MessageSender,
    content: String,
    at: DateTime<Utc>,
) -> Message {
    Message {
        id: MessageId(Uuid::new_v4().to_string()),
        conversation_id: conversation_id.clone(),
        sender,
        content,
        created_at: at,
    }
}

fn persistence(error: RepositoryError) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}
