use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use leadflow_core::domain::message::{FOLLOW_UP_MARKER, RESCHEDULE_MARKER};
use leadflow_core::{
    AppointmentStatus, Conversation, ConversationMode, Message, MessageId, MessageSender,
};
use leadflow_db::repositories::{
    AppointmentRepository, ConversationRepository, MessageRepository, RepositoryError,
};
use leadflow_whatsapp::Outbox;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FollowUpConfig {
    pub sweep_interval: Duration,
    /// Idle time before the first re-engagement message.
    pub first_after: Duration,
    /// Idle time before the second and last one.
    pub second_after: Duration,
    pub max_follow_ups: u32,
    /// How many days back the no-show sweep looks for missed visits.
    pub no_show_lookback_days: i64,
    /// Active conversations untouched for this long are closed.
    pub expire_after: Duration,
    /// Offset applied to UTC before comparing appointment dates.
    pub utc_offset_minutes: i32,
}

impl Default for FollowUpConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30 * 60),
            first_after: Duration::from_secs(2 * 3600),
            second_after: Duration::from_secs(24 * 3600),
            max_follow_ups: 2,
            no_show_lookback_days: 2,
            expire_after: Duration::from_secs(7 * 24 * 3600),
            utc_offset_minutes: -180,
        }
    }
}

/// What one sweep did, for the logs and for tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub follow_ups_sent: u32,
    pub reschedules_sent: u32,
    pub conversations_closed: u64,
}

/// Periodic background pass over quiet conversations: nudges customers who
/// went silent mid-funnel, offers one reschedule after a missed visit, and
/// expires conversations nobody touched in a week. Only conversations the
/// bot still owns are nudged; human-mode ones are left alone.
pub struct FollowUpScheduler {
    config: FollowUpConfig,
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    appointments: Arc<dyn AppointmentRepository>,
    outbox: Arc<Outbox>,
}

impl FollowUpScheduler {
    pub fn new(
        config: FollowUpConfig,
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        appointments: Arc<dyn AppointmentRepository>,
        outbox: Arc<Outbox>,
    ) -> Self {
        Self { config, conversations, messages, appointments, outbox }
    }

    /// Periodic sweeper. The caller aborts the handle on shutdown.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.config.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let report = scheduler.run_sweep(Utc::now()).await;
                if report != SweepReport::default() {
                    info!(
                        follow_ups = report.follow_ups_sent,
                        reschedules = report.reschedules_sent,
                        closed = report.conversations_closed,
                        "follow-up sweep done"
                    );
                }
            }
        })
    }

    pub async fn run_sweep(&self, now: DateTime<Utc>) -> SweepReport {
        SweepReport {
            follow_ups_sent: self.sweep_idle_conversations(now).await,
            reschedules_sent: self.sweep_no_shows(now).await,
            conversations_closed: self.sweep_expired(now).await,
        }
    }

    async fn sweep_idle_conversations(&self, now: DateTime<Utc>) -> u32 {
        let active = match self.conversations.list_active(Some(ConversationMode::Ai)).await {
            Ok(active) => active,
            Err(repository_error) => {
                warn!(error = %repository_error, "could not list active conversations");
                return 0;
            }
        };

        let mut sent = 0;
        for conversation in active {
            match self.maybe_follow_up(&conversation, now).await {
                Ok(true) => sent += 1,
                Ok(false) => {}
                Err(repository_error) => {
                    warn!(
                        phone = %conversation.phone_number,
                        error = %repository_error,
                        "follow-up check failed"
                    );
                }
            }
        }
        sent
    }

    async fn maybe_follow_up(
        &self,
        conversation: &Conversation,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let Some(last_bot_at) = self.messages.last_bot_message_at(&conversation.id).await? else {
            return Ok(false);
        };
        let last_customer_at = self.messages.last_customer_message_at(&conversation.id).await?;
        // The customer answered; the ball is in the bot's court, not theirs.
        if last_customer_at.is_some_and(|at| at > last_bot_at) {
            return Ok(false);
        }

        let already_sent = self
            .messages
            .count_bot_messages_containing(&conversation.id, FOLLOW_UP_MARKER)
            .await?;
        if already_sent >= self.config.max_follow_ups {
            return Ok(false);
        }

        let first = chrono::Duration::from_std(self.config.first_after)
            .unwrap_or_else(|_| chrono::Duration::hours(2));
        let second = chrono::Duration::from_std(self.config.second_after)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let idle = now - last_bot_at;

        // The gentle nudge only fits the first day of silence. Past a full
        // day the farewell text goes out instead, also when no nudge was
        // ever sent.
        let attempt = if already_sent == 0 && idle >= first && idle < second {
            0
        } else if idle >= second {
            1
        } else {
            return Ok(false);
        };

        let text = follow_up_text(attempt, conversation.customer_name.as_deref());
        debug!(phone = %conversation.phone_number, attempt = already_sent + 1, "sending follow-up");
        self.outbox.deliver(&conversation.phone_number, &text).await;
        self.messages
            .append(marked_message(conversation, &text, FOLLOW_UP_MARKER, now))
            .await?;
        Ok(true)
    }

    /// Visits whose date passed while still `scheduled` become no-shows,
    /// and each gets at most one reschedule offer through its conversation.
    async fn sweep_no_shows(&self, now: DateTime<Utc>) -> u32 {
        let today = self.local_date(now);
        let since = today - chrono::Duration::days(self.config.no_show_lookback_days);
        let missed = match self.appointments.list_missed(since, today).await {
            Ok(missed) => missed,
            Err(repository_error) => {
                warn!(error = %repository_error, "could not list missed appointments");
                return 0;
            }
        };

        let mut sent = 0;
        for appointment in missed {
            if let Err(repository_error) = self
                .appointments
                .update_status(&appointment.id, AppointmentStatus::NoShow)
                .await
            {
                warn!(
                    phone = %appointment.phone_number,
                    error = %repository_error,
                    "could not mark appointment as no-show"
                );
                continue;
            }
            info!(
                phone = %appointment.phone_number,
                date = %appointment.scheduled_date,
                "appointment marked as no-show"
            );

            let Some(conversation_id) = appointment.conversation_id.clone() else {
                continue;
            };

            let already_offered = match self
                .messages
                .count_bot_messages_containing(&conversation_id, RESCHEDULE_MARKER)
                .await
            {
                Ok(count) => count,
                Err(repository_error) => {
                    warn!(
                        phone = %appointment.phone_number,
                        error = %repository_error,
                        "reschedule check failed"
                    );
                    continue;
                }
            };
            if already_offered > 0 {
                continue;
            }

            let text = reschedule_text(&appointment.customer_name);
            self.outbox.deliver(&appointment.phone_number, &text).await;
            let message = Message {
                id: MessageId(Uuid::new_v4().to_string()),
                conversation_id,
                sender: MessageSender::Bot,
                content: format!("{text} {RESCHEDULE_MARKER}"),
                created_at: now,
            };
            if let Err(repository_error) = self.messages.append(message).await {
                warn!(
                    phone = %appointment.phone_number,
                    error = %repository_error,
                    "reschedule offer could not be recorded"
                );
            }
            sent += 1;
        }
        sent
    }

    fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        let offset = FixedOffset::east_opt(self.config.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix());
        now.with_timezone(&offset).date_naive()
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> u64 {
        let expire_after = chrono::Duration::from_std(self.config.expire_after)
            .unwrap_or_else(|_| chrono::Duration::days(7));
        match self.conversations.close_stale(now - expire_after).await {
            Ok(closed) => closed,
            Err(repository_error) => {
                warn!(error = %repository_error, "could not close stale conversations");
                0
            }
        }
    }
}

fn follow_up_text(already_sent: u32, customer_name: Option<&str>) -> String {
    let greeting = match customer_name.and_then(|name| name.split_whitespace().next()) {
        Some(first) => format!("Oi, {first}!"),
        None => "Oi!".to_string(),
    };
    if already_sent == 0 {
        format!("{greeting} Nossa conversa ficou pela metade. Posso continuar te ajudando?")
    } else {
        format!(
            "{greeting} Ainda estou por aqui se quiser retomar. \
             É só mandar uma mensagem quando for um bom momento!"
        )
    }
}

fn reschedule_text(customer_name: &str) -> String {
    let first = customer_name.split_whitespace().next().unwrap_or(customer_name);
    format!(
        "Oi, {first}! Sentimos sua falta na visita que estava marcada. \
         Quer remarcar? Tenho horários livres nos próximos dias."
    )
}

fn marked_message(
    conversation: &Conversation,
    text: &str,
    marker: &str,
    at: DateTime<Utc>,
) -> Message {
    Message {
        id: MessageId(Uuid::new_v4().to_string()),
        conversation_id: conversation.id.clone(),
        sender: MessageSender::Bot,
        content: format!("{text} {marker}"),
        created_at: at,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    use tokio::sync::{Mutex, RwLock};
    use uuid::Uuid;

    use leadflow_core::domain::message::FOLLOW_UP_MARKER;
    use leadflow_core::{
        Appointment, AppointmentId, AppointmentStatus, Conversation, ConversationId,
        ConversationMode, ConversationStatus, Intention, LeadTemperature, Message, MessageId,
        MessageSender,
    };
    use leadflow_db::repositories::{
        AppointmentRepository, ConversationRepository, InMemoryAppointmentRepository,
        InMemoryConversationRepository, InMemoryMessageRepository, MessageRepository,
    };
    use leadflow_whatsapp::{
        ChatTransport, ConnectionState, Outbox, OutboxConfig, TransportError, TransportEvent,
        TransportStatus,
    };

    use super::{FollowUpConfig, FollowUpScheduler};

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingTransport {
        async fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().await.clone()
        }
    }

    #[async_trait]
    impl ChatTransport for RecordingTransport {
        async fn connect(&self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn next_event(&self) -> Result<Option<TransportEvent>, TransportError> {
            Ok(None)
        }

        async fn send_text(&self, phone_number: &str, body: &str) -> Result<(), TransportError> {
            self.sent.lock().await.push((phone_number.to_string(), body.to_string()));
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    struct Harness {
        scheduler: FollowUpScheduler,
        transport: Arc<RecordingTransport>,
        conversations: Arc<InMemoryConversationRepository>,
        messages: Arc<InMemoryMessageRepository>,
        appointments: Arc<InMemoryAppointmentRepository>,
    }

    fn harness() -> Harness {
        let conversations = Arc::new(InMemoryConversationRepository::default());
        let messages = Arc::new(InMemoryMessageRepository::default());
        let appointments = Arc::new(InMemoryAppointmentRepository::default());
        let transport = Arc::new(RecordingTransport::default());

        let status = Arc::new(RwLock::new(TransportStatus {
            state: ConnectionState::Ready,
            has_pending_auth_challenge: false,
        }));
        let outbox = Arc::new(Outbox::new(
            transport.clone(),
            status,
            OutboxConfig { send_spacing: Duration::ZERO, ..OutboxConfig::default() },
        ));

        let scheduler = FollowUpScheduler::new(
            FollowUpConfig::default(),
            conversations.clone(),
            messages.clone(),
            appointments.clone(),
            outbox,
        );

        Harness { scheduler, transport, conversations, messages, appointments }
    }

    fn conversation(phone: &str, mode: ConversationMode, updated_at: DateTime<Utc>) -> Conversation {
        Conversation {
            id: ConversationId(Uuid::new_v4().to_string()),
            phone_number: phone.to_string(),
            status: ConversationStatus::Active,
            mode,
            assigned_to: "LeadFlow".to_string(),
            customer_name: Some("Maria Souza".to_string()),
            vehicle: Some("Civic 2019".to_string()),
            city: None,
            intention: Intention::Sell,
            lead_temperature: LeadTemperature::Warm,
            created_at: updated_at,
            updated_at,
        }
    }

    fn customer_message(conversation: &Conversation, at: DateTime<Utc>) -> Message {
        Message {
            id: MessageId(Uuid::new_v4().to_string()),
            conversation_id: conversation.id.clone(),
            sender: MessageSender::Customer,
            content: "oi".to_string(),
            created_at: at,
        }
    }

    fn bot_message(conversation: &Conversation, at: DateTime<Utc>) -> Message {
        Message {
            id: MessageId(Uuid::new_v4().to_string()),
            conversation_id: conversation.id.clone(),
            sender: MessageSender::Bot,
            content: "Posso te ajudar com algo mais?".to_string(),
            created_at: at,
        }
    }

    async fn seed_exchange(
        harness: &Harness,
        conv: &Conversation,
        customer_at: DateTime<Utc>,
        bot_at: DateTime<Utc>,
    ) {
        harness.messages.append(customer_message(conv, customer_at)).await.expect("append");
        harness.messages.append(bot_message(conv, bot_at)).await.expect("append");
    }

    #[tokio::test]
    async fn nudges_after_two_idle_hours_but_not_before() {
        let harness = harness();
        let now = Utc::now();

        let conv = conversation("5511999990000", ConversationMode::Ai, now);
        harness.conversations.save(conv.clone()).await.expect("save");
        seed_exchange(
            &harness,
            &conv,
            now - chrono::Duration::hours(2),
            now - chrono::Duration::hours(1),
        )
        .await;

        let report = harness.scheduler.run_sweep(now).await;
        assert_eq!(report.follow_ups_sent, 0);

        let later = now + chrono::Duration::hours(2);
        let report = harness.scheduler.run_sweep(later).await;
        assert_eq!(report.follow_ups_sent, 1);

        let sent = harness.transport.sent().await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("Maria"));
        // Marker stays in the transcript, never on the wire.
        assert!(!sent[0].1.contains(FOLLOW_UP_MARKER));
        let count = harness
            .messages
            .count_bot_messages_containing(&conv.id, FOLLOW_UP_MARKER)
            .await
            .expect("count");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn follow_ups_stop_after_two_attempts() {
        let harness = harness();
        let now = Utc::now();

        let conv = conversation("5511999990000", ConversationMode::Ai, now);
        harness.conversations.save(conv.clone()).await.expect("save");
        seed_exchange(
            &harness,
            &conv,
            now - chrono::Duration::hours(4),
            now - chrono::Duration::hours(3),
        )
        .await;

        // The 2h nudge goes out, the farewell a day after it, and then the
        // conversation is left in peace.
        assert_eq!(harness.scheduler.run_sweep(now).await.follow_ups_sent, 1);
        let next_day = now + chrono::Duration::hours(25);
        assert_eq!(harness.scheduler.run_sweep(next_day).await.follow_ups_sent, 1);
        let much_later = now + chrono::Duration::days(4);
        assert_eq!(harness.scheduler.run_sweep(much_later).await.follow_ups_sent, 0);
        assert_eq!(harness.transport.sent().await.len(), 2);
    }

    #[tokio::test]
    async fn second_nudge_waits_a_full_day() {
        let harness = harness();
        let now = Utc::now();

        let conv = conversation("5511999990000", ConversationMode::Ai, now);
        harness.conversations.save(conv.clone()).await.expect("save");
        seed_exchange(
            &harness,
            &conv,
            now - chrono::Duration::hours(4),
            now - chrono::Duration::hours(3),
        )
        .await;

        assert_eq!(harness.scheduler.run_sweep(now).await.follow_ups_sent, 1);
        // The nudge itself restarts the idle clock.
        let soon = now + chrono::Duration::hours(23);
        assert_eq!(harness.scheduler.run_sweep(soon).await.follow_ups_sent, 0);
        let day_later = now + chrono::Duration::hours(25);
        assert_eq!(harness.scheduler.run_sweep(day_later).await.follow_ups_sent, 1);
    }

    #[tokio::test]
    async fn day_long_silence_skips_straight_to_the_farewell() {
        let harness = harness();
        let now = Utc::now();

        let conv = conversation("5511999990000", ConversationMode::Ai, now);
        harness.conversations.save(conv.clone()).await.expect("save");
        seed_exchange(
            &harness,
            &conv,
            now - chrono::Duration::hours(26),
            now - chrono::Duration::hours(25),
        )
        .await;

        let report = harness.scheduler.run_sweep(now).await;
        assert_eq!(report.follow_ups_sent, 1);
        let sent = harness.transport.sent().await;
        assert!(sent[0].1.contains("Ainda estou por aqui"));
        assert!(!sent[0].1.contains("pela metade"));

        // The very next sweep stays quiet instead of firing the second text.
        let report = harness.scheduler.run_sweep(now).await;
        assert_eq!(report.follow_ups_sent, 0);
        assert_eq!(harness.transport.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn no_nudge_while_the_customer_waits_for_an_answer() {
        let harness = harness();
        let now = Utc::now();

        let conv = conversation("5511999990000", ConversationMode::Ai, now);
        harness.conversations.save(conv.clone()).await.expect("save");
        harness
            .messages
            .append(bot_message(&conv, now - chrono::Duration::hours(5)))
            .await
            .expect("append");
        harness
            .messages
            .append(customer_message(&conv, now - chrono::Duration::hours(4)))
            .await
            .expect("append");

        let report = harness.scheduler.run_sweep(now).await;
        assert_eq!(report.follow_ups_sent, 0);
        assert!(harness.transport.sent().await.is_empty());
    }

    #[tokio::test]
    async fn human_mode_conversations_are_left_alone() {
        let harness = harness();
        let now = Utc::now();

        let conv = conversation("5511999990000", ConversationMode::Human, now);
        harness.conversations.save(conv.clone()).await.expect("save");
        seed_exchange(
            &harness,
            &conv,
            now - chrono::Duration::days(2),
            now - chrono::Duration::days(1),
        )
        .await;

        let report = harness.scheduler.run_sweep(now).await;
        assert_eq!(report.follow_ups_sent, 0);
        assert!(harness.transport.sent().await.is_empty());
    }

    fn missed_appointment(id: &str, conv: &Conversation, date: NaiveDate) -> Appointment {
        let created = Utc::now();
        Appointment {
            id: AppointmentId(id.to_string()),
            conversation_id: Some(conv.id.clone()),
            customer_name: "Maria Souza".to_string(),
            phone_number: conv.phone_number.clone(),
            vehicle: Some("Civic 2019".to_string()),
            city: "Campinas".to_string(),
            scheduled_date: date,
            scheduled_time: "10:00".to_string(),
            status: AppointmentStatus::Scheduled,
            created_by: "LeadFlow".to_string(),
            calendar_row: None,
            created_at: created,
            updated_at: created,
        }
    }

    fn naive_date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("date")
    }

    #[tokio::test]
    async fn missed_visit_is_marked_and_gets_exactly_one_reschedule_offer() {
        let harness = harness();
        // Wednesday 2026-03-04 10:00 in São Paulo.
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 13, 0, 0).single().expect("timestamp");

        let conv = conversation("5511999990000", ConversationMode::Ai, now);
        harness.conversations.save(conv.clone()).await.expect("save");
        harness.messages.append(customer_message(&conv, now)).await.expect("append");

        // Nobody showed up yesterday.
        harness
            .appointments
            .insert(missed_appointment("a-1", &conv, naive_date(2026, 3, 3)))
            .await
            .expect("insert");

        let report = harness.scheduler.run_sweep(now).await;
        assert_eq!(report.reschedules_sent, 1);
        let sent = harness.transport.sent().await;
        assert!(sent[0].1.contains("remarcar"));

        let stored = harness.appointments.all().await;
        assert_eq!(stored[0].status, AppointmentStatus::NoShow);

        // The next sweep no longer sees a scheduled row and keeps quiet.
        let report = harness.scheduler.run_sweep(now).await;
        assert_eq!(report.reschedules_sent, 0);
        assert_eq!(harness.transport.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn missed_visits_outside_the_lookback_are_left_alone() {
        let harness = harness();
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 13, 0, 0).single().expect("timestamp");

        let conv = conversation("5511999990000", ConversationMode::Ai, now);
        harness.conversations.save(conv.clone()).await.expect("save");
        harness
            .appointments
            .insert(missed_appointment("a-1", &conv, naive_date(2026, 2, 25)))
            .await
            .expect("insert");

        let report = harness.scheduler.run_sweep(now).await;
        assert_eq!(report.reschedules_sent, 0);
        assert_eq!(harness.appointments.all().await[0].status, AppointmentStatus::Scheduled);
    }

    #[tokio::test]
    async fn week_old_conversations_are_closed() {
        let harness = harness();
        let now = Utc::now();

        let stale =
            conversation("5511999990000", ConversationMode::Ai, now - chrono::Duration::days(8));
        let fresh = conversation("5511999990001", ConversationMode::Ai, now);
        harness.conversations.save(stale).await.expect("save");
        harness.conversations.save(fresh).await.expect("save");

        let report = harness.scheduler.run_sweep(now).await;
        assert_eq!(report.conversations_closed, 1);
        assert!(harness
            .conversations
            .find_active_by_phone("5511999990000")
            .await
            .expect("find")
            .is_none());
        assert!(harness
            .conversations
            .find_active_by_phone("5511999990001")
            .await
            .expect("find")
            .is_some());
    }
}
