use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use leadflow_core::schedule::dates::weekday_name;
use leadflow_core::{
    Appointment, AppointmentId, AppointmentStatus, ApplicationError, CalendarClient,
    ConversationId, OperatorNotifier, TimeOfDay,
};
use leadflow_db::repositories::AppointmentRepository;

use crate::{AvailabilityService, SlotValidator};

const ALTERNATIVE_SUGGESTIONS: usize = 3;

#[derive(Clone, Debug)]
pub struct BookingRequest {
    pub conversation_id: ConversationId,
    pub customer_name: String,
    pub phone_number: String,
    pub vehicle: Option<String>,
    pub city: String,
    pub date: NaiveDate,
    pub time: TimeOfDay,
}

#[derive(Clone, Debug, PartialEq)]
pub enum BookingOutcome {
    Booked { reply: String },
    Rejected { reply: String },
}

impl BookingOutcome {
    pub fn reply(&self) -> &str {
        match self {
            Self::Booked { reply } | Self::Rejected { reply } => reply,
        }
    }
}

/// Books store visits. The database row is the source of truth: a calendar
/// write failure is logged and the booking proceeds, a database failure
/// aborts it.
pub struct BookingService {
    availability: Arc<AvailabilityService>,
    validator: SlotValidator,
    appointments: Arc<dyn AppointmentRepository>,
    calendar: Arc<dyn CalendarClient>,
    notifier: Arc<dyn OperatorNotifier>,
    bot_name: String,
}

impl BookingService {
    pub fn new(
        availability: Arc<AvailabilityService>,
        validator: SlotValidator,
        appointments: Arc<dyn AppointmentRepository>,
        calendar: Arc<dyn CalendarClient>,
        notifier: Arc<dyn OperatorNotifier>,
        bot_name: impl Into<String>,
    ) -> Self {
        Self {
            availability,
            validator,
            appointments,
            calendar,
            notifier,
            bot_name: bot_name.into(),
        }
    }

    pub async fn book(
        &self,
        request: BookingRequest,
        now: NaiveDateTime,
    ) -> Result<BookingOutcome, ApplicationError> {
        if let Err(rejection) = self.validator.validate(request.date, request.time, now).await {
            let reply = self.rejection_reply(rejection.customer_message, now).await;
            return Ok(BookingOutcome::Rejected { reply });
        }

        let calendar_row = match self
            .calendar
            .write_booking(
                request.date,
                &request.time.to_string(),
                &request.customer_name,
                &request.phone_number,
                request.vehicle.as_deref(),
            )
            .await
        {
            Ok(row) => row,
            Err(calendar_error) => {
                warn!(
                    phone = %request.phone_number,
                    error = %calendar_error,
                    "calendar write failed, booking proceeds from the database",
                );
                None
            }
        };

        let appointment_id = AppointmentId(Uuid::new_v4().to_string());
        let created_at = Utc::now();
        self.appointments
            .insert(Appointment {
                id: appointment_id.clone(),
                conversation_id: Some(request.conversation_id.clone()),
                customer_name: request.customer_name.clone(),
                phone_number: request.phone_number.clone(),
                vehicle: request.vehicle.clone(),
                city: request.city.clone(),
                scheduled_date: request.date,
                scheduled_time: request.time.to_string(),
                status: AppointmentStatus::Scheduled,
                created_by: self.bot_name.clone(),
                calendar_row,
                created_at,
                updated_at: created_at,
            })
            .await
            .map_err(|err| ApplicationError::Persistence(err.to_string()))?;

        if let Some(row) = calendar_row {
            if let Err(repository_error) =
                self.appointments.set_calendar_row(&appointment_id, row).await
            {
                warn!(
                    appointment = %appointment_id.0,
                    error = %repository_error,
                    "could not record calendar row handle",
                );
            }
        }

        info!(
            phone = %request.phone_number,
            date = %request.date,
            time = %request.time,
            "visit booked",
        );
        self.notifier
            .notify_new_booking(&request.customer_name, request.date, &request.time.to_string())
            .await;

        Ok(BookingOutcome::Booked { reply: confirmation_reply(&request) })
    }

    /// A rejection message plus the nearest free alternatives, so the
    /// customer can pick again without another availability round-trip.
    async fn rejection_reply(&self, reason: String, now: NaiveDateTime) -> String {
        let alternatives = self.availability.find_next_available(now, ALTERNATIVE_SUGGESTIONS).await;
        if alternatives.is_empty() {
            return reason;
        }

        let mut reply = reason;
        reply.push_str("\n\nTenho estes horários livres:");
        for (date, time) in alternatives {
            reply.push_str(&format!(
                "\n• {}, dia {}, às {}",
                weekday_name(date),
                date.format("%d/%m"),
                time
            ));
        }
        reply
    }
}

fn confirmation_reply(request: &BookingRequest) -> String {
    format!(
        "Agendamento confirmado! {}, dia {}, às {}. Vou te esperar aqui na loja, {}. Qualquer imprevisto é só me avisar!",
        weekday_name(request.date),
        request.date.format("%d/%m"),
        request.time,
        first_name(&request.customer_name),
    )
}

fn first_name(full_name: &str) -> &str {
    full_name.split_whitespace().next().unwrap_or(full_name)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveDateTime};

    use leadflow_core::{
        BusinessHours, CalendarClient, CalendarError, ConversationId, NoopCalendarClient,
        NoopOperatorNotifier, TimeOfDay,
    };
    use leadflow_db::repositories::InMemoryAppointmentRepository;

    use crate::{AvailabilityService, SlotValidator};

    use super::{BookingOutcome, BookingRequest, BookingService};

    struct RecordingCalendar {
        row: Option<i64>,
        writes: Mutex<Vec<(NaiveDate, String)>>,
    }

    #[async_trait]
    impl CalendarClient for RecordingCalendar {
        async fn taken_slots(&self, _date: NaiveDate) -> Result<Vec<String>, CalendarError> {
            Ok(Vec::new())
        }

        async fn write_booking(
            &self,
            date: NaiveDate,
            time: &str,
            _customer_name: &str,
            _phone_number: &str,
            _vehicle: Option<&str>,
        ) -> Result<Option<i64>, CalendarError> {
            self.writes.lock().expect("lock").push((date, time.to_string()));
            Ok(self.row)
        }

        async fn cancel_booking(&self, _calendar_row: i64) -> Result<(), CalendarError> {
            Ok(())
        }
    }

    struct FailingCalendar;

    #[async_trait]
    impl CalendarClient for FailingCalendar {
        async fn taken_slots(&self, _date: NaiveDate) -> Result<Vec<String>, CalendarError> {
            Ok(Vec::new())
        }

        async fn write_booking(
            &self,
            _date: NaiveDate,
            _time: &str,
            _customer_name: &str,
            _phone_number: &str,
            _vehicle: Option<&str>,
        ) -> Result<Option<i64>, CalendarError> {
            Err(CalendarError::Request("http 500".to_string()))
        }

        async fn cancel_booking(&self, _calendar_row: i64) -> Result<(), CalendarError> {
            Err(CalendarError::Request("http 500".to_string()))
        }
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("date")
    }

    fn now() -> NaiveDateTime {
        // Monday morning.
        date(2026, 3, 2).and_hms_opt(8, 0, 0).expect("time")
    }

    fn request(time: &str) -> BookingRequest {
        BookingRequest {
            conversation_id: ConversationId("c-1".to_string()),
            customer_name: "Maria Souza".to_string(),
            phone_number: "5511999990000".to_string(),
            vehicle: Some("Civic 2019".to_string()),
            city: "Campinas".to_string(),
            date: date(2026, 3, 2),
            time: time.parse().expect("time"),
        }
    }

    fn service(
        calendar: Arc<dyn CalendarClient>,
        appointments: Arc<InMemoryAppointmentRepository>,
    ) -> BookingService {
        let hours = BusinessHours::default();
        let availability = Arc::new(AvailabilityService::new(
            calendar.clone(),
            appointments.clone(),
            hours.clone(),
        ));
        let validator = SlotValidator::new(availability.clone(), hours);
        BookingService::new(
            availability,
            validator,
            appointments,
            calendar,
            Arc::new(NoopOperatorNotifier),
            "LeadFlow",
        )
    }

    #[tokio::test]
    async fn books_a_valid_slot_and_writes_the_calendar() {
        let calendar = Arc::new(RecordingCalendar { row: Some(42), writes: Mutex::new(Vec::new()) });
        let appointments = Arc::new(InMemoryAppointmentRepository::default());
        let service = service(calendar.clone(), appointments.clone());

        let outcome = service.book(request("10:00"), now()).await.expect("book");

        match outcome {
            BookingOutcome::Booked { reply } => {
                assert!(reply.contains("Agendamento confirmado!"));
                assert!(reply.contains("Segunda"));
                assert!(reply.contains("02/03"));
                assert!(reply.contains("10:00"));
                assert!(reply.contains("Maria"));
            }
            other => panic!("expected booked, got {other:?}"),
        }

        let writes = calendar.writes.lock().expect("lock");
        assert_eq!(writes.as_slice(), &[(date(2026, 3, 2), "10:00".to_string())]);

        let stored = appointments.all().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].calendar_row, Some(42));
        assert_eq!(stored[0].created_by, "LeadFlow");
    }

    #[tokio::test]
    async fn calendar_failure_does_not_block_the_booking() {
        let appointments = Arc::new(InMemoryAppointmentRepository::default());
        let service = service(Arc::new(FailingCalendar), appointments.clone());

        let outcome = service.book(request("10:00"), now()).await.expect("book");

        assert!(matches!(outcome, BookingOutcome::Booked { .. }));
        let stored = appointments.all().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].calendar_row, None);
    }

    #[tokio::test]
    async fn rejection_includes_alternative_slots() {
        let appointments = Arc::new(InMemoryAppointmentRepository::default());
        let service = service(Arc::new(NoopCalendarClient), appointments.clone());

        // Sunday request.
        let mut sunday = request("10:00");
        sunday.date = date(2026, 3, 1);
        let outcome = service.book(sunday, now()).await.expect("book");

        match outcome {
            BookingOutcome::Rejected { reply } => {
                assert!(reply.contains("Domingo"));
                assert!(reply.contains("Tenho estes horários livres:"));
                assert!(reply.contains("09:00"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert!(appointments.all().await.is_empty());
    }

    #[tokio::test]
    async fn double_booking_the_same_slot_is_rejected() {
        let appointments = Arc::new(InMemoryAppointmentRepository::default());
        let service = service(Arc::new(NoopCalendarClient), appointments.clone());

        let first = service.book(request("10:00"), now()).await.expect("book");
        assert!(matches!(first, BookingOutcome::Booked { .. }));

        let second = service.book(request("10:00"), now()).await.expect("book");
        match second {
            BookingOutcome::Rejected { reply } => assert!(reply.contains("reservado")),
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(appointments.all().await.len(), 1);
    }
}
