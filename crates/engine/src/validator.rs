use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};

use leadflow_core::schedule::dates::weekday_name;
use leadflow_core::{BusinessHours, TimeOfDay};

use crate::AvailabilityService;

/// A slot that cannot be booked, with the Portuguese explanation sent back
/// to the customer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotRejection {
    pub customer_message: String,
}

impl SlotRejection {
    fn new(customer_message: impl Into<String>) -> Self {
        Self { customer_message: customer_message.into() }
    }
}

/// Re-checks a requested slot at booking time. Checks run in order and the
/// first failure wins: working day, then not in the past, then inside
/// attendance hours, then actually free.
pub struct SlotValidator {
    availability: Arc<AvailabilityService>,
    hours: BusinessHours,
}

impl SlotValidator {
    pub fn new(availability: Arc<AvailabilityService>, hours: BusinessHours) -> Self {
        Self { availability, hours }
    }

    pub async fn validate(
        &self,
        date: NaiveDate,
        time: TimeOfDay,
        now: NaiveDateTime,
    ) -> Result<(), SlotRejection> {
        if !self.hours.is_working_day(date) {
            return Err(SlotRejection::new(format!(
                "Não atendemos no dia {} ({}). Pode ser em outro dia?",
                date.format("%d/%m"),
                weekday_name(date)
            )));
        }

        let requested = date.and_hms_opt(time.hours, time.minutes, 0);
        if requested.map(|instant| instant <= now).unwrap_or(true) {
            return Err(SlotRejection::new(
                "Esse horário já passou. Pode escolher um horário a partir de agora?",
            ));
        }

        if !self.hours.contains_time(time) {
            return Err(SlotRejection::new(format!(
                "Atendemos das {} às {}. Qual horário dentro desse período fica bom para você?",
                self.hours.start, self.hours.end
            )));
        }

        let free = self.availability.free_slots_on(date, None).await;
        if !free.contains(&time.to_string()) {
            return Err(SlotRejection::new(format!(
                "O horário das {} no dia {} já está reservado.",
                time,
                date.format("%d/%m")
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{NaiveDate, NaiveDateTime, Utc};

    use leadflow_core::{
        Appointment, AppointmentId, AppointmentStatus, BusinessHours, NoopCalendarClient,
        TimeOfDay,
    };
    use leadflow_db::repositories::{AppointmentRepository, InMemoryAppointmentRepository};

    use crate::AvailabilityService;

    use super::SlotValidator;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("date")
    }

    fn time(value: &str) -> TimeOfDay {
        value.parse().expect("time")
    }

    fn now() -> NaiveDateTime {
        // Monday morning.
        date(2026, 3, 2).and_hms_opt(8, 0, 0).expect("time")
    }

    fn validator(appointments: Arc<InMemoryAppointmentRepository>) -> SlotValidator {
        let hours = BusinessHours::default();
        let availability = Arc::new(AvailabilityService::new(
            Arc::new(NoopCalendarClient),
            appointments,
            hours.clone(),
        ));
        SlotValidator::new(availability, hours)
    }

    #[tokio::test]
    async fn accepts_a_free_future_slot() {
        let validator = validator(Arc::new(InMemoryAppointmentRepository::default()));

        let result = validator.validate(date(2026, 3, 2), time("10:00"), now()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn rejects_sundays_by_name() {
        let validator = validator(Arc::new(InMemoryAppointmentRepository::default()));

        let rejection = validator
            .validate(date(2026, 3, 1), time("10:00"), now())
            .await
            .expect_err("sunday");
        assert!(rejection.customer_message.contains("Domingo"));
    }

    #[tokio::test]
    async fn rejects_past_times() {
        let validator = validator(Arc::new(InMemoryAppointmentRepository::default()));
        let afternoon = date(2026, 3, 2).and_hms_opt(15, 0, 0).expect("time");

        let rejection = validator
            .validate(date(2026, 3, 2), time("10:00"), afternoon)
            .await
            .expect_err("past");
        assert!(rejection.customer_message.contains("já passou"));
    }

    #[tokio::test]
    async fn rejects_times_outside_attendance_hours() {
        let validator = validator(Arc::new(InMemoryAppointmentRepository::default()));

        let rejection = validator
            .validate(date(2026, 3, 2), time("20:00"), now())
            .await
            .expect_err("off hours");
        assert!(rejection.customer_message.contains("09:00"));
        assert!(rejection.customer_message.contains("18:00"));
    }

    #[tokio::test]
    async fn rejects_an_already_booked_slot() {
        let appointments = Arc::new(InMemoryAppointmentRepository::default());
        appointments
            .insert(Appointment {
                id: AppointmentId("a-1".to_string()),
                conversation_id: None,
                customer_name: "Carlos".to_string(),
                phone_number: "5511988887777".to_string(),
                vehicle: Some("Onix".to_string()),
                city: "Campinas".to_string(),
                scheduled_date: date(2026, 3, 2),
                scheduled_time: "10:00".to_string(),
                status: AppointmentStatus::Confirmed,
                created_by: "LeadFlow".to_string(),
                calendar_row: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .expect("insert");

        let validator = validator(appointments);
        let rejection = validator
            .validate(date(2026, 3, 2), time("10:00"), now())
            .await
            .expect_err("taken");
        assert!(rejection.customer_message.contains("reservado"));
    }
}
