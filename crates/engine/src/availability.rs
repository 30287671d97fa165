use std::sync::Arc;

use chrono::{Days, NaiveDate, NaiveDateTime, Timelike};
use tracing::warn;

use leadflow_agent::DayAvailability;
use leadflow_core::schedule::dates::weekday_name;
use leadflow_core::{BusinessHours, CalendarClient, TimeOfDay};
use leadflow_db::repositories::AppointmentRepository;

/// How many calendar days the customer-facing offer spans, today included.
const OFFER_DAYS: u64 = 3;
const SLOTS_PER_DAY: usize = 3;
const MAX_OFFERED_SLOTS: usize = 8;

/// How far ahead alternative-slot suggestions may look.
const SUGGESTION_HORIZON_DAYS: u64 = 14;

/// Computes free visit slots by overlaying the slot grid with what the
/// external calendar and our own appointment book already hold. Reads are
/// fail-open: if the calendar is unreachable the slots are offered anyway,
/// the validator re-checks at booking time.
pub struct AvailabilityService {
    calendar: Arc<dyn CalendarClient>,
    appointments: Arc<dyn AppointmentRepository>,
    hours: BusinessHours,
}

impl AvailabilityService {
    pub fn new(
        calendar: Arc<dyn CalendarClient>,
        appointments: Arc<dyn AppointmentRepository>,
        hours: BusinessHours,
    ) -> Self {
        Self { calendar, appointments, hours }
    }

    pub fn hours(&self) -> &BusinessHours {
        &self.hours
    }

    /// Free slot times on a date, optionally only those strictly after a
    /// cutoff (used to hide already-past times on the current day).
    pub async fn free_slots_on(&self, date: NaiveDate, after: Option<TimeOfDay>) -> Vec<String> {
        if !self.hours.is_working_day(date) {
            return Vec::new();
        }

        let mut taken = match self.calendar.taken_slots(date).await {
            Ok(taken) => taken,
            Err(calendar_error) => {
                warn!(%date, error = %calendar_error, "calendar read failed, assuming no holds");
                Vec::new()
            }
        };

        match self.appointments.booked_times_on(date).await {
            Ok(booked) => taken.extend(booked),
            Err(repository_error) => {
                warn!(%date, error = %repository_error, "appointment read failed, assuming no holds");
            }
        }

        self.hours
            .slot_grid()
            .into_iter()
            .filter(|slot| !taken.contains(slot))
            .filter(|slot| match (after, slot.parse::<TimeOfDay>()) {
                (Some(cutoff), Ok(time)) => {
                    time.minutes_from_midnight() > cutoff.minutes_from_midnight()
                }
                _ => true,
            })
            .collect()
    }

    /// The availability block offered in conversation: up to three slots on
    /// each of the next few working days, capped overall so the message
    /// stays readable.
    pub async fn upcoming(&self, now: NaiveDateTime) -> Vec<DayAvailability> {
        let today = now.date();
        let now_time = TimeOfDay { hours: now.hour(), minutes: now.minute() };

        let mut offer = Vec::new();
        let mut total = 0usize;

        for offset in 0..OFFER_DAYS {
            if total >= MAX_OFFERED_SLOTS {
                break;
            }
            let Some(date) = today.checked_add_days(Days::new(offset)) else {
                break;
            };

            let after = (offset == 0).then_some(now_time);
            let times: Vec<String> = self
                .free_slots_on(date, after)
                .await
                .into_iter()
                .take(SLOTS_PER_DAY.min(MAX_OFFERED_SLOTS - total))
                .collect();

            if times.is_empty() {
                continue;
            }

            total += times.len();
            offer.push(DayAvailability { date, weekday: weekday_name(date), times });
        }

        offer
    }

    /// Up to `count` nearest free slots from `from` onward, scanning a
    /// bounded horizon. Used to suggest alternatives when a requested slot
    /// is rejected.
    pub async fn find_next_available(
        &self,
        from: NaiveDateTime,
        count: usize,
    ) -> Vec<(NaiveDate, String)> {
        let from_time = TimeOfDay { hours: from.hour(), minutes: from.minute() };
        let mut found = Vec::new();

        for offset in 0..SUGGESTION_HORIZON_DAYS {
            if found.len() >= count {
                break;
            }
            let Some(date) = from.date().checked_add_days(Days::new(offset)) else {
                break;
            };

            let after = (offset == 0).then_some(from_time);
            for slot in self.free_slots_on(date, after).await {
                if found.len() >= count {
                    break;
                }
                found.push((date, slot));
            }
        }

        found
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};

    use leadflow_core::{
        Appointment, AppointmentId, AppointmentStatus, BusinessHours, CalendarClient,
        CalendarError, NoopCalendarClient,
    };
    use leadflow_db::repositories::{AppointmentRepository, InMemoryAppointmentRepository};

    use super::AvailabilityService;

    struct BusyCalendar {
        taken: Vec<String>,
    }

    #[async_trait]
    impl CalendarClient for BusyCalendar {
        async fn taken_slots(&self, _date: NaiveDate) -> Result<Vec<String>, CalendarError> {
            Ok(self.taken.clone())
        }

        async fn write_booking(
            &self,
            _date: NaiveDate,
            _time: &str,
            _customer_name: &str,
            _phone_number: &str,
            _vehicle: Option<&str>,
        ) -> Result<Option<i64>, CalendarError> {
            Ok(None)
        }

        async fn cancel_booking(&self, _calendar_row: i64) -> Result<(), CalendarError> {
            Ok(())
        }
    }

    struct BrokenCalendar;

    #[async_trait]
    impl CalendarClient for BrokenCalendar {
        async fn taken_slots(&self, _date: NaiveDate) -> Result<Vec<String>, CalendarError> {
            Err(CalendarError::Request("http 503".to_string()))
        }

        async fn write_booking(
            &self,
            _date: NaiveDate,
            _time: &str,
            _customer_name: &str,
            _phone_number: &str,
            _vehicle: Option<&str>,
        ) -> Result<Option<i64>, CalendarError> {
            Err(CalendarError::Request("http 503".to_string()))
        }

        async fn cancel_booking(&self, _calendar_row: i64) -> Result<(), CalendarError> {
            Err(CalendarError::Request("http 503".to_string()))
        }
    }

    fn service(calendar: Arc<dyn CalendarClient>) -> AvailabilityService {
        AvailabilityService::new(
            calendar,
            Arc::new(InMemoryAppointmentRepository::default()),
            BusinessHours::default(),
        )
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("date")
    }

    #[tokio::test]
    async fn calendar_holds_are_subtracted() {
        let service = service(Arc::new(BusyCalendar {
            taken: vec!["09:00".to_string(), "09:30".to_string()],
        }));

        // 2026-03-02 is a Monday.
        let slots = service.free_slots_on(date(2026, 3, 2), None).await;
        assert_eq!(slots.first().map(String::as_str), Some("10:00"));
        assert!(!slots.contains(&"09:00".to_string()));
    }

    #[tokio::test]
    async fn broken_calendar_fails_open() {
        let service = service(Arc::new(BrokenCalendar));

        let slots = service.free_slots_on(date(2026, 3, 2), None).await;
        assert_eq!(slots.len(), 18);
    }

    #[tokio::test]
    async fn non_working_day_has_no_slots() {
        let service = service(Arc::new(NoopCalendarClient));

        // 2026-03-01 is a Sunday.
        let slots = service.free_slots_on(date(2026, 3, 1), None).await;
        assert!(slots.is_empty());
    }

    #[tokio::test]
    async fn own_appointments_block_slots() {
        let appointments = Arc::new(InMemoryAppointmentRepository::default());
        appointments
            .insert(Appointment {
                id: AppointmentId("a-1".to_string()),
                conversation_id: None,
                customer_name: "Maria".to_string(),
                phone_number: "5511999990000".to_string(),
                vehicle: None,
                city: "Campinas".to_string(),
                scheduled_date: date(2026, 3, 2),
                scheduled_time: "10:00".to_string(),
                status: AppointmentStatus::Scheduled,
                created_by: "LeadFlow".to_string(),
                calendar_row: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .expect("insert");

        let service = AvailabilityService::new(
            Arc::new(NoopCalendarClient),
            appointments,
            BusinessHours::default(),
        );

        let slots = service.free_slots_on(date(2026, 3, 2), None).await;
        assert!(!slots.contains(&"10:00".to_string()));
    }

    #[tokio::test]
    async fn upcoming_skips_past_times_and_sundays() {
        let service = service(Arc::new(NoopCalendarClient));

        // Saturday 2026-02-28 at 16:45; remaining Saturday slots are 17:00
        // and 17:30, Sunday is skipped, Monday opens fresh.
        let now = date(2026, 2, 28).and_hms_opt(16, 45, 0).expect("time");
        let offer = service.upcoming(now).await;

        assert_eq!(offer.len(), 2);
        assert_eq!(offer[0].date, date(2026, 2, 28));
        assert_eq!(offer[0].times, vec!["17:00".to_string(), "17:30".to_string()]);
        assert_eq!(offer[0].weekday, "Sábado");
        assert_eq!(offer[1].date, date(2026, 3, 2));
        assert_eq!(offer[1].times.len(), 3);
    }

    #[tokio::test]
    async fn suggestions_scan_forward_across_days() {
        let service = service(Arc::new(NoopCalendarClient));

        // Saturday 17:40: only 18:00 is past the grid end, so suggestions
        // must roll to Monday.
        let now = date(2026, 2, 28).and_hms_opt(17, 40, 0).expect("time");
        let suggestions = service.find_next_available(now, 3).await;

        assert_eq!(suggestions.len(), 3);
        assert_eq!(suggestions[0], (date(2026, 3, 2), "09:00".to_string()));
        assert_eq!(suggestions[1], (date(2026, 3, 2), "09:30".to_string()));
    }
}
