//! Outward-facing collaborators the engine talks to but does not own.
//! Production wires HTTP-backed implementations; tests and the default
//! bootstrap use the Noop variants.

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::conversation::{Intention, LeadTemperature};

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("calendar request failed: {0}")]
    Request(String),
    #[error("calendar returned an unreadable response: {0}")]
    Decode(String),
}

/// External calendar holding the store's visit bookings. Read failures are
/// treated as "no information" by callers; write failures are logged and
/// never block a booking.
#[async_trait]
pub trait CalendarClient: Send + Sync {
    /// Slot times (`HH:MM`) already taken on the given date.
    async fn taken_slots(&self, date: NaiveDate) -> Result<Vec<String>, CalendarError>;

    /// Record a booking, returning the calendar's row handle when it
    /// provides one.
    async fn write_booking(
        &self,
        date: NaiveDate,
        time: &str,
        customer_name: &str,
        phone_number: &str,
        vehicle: Option<&str>,
    ) -> Result<Option<i64>, CalendarError>;

    /// Mark a previously written booking cancelled. Row handles come from
    /// `write_booking`.
    async fn cancel_booking(&self, calendar_row: i64) -> Result<(), CalendarError>;
}

/// Snapshot of a qualified lead pushed to the CRM sheet.
#[derive(Clone, Debug, PartialEq)]
pub struct LeadRecord {
    pub phone_number: String,
    pub customer_name: Option<String>,
    pub vehicle: Option<String>,
    pub city: Option<String>,
    pub intention: Intention,
    pub temperature: LeadTemperature,
}

/// Partial update for an already registered lead. `None` fields are left
/// untouched on the tracker side.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LeadUpdate {
    pub customer_name: Option<String>,
    pub vehicle: Option<String>,
    pub city: Option<String>,
    pub intention: Option<Intention>,
    pub temperature: Option<LeadTemperature>,
    pub status: Option<String>,
}

#[async_trait]
pub trait LeadTracker: Send + Sync {
    async fn register_lead(&self, record: LeadRecord) -> Result<(), CalendarError>;
    async fn update_lead(&self, phone_number: &str, update: LeadUpdate)
        -> Result<(), CalendarError>;
}

/// Human channel for handoffs and high-value events. Implementations must
/// not block the conversation turn; failures are advisory.
#[async_trait]
pub trait OperatorNotifier: Send + Sync {
    async fn notify_transfer(&self, phone_number: &str, reason: &str);
    async fn notify_hot_lead(&self, phone_number: &str, summary: &str);
    async fn notify_new_booking(&self, customer_name: &str, date: NaiveDate, time: &str);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopCalendarClient;

#[async_trait]
impl CalendarClient for NoopCalendarClient {
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
        Ok(None)
    }

    async fn cancel_booking(&self, _calendar_row: i64) -> Result<(), CalendarError> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopLeadTracker;

#[async_trait]
impl LeadTracker for NoopLeadTracker {
    async fn register_lead(&self, _record: LeadRecord) -> Result<(), CalendarError> {
        Ok(())
    }

    async fn update_lead(
        &self,
        _phone_number: &str,
        _update: LeadUpdate,
    ) -> Result<(), CalendarError> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopOperatorNotifier;

#[async_trait]
impl OperatorNotifier for NoopOperatorNotifier {
    async fn notify_transfer(&self, _phone_number: &str, _reason: &str) {}
    async fn notify_hot_lead(&self, _phone_number: &str, _summary: &str) {}
    async fn notify_new_booking(&self, _customer_name: &str, _date: NaiveDate, _time: &str) {}
}
