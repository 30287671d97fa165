use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use leadflow_core::domain::appointment::{Appointment, AppointmentId, AppointmentStatus};
use leadflow_core::domain::conversation::ConversationId;

use super::{parse_naive_date, parse_rfc3339, AppointmentRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAppointmentRepository {
    pool: DbPool,
}

impl SqlAppointmentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AppointmentRepository for SqlAppointmentRepository {
    async fn insert(&self, appointment: Appointment) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO appointments (
                id, conversation_id, customer_name, phone_number, vehicle, city,
                scheduled_date, scheduled_time, status, created_by, calendar_row,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&appointment.id.0)
        .bind(appointment.conversation_id.as_ref().map(|id| id.0.as_str()))
        .bind(&appointment.customer_name)
        .bind(&appointment.phone_number)
        .bind(appointment.vehicle.as_deref())
        .bind(&appointment.city)
        .bind(appointment.scheduled_date.format("%Y-%m-%d").to_string())
        .bind(&appointment.scheduled_time)
        .bind(appointment.status.as_str())
        .bind(&appointment.created_by)
        .bind(appointment.calendar_row)
        .bind(appointment.created_at.to_rfc3339())
        .bind(appointment.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_calendar_row(
        &self,
        id: &AppointmentId,
        calendar_row: i64,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            UPDATE appointments
            SET calendar_row = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(calendar_row)
        .bind(Utc::now().to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_status(
        &self,
        id: &AppointmentId,
        status: AppointmentStatus,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            UPDATE appointments
            SET status = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn booked_times_on(&self, date: NaiveDate) -> Result<Vec<String>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT scheduled_time
            FROM appointments
            WHERE scheduled_date = ? AND status IN ('scheduled', 'confirmed')
            ORDER BY scheduled_time ASC
            "#,
        )
        .bind(date.format("%Y-%m-%d").to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("scheduled_time").map_err(RepositoryError::from))
            .collect()
    }

    async fn list_missed(
        &self,
        since: NaiveDate,
        before: NaiveDate,
    ) -> Result<Vec<Appointment>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT
                id, conversation_id, customer_name, phone_number, vehicle, city,
                scheduled_date, scheduled_time, status, created_by, calendar_row,
                created_at, updated_at
            FROM appointments
            WHERE status = 'scheduled' AND scheduled_date >= ? AND scheduled_date < ?
            ORDER BY scheduled_date ASC, scheduled_time ASC, id ASC
            "#,
        )
        .bind(since.format("%Y-%m-%d").to_string())
        .bind(before.format("%Y-%m-%d").to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(appointment_from_row).collect()
    }

    async fn list_by_phone(
        &self,
        phone_number: &str,
    ) -> Result<Vec<Appointment>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT
                id, conversation_id, customer_name, phone_number, vehicle, city,
                scheduled_date, scheduled_time, status, created_by, calendar_row,
                created_at, updated_at
            FROM appointments
            WHERE phone_number = ?
            ORDER BY scheduled_date ASC, scheduled_time ASC, id ASC
            "#,
        )
        .bind(phone_number)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(appointment_from_row).collect()
    }
}

fn appointment_from_row(row: &SqliteRow) -> Result<Appointment, RepositoryError> {
    let status_raw: String = row.try_get("status")?;
    let status = status_raw
        .parse()
        .map_err(|_| RepositoryError::Decode(format!("invalid appointment status: {status_raw}")))?;

    Ok(Appointment {
        id: AppointmentId(row.try_get("id")?),
        conversation_id: row
            .try_get::<Option<String>, _>("conversation_id")?
            .map(ConversationId),
        customer_name: row.try_get("customer_name")?,
        phone_number: row.try_get("phone_number")?,
        vehicle: row.try_get("vehicle")?,
        city: row.try_get("city")?,
        scheduled_date: parse_naive_date(
            "appointment scheduled_date",
            &row.try_get::<String, _>("scheduled_date")?,
        )?,
        scheduled_time: row.try_get("scheduled_time")?,
        status,
        created_by: row.try_get("created_by")?,
        calendar_row: row.try_get("calendar_row")?,
        created_at: parse_rfc3339(
            "appointment created_at",
            &row.try_get::<String, _>("created_at")?,
        )?,
        updated_at: parse_rfc3339(
            "appointment updated_at",
            &row.try_get::<String, _>("updated_at")?,
        )?,
    })
}
