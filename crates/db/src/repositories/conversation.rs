use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use leadflow_core::domain::conversation::{Conversation, ConversationId, ConversationMode};

use super::{parse_rfc3339, ConversationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn find_active_by_phone(
        &self,
        phone_number: &str,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT
                id, phone_number, status, mode, assigned_to,
                customer_name, vehicle, city, intention, lead_temperature,
                created_at, updated_at
            FROM conversations
            WHERE phone_number = ? AND status = 'active'
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(phone_number)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|value| conversation_from_row(&value)).transpose()
    }

    async fn save(&self, conversation: Conversation) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO conversations (
                id, phone_number, status, mode, assigned_to,
                customer_name, vehicle, city, intention, lead_temperature,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                phone_number = excluded.phone_number,
                status = excluded.status,
                mode = excluded.mode,
                assigned_to = excluded.assigned_to,
                customer_name = excluded.customer_name,
                vehicle = excluded.vehicle,
                city = excluded.city,
                intention = excluded.intention,
                lead_temperature = excluded.lead_temperature,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&conversation.id.0)
        .bind(&conversation.phone_number)
        .bind(conversation.status.as_str())
        .bind(conversation.mode.as_str())
        .bind(&conversation.assigned_to)
        .bind(conversation.customer_name.as_deref())
        .bind(conversation.vehicle.as_deref())
        .bind(conversation.city.as_deref())
        .bind(conversation.intention.as_str())
        .bind(conversation.lead_temperature.as_str())
        .bind(conversation.created_at.to_rfc3339())
        .bind(conversation.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_active(
        &self,
        mode: Option<ConversationMode>,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let rows = match mode {
            Some(mode) => {
                sqlx::query(
                    r#"
                    SELECT
                        id, phone_number, status, mode, assigned_to,
                        customer_name, vehicle, city, intention, lead_temperature,
                        created_at, updated_at
                    FROM conversations
                    WHERE status = 'active' AND mode = ?
                    ORDER BY updated_at ASC, id ASC
                    "#,
                )
                .bind(mode.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT
                        id, phone_number, status, mode, assigned_to,
                        customer_name, vehicle, city, intention, lead_temperature,
                        created_at, updated_at
                    FROM conversations
                    WHERE status = 'active'
                    ORDER BY updated_at ASC, id ASC
                    "#,
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(conversation_from_row).collect()
    }

    async fn close_stale(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET status = 'closed', updated_at = ?
            WHERE status = 'active' AND updated_at < ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

fn conversation_from_row(row: &SqliteRow) -> Result<Conversation, RepositoryError> {
    let status_raw: String = row.try_get("status")?;
    let status = status_raw
        .parse()
        .map_err(|_| RepositoryError::Decode(format!("invalid conversation status: {status_raw}")))?;

    let mode_raw: String = row.try_get("mode")?;
    let mode = mode_raw
        .parse()
        .map_err(|_| RepositoryError::Decode(format!("invalid conversation mode: {mode_raw}")))?;

    let intention_raw: String = row.try_get("intention")?;
    let intention = intention_raw.parse().map_err(|_| {
        RepositoryError::Decode(format!("invalid conversation intention: {intention_raw}"))
    })?;

    let temperature_raw: String = row.try_get("lead_temperature")?;
    let lead_temperature = temperature_raw.parse().map_err(|_| {
        RepositoryError::Decode(format!("invalid lead temperature: {temperature_raw}"))
    })?;

    Ok(Conversation {
        id: ConversationId(row.try_get("id")?),
        phone_number: row.try_get("phone_number")?,
        status,
        mode,
        assigned_to: row.try_get("assigned_to")?,
        customer_name: row.try_get("customer_name")?,
        vehicle: row.try_get("vehicle")?,
        city: row.try_get("city")?,
        intention,
        lead_temperature,
        created_at: parse_rfc3339(
            "conversation created_at",
            &row.try_get::<String, _>("created_at")?,
        )?,
        updated_at: parse_rfc3339(
            "conversation updated_at",
            &row.try_get::<String, _>("updated_at")?,
        )?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use leadflow_core::domain::conversation::{
        Conversation, ConversationId, ConversationMode, ConversationStatus, Intention,
        LeadTemperature,
    };

    use super::SqlConversationRepository;
    use crate::{connect_with_settings, PoolSettings};
    use crate::migrations::run_pending;
    use crate::repositories::ConversationRepository;

    async fn repository() -> SqlConversationRepository {
        let pool = connect_with_settings("sqlite::memory:", PoolSettings::single_connection())
            .await
            .expect("connect");
        run_pending(&pool).await.expect("run migrations");
        SqlConversationRepository::new(pool)
    }

    fn conversation(id: &str, phone: &str) -> Conversation {
        Conversation {
            id: ConversationId(id.to_string()),
            phone_number: phone.to_string(),
            status: ConversationStatus::Active,
            mode: ConversationMode::Ai,
            assigned_to: "LeadFlow".to_string(),
            customer_name: None,
            vehicle: None,
            city: None,
            intention: Intention::Unset,
            lead_temperature: LeadTemperature::Warm,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn save_and_find_active_round_trips() {
        let repo = repository().await;
        let mut conv = conversation("c-1", "5511999990000");
        conv.customer_name = Some("Maria".to_string());
        conv.intention = Intention::Sell;

        repo.save(conv.clone()).await.expect("save");

        let found = repo
            .find_active_by_phone("5511999990000")
            .await
            .expect("find")
            .expect("conversation present");
        assert_eq!(found.customer_name.as_deref(), Some("Maria"));
        assert_eq!(found.intention, Intention::Sell);
    }

    #[tokio::test]
    async fn closed_conversations_are_not_found_as_active() {
        let repo = repository().await;
        let mut conv = conversation("c-1", "5511999990000");
        conv.status = ConversationStatus::Closed;
        repo.save(conv).await.expect("save");

        let found = repo.find_active_by_phone("5511999990000").await.expect("find");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn list_active_filters_by_mode() {
        let repo = repository().await;
        let ai = conversation("c-1", "5511999990001");
        let mut human = conversation("c-2", "5511999990002");
        human.mode = ConversationMode::Human;

        repo.save(ai).await.expect("save ai");
        repo.save(human).await.expect("save human");

        let ai_only = repo.list_active(Some(ConversationMode::Ai)).await.expect("list");
        assert_eq!(ai_only.len(), 1);
        assert_eq!(ai_only[0].phone_number, "5511999990001");

        let all = repo.list_active(None).await.expect("list all");
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn close_stale_only_touches_old_conversations() {
        let repo = repository().await;
        let mut old = conversation("c-1", "5511999990001");
        old.updated_at = Utc::now() - Duration::days(8);
        let fresh = conversation("c-2", "5511999990002");

        repo.save(old).await.expect("save old");
        repo.save(fresh).await.expect("save fresh");

        let closed = repo.close_stale(Utc::now() - Duration::days(7)).await.expect("close");
        assert_eq!(closed, 1);

        assert!(repo.find_active_by_phone("5511999990001").await.expect("find").is_none());
        assert!(repo.find_active_by_phone("5511999990002").await.expect("find").is_some());
    }
}
