use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use leadflow_core::domain::conversation::ConversationId;
use leadflow_core::domain::message::{Message, MessageId};

use super::{parse_rfc3339, MessageRepository, RepositoryError};
use crate::DbPool;

pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn append(&self, message: Message) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, sender, content, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id.0)
        .bind(&message.conversation_id.0)
        .bind(message.sender.as_str())
        .bind(&message.content)
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        // The window is the newest `limit` rows, handed back oldest first.
        let rows = sqlx::query(
            r#"
            SELECT id, conversation_id, sender, content, created_at
            FROM (
                SELECT id, conversation_id, sender, content, created_at
                FROM messages
                WHERE conversation_id = ?
                ORDER BY created_at DESC, id DESC
                LIMIT ?
            )
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(&conversation_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    async fn last_customer_message_at(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<DateTime<Utc>>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT created_at
            FROM messages
            WHERE conversation_id = ? AND sender = 'customer'
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(&conversation_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|value| {
            parse_rfc3339("message created_at", &value.try_get::<String, _>("created_at")?)
        })
        .transpose()
    }

    async fn last_bot_message_at(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<DateTime<Utc>>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT created_at
            FROM messages
            WHERE conversation_id = ? AND sender = 'bot'
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(&conversation_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|value| {
            parse_rfc3339("message created_at", &value.try_get::<String, _>("created_at")?)
        })
        .transpose()
    }

    async fn count_bot_messages_containing(
        &self,
        conversation_id: &ConversationId,
        marker: &str,
    ) -> Result<u32, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count
            FROM messages
            WHERE conversation_id = ? AND sender = 'bot' AND instr(content, ?) > 0
            "#,
        )
        .bind(&conversation_id.0)
        .bind(marker)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<i64, _>("count")? as u32)
    }
}

fn message_from_row(row: &SqliteRow) -> Result<Message, RepositoryError> {
    let sender_raw: String = row.try_get("sender")?;
    let sender = sender_raw
        .parse()
        .map_err(|_| RepositoryError::Decode(format!("invalid message sender: {sender_raw}")))?;

    Ok(Message {
        id: MessageId(row.try_get("id")?),
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        sender,
        content: row.try_get("content")?,
        created_at: parse_rfc3339("message created_at", &row.try_get::<String, _>("created_at")?)?,
    })
}
