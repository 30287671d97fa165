use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::conversation::ConversationId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSender {
    Customer,
    Bot,
    Agent,
}

/// Append-only transcript entry. Messages are never updated or deleted;
/// ordering is by `created_at`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender: MessageSender,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Marker appended to bot messages sent by the follow-up scheduler. The
/// scheduler counts these to cap re-engagement at two attempts; the marker
/// is stripped before the text goes out on the wire.
pub const FOLLOW_UP_MARKER: &str = "[follow-up]";

/// Marker for the one-shot reschedule offer sent after a no-show.
pub const RESCHEDULE_MARKER: &str = "[reagendamento]";

impl MessageSender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Bot => "bot",
            Self::Agent => "agent",
        }
    }
}

impl std::str::FromStr for MessageSender {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "customer" => Ok(Self::Customer),
            "bot" => Ok(Self::Bot),
            "agent" => Ok(Self::Agent),
            other => Err(DomainError::UnknownVariant {
                field: "message.sender",
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::MessageSender;

    #[test]
    fn sender_round_trips_through_text() {
        for sender in [MessageSender::Customer, MessageSender::Bot, MessageSender::Agent] {
            assert_eq!(sender.as_str().parse::<MessageSender>().expect("parse"), sender);
        }
    }
}
