use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationMode {
    Ai,
    Human,
}

/// What the customer came for, as extracted by the AI over the course of
/// the funnel. `Unset` until the intent is known.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intention {
    Sell,
    Buy,
    Trade,
    Appraise,
    #[default]
    Unset,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadTemperature {
    Cold,
    #[default]
    Warm,
    Hot,
}

/// One open window of contact with a phone number. The invariant that at
/// most one `Active` conversation exists per phone is enforced by the
/// repository's find-or-create path, not here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub phone_number: String,
    pub status: ConversationStatus,
    pub mode: ConversationMode,
    pub assigned_to: String,
    pub customer_name: Option<String>,
    pub vehicle: Option<String>,
    pub city: Option<String>,
    pub intention: Intention,
    pub lead_temperature: LeadTemperature,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// A lead is qualified once we know who they are and which vehicle the
    /// conversation is about. Scheduling is gated on this.
    pub fn is_qualified(&self) -> bool {
        self.customer_name.is_some() && self.vehicle.is_some()
    }
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }
}

impl ConversationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::Human => "human",
        }
    }
}

impl Intention {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sell => "sell",
            Self::Buy => "buy",
            Self::Trade => "trade",
            Self::Appraise => "appraise",
            Self::Unset => "unset",
        }
    }
}

impl LeadTemperature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hot => "hot",
            Self::Warm => "warm",
            Self::Cold => "cold",
        }
    }
}

impl std::str::FromStr for ConversationStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(Self::Active),
            "closed" => Ok(Self::Closed),
            other => Err(DomainError::UnknownVariant {
                field: "conversation.status",
                value: other.to_string(),
            }),
        }
    }
}

impl std::str::FromStr for ConversationMode {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ai" => Ok(Self::Ai),
            "human" => Ok(Self::Human),
            other => Err(DomainError::UnknownVariant {
                field: "conversation.mode",
                value: other.to_string(),
            }),
        }
    }
}

impl std::str::FromStr for Intention {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "sell" | "vender" => Ok(Self::Sell),
            "buy" | "comprar" => Ok(Self::Buy),
            "trade" | "trocar" => Ok(Self::Trade),
            "appraise" | "avaliar" => Ok(Self::Appraise),
            "unset" | "" => Ok(Self::Unset),
            other => Err(DomainError::UnknownVariant {
                field: "conversation.intention",
                value: other.to_string(),
            }),
        }
    }
}

impl std::str::FromStr for LeadTemperature {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "hot" => Ok(Self::Hot),
            "warm" => Ok(Self::Warm),
            "cold" => Ok(Self::Cold),
            other => Err(DomainError::UnknownVariant {
                field: "conversation.lead_temperature",
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{
        Conversation, ConversationId, ConversationMode, ConversationStatus, Intention,
        LeadTemperature,
    };

    fn conversation() -> Conversation {
        Conversation {
            id: ConversationId("c-1".to_string()),
            phone_number: "5511999990000".to_string(),
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

    #[test]
    fn qualification_requires_name_and_vehicle() {
        let mut conv = conversation();
        assert!(!conv.is_qualified());

        conv.customer_name = Some("Maria".to_string());
        assert!(!conv.is_qualified());

        conv.vehicle = Some("Civic 2019".to_string());
        assert!(conv.is_qualified());
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [ConversationStatus::Active, ConversationStatus::Closed] {
            assert_eq!(status.as_str().parse::<ConversationStatus>().expect("parse"), status);
        }
    }

    #[test]
    fn intention_accepts_portuguese_aliases() {
        assert_eq!("vender".parse::<Intention>().expect("parse"), Intention::Sell);
        assert_eq!("avaliar".parse::<Intention>().expect("parse"), Intention::Appraise);
    }

    #[test]
    fn unknown_variant_is_rejected() {
        assert!("lukewarm".parse::<LeadTemperature>().is_err());
    }

    #[test]
    fn temperature_orders_cold_to_hot() {
        assert!(LeadTemperature::Cold < LeadTemperature::Warm);
        assert!(LeadTemperature::Warm < LeadTemperature::Hot);
    }
}
