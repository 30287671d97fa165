use serde::{Deserialize, Serialize};

use leadflow_core::domain::conversation::{Intention, LeadTemperature};

/// What the model wants the engine to do after replying.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentAction {
    #[default]
    None,
    Schedule,
    Transfer,
    /// The model thinks the customer will come back later; the periodic
    /// scheduler owns the actual nudge, so this only gets logged.
    FollowUp,
    Close,
}

/// Lead fields the model extracted from the turn. Every field is optional;
/// the orchestrator merges non-empty values over what the conversation
/// already holds and never erases known data.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedLead {
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub vehicle: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub intention: Option<Intention>,
    #[serde(default)]
    pub temperature: Option<LeadTemperature>,
    #[serde(default)]
    pub desired_date: Option<String>,
    #[serde(default)]
    pub desired_time: Option<String>,
}

fn default_confidence() -> f32 {
    0.7
}

/// One model turn, decoded leniently: a reply with everything else missing
/// is still usable, defaults fill the gaps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AiResponse {
    pub reply: String,
    #[serde(default)]
    pub action: AgentAction,
    #[serde(default)]
    pub extracted: ExtractedLead,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

impl AiResponse {
    /// Synthetic handoff used when every provider failed. Confidence zero
    /// marks it as not model-produced.
    pub fn fallback_transfer(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            action: AgentAction::Transfer,
            extracted: ExtractedLead::default(),
            confidence: 0.0,
        }
    }
}

impl ExtractedLead {
    pub fn is_empty(&self) -> bool {
        self.customer_name.is_none()
            && self.vehicle.is_none()
            && self.city.is_none()
            && self.intention.is_none()
            && self.temperature.is_none()
            && self.desired_date.is_none()
            && self.desired_time.is_none()
    }
}
