use chrono::NaiveDate;

use leadflow_core::domain::conversation::Conversation;
use leadflow_core::domain::message::{Message, MessageSender};

/// One transcript line handed to the model, newest last.
#[derive(Clone, Debug, PartialEq)]
pub struct ContextMessage {
    pub sender: MessageSender,
    pub content: String,
}

impl From<&Message> for ContextMessage {
    fn from(message: &Message) -> Self {
        Self { sender: message.sender, content: message.content.clone() }
    }
}

/// An earlier visit booked from the same phone. Lets the model greet a
/// returning customer accordingly instead of starting from zero.
#[derive(Clone, Debug, PartialEq)]
pub struct PriorAppointment {
    pub date: NaiveDate,
    pub time: String,
    pub status: String,
}

/// Free slots for one day, as offered to the customer.
#[derive(Clone, Debug, PartialEq)]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub weekday: &'static str,
    pub times: Vec<String>,
}

/// Everything the model sees for one turn: the lead sheet so far, the
/// recent transcript window, earlier visits from this phone, and which
/// visit slots are currently open.
#[derive(Clone, Debug)]
pub struct AgentContext {
    pub bot_name: String,
    pub brand_name: String,
    pub phone_number: String,
    pub customer_name: Option<String>,
    pub vehicle: Option<String>,
    pub city: Option<String>,
    pub intention: String,
    pub lead_temperature: String,
    pub history: Vec<ContextMessage>,
    pub availability: Vec<DayAvailability>,
    pub prior_appointments: Vec<PriorAppointment>,
    pub today: NaiveDate,
}

impl AgentContext {
    pub fn for_conversation(
        bot_name: &str,
        brand_name: &str,
        conversation: &Conversation,
        history: &[Message],
        availability: Vec<DayAvailability>,
        prior_appointments: Vec<PriorAppointment>,
        today: NaiveDate,
    ) -> Self {
        Self {
            bot_name: bot_name.to_string(),
            brand_name: brand_name.to_string(),
            phone_number: conversation.phone_number.clone(),
            customer_name: conversation.customer_name.clone(),
            vehicle: conversation.vehicle.clone(),
            city: conversation.city.clone(),
            intention: conversation.intention.as_str().to_string(),
            lead_temperature: conversation.lead_temperature.as_str().to_string(),
            history: history.iter().map(ContextMessage::from).collect(),
            availability,
            prior_appointments,
            today,
        }
    }
}
