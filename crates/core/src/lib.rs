pub mod collab;
pub mod config;
pub mod domain;
pub mod errors;
pub mod schedule;

pub use collab::{
    CalendarClient, CalendarError, LeadRecord, LeadTracker, LeadUpdate, NoopCalendarClient,
    NoopLeadTracker, NoopOperatorNotifier, OperatorNotifier,
};
pub use domain::appointment::{Appointment, AppointmentId, AppointmentStatus};
pub use domain::conversation::{
    Conversation, ConversationId, ConversationMode, ConversationStatus, Intention, LeadTemperature,
};
pub use domain::message::{Message, MessageId, MessageSender};
pub use errors::{ApplicationError, DomainError};
pub use schedule::{BusinessHours, TimeOfDay};
