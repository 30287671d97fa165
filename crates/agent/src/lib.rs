pub mod context;
pub mod openai;
pub mod provider;
pub mod response;
pub mod service;

pub use context::{AgentContext, ContextMessage, DayAvailability, PriorAppointment};
pub use openai::OpenAiProvider;
pub use provider::{AiProvider, ProviderError};
pub use response::{AgentAction, AiResponse, ExtractedLead};
pub use service::AgentService;
