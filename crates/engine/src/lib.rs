pub mod availability;
pub mod booking;
pub mod followup;
pub mod orchestrator;
pub mod validator;

pub use availability::AvailabilityService;
pub use booking::{BookingOutcome, BookingRequest, BookingService};
pub use followup::{FollowUpConfig, FollowUpScheduler, SweepReport};
pub use orchestrator::{EngineConfig, Orchestrator};
pub use validator::{SlotRejection, SlotValidator};
