//! Conversation sessions: wire messages, pending answers, and the registry

mod conversation;
pub mod messages;
mod pending;
mod registry;

pub use conversation::Conversation;
pub use messages::{ChoiceOption, Inbound, Outbound};
pub use pending::PendingAnswers;
pub use registry::{SessionRegistry, SessionTicket};
