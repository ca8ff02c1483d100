//! Session-scoped, domain-grounded streaming chat over a hosted
//! chat-completions endpoint.

pub mod commands;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod knowledge;
pub mod llm;
pub mod prompts;
pub mod session;
pub mod streaming;

pub use config::Config;
pub use controller::StreamingCompletionController;
pub use error::{BackendError, ChatError, GroundingLoadError};
pub use events::{AskRequest, ChatEvent, Domain, Persona, Role, Turn};
pub use session::{SessionKey, SessionStore};
