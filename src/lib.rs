pub mod cache;
pub mod clients;
pub mod config;
pub mod core;
pub mod error;
pub mod extract;
pub mod orchestrate;
pub mod prompt;
pub mod quota;
pub mod streaming;
pub mod text;

// Convenient re-exports
pub use error::{user_message, GenerateError};
pub use extract::Mcq;
pub use orchestrate::{Frame, GenerateRequest, Orchestrator};
