//! Public types for the Huginn API.

mod provider;
mod request;
mod response;

pub use provider::ProviderKind;
pub use request::{Attachment, CompletionRequest, GenerationParams};
pub use response::{Completion, CompletionResult, FinishReason};
