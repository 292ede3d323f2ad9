//! Domain error types
//!
//! These errors represent business logic failures, distinct from infrastructure errors.
//! Using thiserror for ergonomic error handling with proper Display implementations.

use thiserror::Error;

use super::attachments::AttachmentError;
use crate::llm::LlmError;

/// Errors raised by the conversation core
#[derive(Debug, Error)]
pub enum CoreError {
    /// A stored attachment's data string has no `;base64,` delimiter
    #[error("Malformed attachment: {0}")]
    MalformedAttachment(String),

    /// An image was required but the backend returned none
    #[error("The backend returned no image")]
    NoImageReturned,

    /// Backend call failed
    #[error("Backend error: {0}")]
    Backend(LlmError),

    /// The conversation already has a response in flight
    #[error("A response is already in progress for conversation {0}")]
    SendInProgress(String),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    /// Caller input violates a mode precondition
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Attachment error: {0}")]
    Attachment(#[from] AttachmentError),
}

impl CoreError {
    /// Failures a send turns into an apology turn instead of returning
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CoreError::MalformedAttachment(_) | CoreError::NoImageReturned | CoreError::Backend(_)
        )
    }
}

impl From<LlmError> for CoreError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::NoImageReturned => CoreError::NoImageReturned,
            other => CoreError::Backend(other),
        }
    }
}
