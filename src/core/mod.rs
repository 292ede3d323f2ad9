//! Core domain modules
//!
//! Conversation orchestration: attachment codec, history projection, request
//! construction, mode dispatch, the conversation store and the session
//! controller that ties them together.

pub mod attachments;
pub mod autosave;
pub mod conversation_store;
pub mod dispatcher;
pub mod errors;
pub mod projection;
pub mod request_builder;
pub mod session_controller;
pub mod traits;
pub mod types;

// Re-export main types for convenience
pub use attachments::{Attachment, AttachmentConfig, AttachmentError, AttachmentStaging};
pub use conversation_store::{ConversationStore, StoreEvent};
pub use dispatcher::{DispatchPlan, Dispatcher, StreamFold};
pub use errors::CoreError;
pub use request_builder::BuiltRequest;
pub use session_controller::{SendOutcome, SessionController};
pub use traits::ChatPersistence;
pub use types::{Conversation, ResponseMode, Settings, TextMode, Turn};
