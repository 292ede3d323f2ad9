//! parley - multimodal chat client core for Gemini
//!
//! Streams text responses (optionally grounded in web search), generates and
//! edits images, and keeps conversations in a local JSON store.

pub mod config;
pub mod core;
pub mod llm;
pub mod storage;
pub mod transport;

pub use config::Config;
pub use core::{ResponseMode, SessionController};
