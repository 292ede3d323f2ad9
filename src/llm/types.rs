//! Shared types for the generative backend contract

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use super::LlmError;

/// Author of a turn, as the backend names it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the ordered content list sent to the backend
#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }
}

/// A single part of a multi-part content entry
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    InlineData(InlineData),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text(text.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text(text) => Some(text),
            Part::InlineData(_) => None,
        }
    }

    pub fn is_inline_data(&self) -> bool {
        matches!(self, Part::InlineData(_))
    }
}

/// Embedded binary payload: media type plus base64 data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

impl InlineData {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }
}

/// Per-request generation options
///
/// Every field the backend understands is enumerated here; there is no
/// open-ended bag of options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationConfig {
    pub system_instruction: Option<String>,
    pub search_enabled: bool,
    pub reduced_reasoning: bool,
}

/// A web source cited by a search-grounded response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingReference {
    pub uri: String,
    pub title: String,
}

/// One increment of a streamed text response
///
/// `grounding`, when present, is the complete current reference list and
/// replaces whatever the turn held before.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamFragment {
    pub text_delta: String,
    pub grounding: Option<Vec<GroundingReference>>,
}

impl StreamFragment {
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            text_delta: delta.into(),
            grounding: None,
        }
    }

    pub fn with_grounding(mut self, references: Vec<GroundingReference>) -> Self {
        self.grounding = Some(references);
        self
    }
}

/// Result of an image-to-image edit
#[derive(Debug, Clone, PartialEq)]
pub struct EditedImage {
    pub text: String,
    pub image: InlineData,
}

/// Lazy, finite, forward-only sequence of response fragments
pub type FragmentStream = BoxStream<'static, Result<StreamFragment, LlmError>>;
