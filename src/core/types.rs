//! Core domain types: turns, conversations, settings and response modes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::attachments::Attachment;
use crate::llm::{GroundingReference, Role};

/// Title of a conversation that has no user text yet
pub const PLACEHOLDER_TITLE: &str = "New Chat";

/// Maximum title length in characters
pub const TITLE_MAX_CHARS: usize = 30;

/// Model turn text appended when a send fails
pub const APOLOGY_TEXT: &str =
    "Sorry, something went wrong while generating a response. Please try again.";

/// Derive a conversation title from the first user prompt
pub fn derive_title(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return PLACEHOLDER_TITLE.to_string();
    }
    text.chars().take(TITLE_MAX_CHARS).collect()
}

/// How the next response should be produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResponseMode {
    /// Streamed text; search follows the `useSearch` setting
    #[default]
    Default,
    /// Streamed text with reasoning disabled
    NoReasoning,
    /// Streamed text grounded on web search
    Search,
    /// Image generation, or editing when one image is attached
    Image,
}

/// The text-producing subset of [`ResponseMode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextMode {
    Default,
    NoReasoning,
    Search,
}

impl ResponseMode {
    /// `None` for image mode
    pub fn text_mode(self) -> Option<TextMode> {
        match self {
            Self::Default => Some(TextMode::Default),
            Self::NoReasoning => Some(TextMode::NoReasoning),
            Self::Search => Some(TextMode::Search),
            Self::Image => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Default => "Default",
            Self::NoReasoning => "No reasoning",
            Self::Search => "Search",
            Self::Image => "Image",
        }
    }
}

impl From<TextMode> for ResponseMode {
    fn from(mode: TextMode) -> Self {
        match mode {
            TextMode::Default => Self::Default,
            TextMode::NoReasoning => Self::NoReasoning,
            TextMode::Search => Self::Search,
        }
    }
}

impl std::str::FromStr for ResponseMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "no-reasoning" | "noreasoning" | "fast" => Ok(Self::NoReasoning),
            "search" => Ok(Self::Search),
            "image" => Ok(Self::Image),
            other => Err(format!(
                "unknown mode '{}' (expected default, no-reasoning, search or image)",
                other
            )),
        }
    }
}

impl std::fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::NoReasoning => write!(f, "no-reasoning"),
            Self::Search => write!(f, "search"),
            Self::Image => write!(f, "image"),
        }
    }
}

/// One message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub id: String,
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Web sources behind a search-grounded model turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grounding: Option<Vec<GroundingReference>>,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    fn new(role: Role, text: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            text: text.into(),
            attachments,
            grounding: None,
            created_at: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self::new(Role::User, text, attachments)
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::new(Role::Model, text, Vec::new())
    }

    /// Model turn carrying a generated or edited image
    pub fn model_with_image(text: impl Into<String>, image: Attachment) -> Self {
        Self::new(Role::Model, text, vec![image])
    }

    pub fn is_model(&self) -> bool {
        self.role == Role::Model
    }
}

/// An ordered sequence of turns with a title
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub turns: Vec<Turn>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(title: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            turns: Vec::new(),
            created_at,
        }
    }

    pub fn turn(&self, turn_id: &str) -> Option<&Turn> {
        self.turns.iter().find(|t| t.id == turn_id)
    }
}

/// User preferences persisted as the `settings` document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub system_prompt: String,
    pub use_search: bool,
    /// Presentation only
    pub theme: String,
    /// Presentation only
    pub font: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            use_search: false,
            theme: "system".to_string(),
            font: "sans".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_title() {
        // The 30-character rule wins over the longer "...in sim" example title
        assert_eq!(
            derive_title("Explain quantum tunneling in simple terms"),
            "Explain quantum tunneling in s"
        );
        assert_eq!(derive_title("Hi"), "Hi");
        assert_eq!(derive_title("   "), PLACEHOLDER_TITLE);
        // Counts characters, not bytes
        assert_eq!(derive_title(&"é".repeat(40)).chars().count(), 30);
    }

    #[test]
    fn test_text_mode_excludes_image() {
        assert_eq!(ResponseMode::Search.text_mode(), Some(TextMode::Search));
        assert_eq!(ResponseMode::Image.text_mode(), None);
        assert_eq!(
            ResponseMode::from(TextMode::NoReasoning),
            ResponseMode::NoReasoning
        );
    }

    #[test]
    fn test_mode_from_str_and_display() {
        for mode in [
            ResponseMode::Default,
            ResponseMode::NoReasoning,
            ResponseMode::Search,
            ResponseMode::Image,
        ] {
            assert_eq!(mode.to_string().parse::<ResponseMode>().unwrap(), mode);
        }
        assert!("video".parse::<ResponseMode>().is_err());
        assert_eq!(ResponseMode::NoReasoning.label(), "No reasoning");
    }

    #[test]
    fn test_settings_json_shape() {
        let settings: Settings =
            serde_json::from_str(r#"{"systemPrompt": "Be terse", "useSearch": true}"#).unwrap();
        assert_eq!(settings.system_prompt, "Be terse");
        assert!(settings.use_search);
        assert_eq!(settings.theme, "system");

        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["useSearch"], true);
        assert!(json.get("use_search").is_none());
    }

    #[test]
    fn test_turn_serialization_skips_empty_fields() {
        let turn = Turn::model("hello");
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["role"], "model");
        assert!(json.get("attachments").is_none());
        assert!(json.get("grounding").is_none());
        assert!(json.get("createdAt").is_some());

        let back: Turn = serde_json::from_value(json).unwrap();
        assert_eq!(back, turn);
    }
}
