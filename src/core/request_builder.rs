//! Request construction for text responses
//!
//! `validate_send` checks caller input for every mode; `build` turns history
//! plus the new message into backend contents and a `GenerationConfig`.

use super::attachments::Attachment;
use super::errors::CoreError;
use super::projection::{project, turn_parts};
use super::types::{ResponseMode, Settings, TextMode, Turn};
use crate::llm::{Content, GenerationConfig, Role};

/// Contents and options for one streamed text request
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltRequest {
    pub contents: Vec<Content>,
    pub config: GenerationConfig,
}

/// Reject input that no mode can send
pub fn validate_send(
    text: &str,
    attachments: &[Attachment],
    mode: ResponseMode,
) -> Result<(), CoreError> {
    let has_text = !text.trim().is_empty();

    match mode {
        ResponseMode::Image => {
            if !has_text {
                return Err(CoreError::InvalidRequest(
                    "image mode needs a prompt".to_string(),
                ));
            }
            match attachments {
                [] => Ok(()),
                [single] if single.is_image() => Ok(()),
                [single] => Err(CoreError::InvalidRequest(format!(
                    "image mode can only edit an image, got {}",
                    single.mime_type
                ))),
                _ => Err(CoreError::InvalidRequest(format!(
                    "image mode accepts at most one image, got {} attachments",
                    attachments.len()
                ))),
            }
        }
        ResponseMode::Default | ResponseMode::NoReasoning | ResponseMode::Search => {
            if !has_text && attachments.is_empty() {
                return Err(CoreError::InvalidRequest(
                    "nothing to send: add text or an attachment".to_string(),
                ));
            }
            Ok(())
        }
    }
}

/// Whether the request carries the web search tool
///
/// The backend cannot combine search with file input, so files always win.
pub fn resolve_search(mode: TextMode, use_search: bool, has_files: bool) -> bool {
    let wanted = match mode {
        TextMode::Search => true,
        TextMode::Default => use_search,
        TextMode::NoReasoning => false,
    };
    if wanted && has_files {
        tracing::debug!("Search suppressed: request has file attachments");
        return false;
    }
    wanted
}

/// Build the request for a new user message
///
/// `history` holds the turns before the new message.
pub fn build(
    history: &[Turn],
    text: &str,
    attachments: &[Attachment],
    settings: &Settings,
    mode: TextMode,
) -> Result<BuiltRequest, CoreError> {
    let mut contents = project(history)?;
    contents.push(Content::new(Role::User, turn_parts(text, attachments)?));

    let system_prompt = settings.system_prompt.trim();
    let config = GenerationConfig {
        system_instruction: (!system_prompt.is_empty()).then(|| system_prompt.to_string()),
        search_enabled: resolve_search(mode, settings.use_search, !attachments.is_empty()),
        reduced_reasoning: mode == TextMode::NoReasoning,
    };

    tracing::debug!(
        "Built request: {} contents, mode={:?}, search={}",
        contents.len(),
        mode,
        config.search_enabled
    );
    Ok(BuiltRequest { contents, config })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> Attachment {
        Attachment::from_bytes("photo.png", "image/png", b"img")
    }

    fn pdf() -> Attachment {
        Attachment::from_bytes("doc.pdf", "application/pdf", b"%PDF")
    }

    #[test]
    fn test_resolve_search_table() {
        assert!(resolve_search(TextMode::Search, false, false));
        assert!(!resolve_search(TextMode::Search, false, true));
        assert!(resolve_search(TextMode::Default, true, false));
        assert!(!resolve_search(TextMode::Default, false, false));
        assert!(!resolve_search(TextMode::Default, true, true));
        assert!(!resolve_search(TextMode::NoReasoning, true, false));
    }

    #[test]
    fn test_build_with_image_suppresses_search() {
        let settings = Settings {
            use_search: true,
            ..Settings::default()
        };
        let request = build(&[], "describe this", &[image()], &settings, TextMode::Default).unwrap();
        assert!(!request.config.search_enabled);
        assert_eq!(request.contents.len(), 1);
        assert_eq!(request.contents[0].parts.len(), 3);
    }

    #[test]
    fn test_build_appends_new_turn_after_history() {
        let history = vec![Turn::user("hi", vec![]), Turn::model("hello")];
        let request = build(
            &history,
            "next",
            &[],
            &Settings::default(),
            TextMode::NoReasoning,
        )
        .unwrap();
        assert_eq!(request.contents.len(), 3);
        assert_eq!(request.contents[1].role, Role::Model);
        assert_eq!(request.contents[2].parts[0].as_text(), Some("next"));
        assert!(request.config.reduced_reasoning);
        assert!(!request.config.search_enabled);
    }

    #[test]
    fn test_system_instruction_only_when_non_blank() {
        let mut settings = Settings::default();
        settings.system_prompt = "   ".to_string();
        let request = build(&[], "x", &[], &settings, TextMode::Default).unwrap();
        assert_eq!(request.config.system_instruction, None);

        settings.system_prompt = " Answer in French ".to_string();
        let request = build(&[], "x", &[], &settings, TextMode::Search).unwrap();
        assert_eq!(
            request.config.system_instruction.as_deref(),
            Some("Answer in French")
        );
        assert!(request.config.search_enabled);
    }

    #[test]
    fn test_validate_image_mode() {
        assert!(validate_send("a red bicycle", &[], ResponseMode::Image).is_ok());
        assert!(validate_send("make it blue", &[image()], ResponseMode::Image).is_ok());

        for (text, files) in [
            ("", vec![]),
            ("x", vec![pdf()]),
            ("x", vec![image(), image()]),
        ] {
            assert!(matches!(
                validate_send(text, &files, ResponseMode::Image),
                Err(CoreError::InvalidRequest(_))
            ));
        }
    }

    #[test]
    fn test_validate_text_modes() {
        assert!(validate_send("", &[pdf()], ResponseMode::Default).is_ok());
        assert!(validate_send("hello", &[], ResponseMode::Search).is_ok());
        assert!(matches!(
            validate_send("  ", &[], ResponseMode::NoReasoning),
            Err(CoreError::InvalidRequest(_))
        ));
    }
}
