//! Generative backend implementations

use crate::config::Config;

mod error;
mod gemini;
pub mod streaming;
mod types;

// Scripted backend (feature-gated)
#[cfg(feature = "test-sim")]
pub mod scripted;
#[cfg(feature = "test-sim")]
pub use scripted::ScriptedBackend;

pub use error::LlmError;
pub use gemini::{GeminiBackend, GEMINI_API_BASE};
pub use types::*;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Trait for generative backends
///
/// One method per backend operation. Text responses stream; image
/// operations resolve once with the complete result.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &str;

    /// Start a streamed text response for the given contents
    ///
    /// Errors before the first fragment are returned directly; errors after
    /// that arrive as an `Err` item and end the stream.
    async fn stream_text(
        &self,
        contents: &[Content],
        config: &GenerationConfig,
    ) -> std::result::Result<FragmentStream, LlmError>;

    /// Generate one image from a text prompt
    async fn generate_image(&self, prompt: &str) -> std::result::Result<InlineData, LlmError>;

    /// Edit an image according to a prompt
    ///
    /// Fails with `LlmError::NoImageReturned` if the response has no image.
    async fn edit_image(
        &self,
        prompt: &str,
        source: &InlineData,
    ) -> std::result::Result<EditedImage, LlmError>;
}

/// Create a backend by provider name
pub fn create_backend(config: &Config, name: &str) -> Result<Arc<dyn GenerativeBackend>> {
    match name.to_lowercase().as_str() {
        "gemini" | "google" => {
            let backend = GeminiBackend::new(&config.gemini)?;
            tracing::info!("Using Gemini backend (text model {})", config.gemini.text_model);
            Ok(Arc::new(backend))
        }
        #[cfg(feature = "test-sim")]
        "sim" => {
            tracing::info!("Using scripted backend");
            Ok(Arc::new(ScriptedBackend::new()))
        }
        _ => anyhow::bail!(
            "Unknown provider: {}. Available: gemini{}",
            name,
            if cfg!(feature = "test-sim") { ", sim" } else { "" }
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider() {
        let err = create_backend(&Config::default(), "claude")
            .err()
            .unwrap()
            .to_string();
        assert!(err.contains("Unknown provider: claude"));
    }

    #[cfg(feature = "test-sim")]
    #[test]
    fn test_create_sim_backend() {
        let backend = create_backend(&Config::default(), "SIM").unwrap();
        assert_eq!(backend.name(), "sim");
    }

    #[test]
    fn test_gemini_requires_key() {
        let mut config = Config::default();
        config.gemini.api_key_env = "PARLEY_TEST_KEY_THAT_IS_NEVER_SET".to_string();
        let err = create_backend(&config, "gemini").err().unwrap().to_string();
        assert!(err.contains("PARLEY_TEST_KEY_THAT_IS_NEVER_SET"));
    }
}
