//! Configuration management for parley

use crate::core::attachments::AttachmentConfig;
use crate::llm::GEMINI_API_BASE;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend used when `--provider` is not given: "gemini" or "sim"
    pub default_provider: String,
    pub gemini: GeminiConfig,
    pub storage: StorageConfig,
    pub attachments: AttachmentConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_provider: "gemini".to_string(),
            gemini: GeminiConfig::default(),
            storage: StorageConfig::default(),
            attachments: AttachmentConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub base_url: String,
    pub text_model: String,
    pub image_model: String,
    pub edit_model: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key_env: "GEMINI_API_KEY".to_string(),
            base_url: GEMINI_API_BASE.to_string(),
            text_model: "gemini-2.5-flash".to_string(),
            image_model: "imagen-3.0-generate-002".to_string(),
            edit_model: "gemini-2.0-flash-preview-image-generation".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Overrides the platform data directory
    pub data_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Invalid config file {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "parley") {
            let config_dir = proj_dirs.config_dir();
            std::fs::create_dir_all(config_dir)?;
            Ok(config_dir.join("config.toml"))
        } else {
            Ok(PathBuf::from("config.toml"))
        }
    }

    /// Directory holding `settings.json` and `conversations.json`
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.storage.data_dir {
            return Ok(dir.clone());
        }
        directories::ProjectDirs::from("", "", "parley")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .context("Could not determine a data directory; set storage.data_dir")
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config.default_provider, "gemini");
        assert_eq!(config.gemini.api_key_env, "GEMINI_API_KEY");
        assert_eq!(config.attachments.max_attachments, 10);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "default_provider = \"sim\"\n\n[gemini]\ntext_model = \"gemini-2.5-pro\"\n\n[storage]\ndata_dir = \"/tmp/parley\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.default_provider, "sim");
        assert_eq!(config.gemini.text_model, "gemini-2.5-pro");
        assert_eq!(config.gemini.image_model, "imagen-3.0-generate-002");
        assert_eq!(config.data_dir().unwrap(), PathBuf::from("/tmp/parley"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.attachments.max_attachments = 3;
        config.save_to(&path).unwrap();

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.attachments.max_attachments, 3);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "default_provider = [").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
