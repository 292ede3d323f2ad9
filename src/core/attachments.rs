//! Attachment codec and staging area
//!
//! An attachment stores its payload as a self-describing embedded-data
//! string (`data:<mime>;base64,<payload>`). The codec converts between that
//! form, raw bytes and the backend's inline-data parts.

use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::errors::CoreError;
use crate::llm::InlineData;

const BASE64_DELIMITER: &str = ";base64,";

/// Configuration for attachment handling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentConfig {
    /// Maximum file size in bytes (default: 10MB)
    pub max_attachment_size: u64,
    /// Maximum number of attachments per message (default: 10)
    pub max_attachments: usize,
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            max_attachment_size: 10 * 1024 * 1024, // 10MB
            max_attachments: 10,
        }
    }
}

/// Detect the MIME type of a file from its extension
pub fn detect_mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "csv" => "text/csv",
        "md" | "markdown" => "text/markdown",
        "html" | "htm" => "text/html",
        "txt" | "log" | "rs" | "py" | "js" | "ts" | "toml" | "yaml" | "yml" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// File extension used when naming a decoded attachment
pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/heic" => "heic",
        "video/mp4" => "mp4",
        "video/quicktime" => "mov",
        "video/webm" => "webm",
        "audio/mpeg" => "mp3",
        "audio/wav" => "wav",
        "audio/ogg" => "ogg",
        "application/pdf" => "pdf",
        "application/json" => "json",
        "text/csv" => "csv",
        "text/markdown" => "md",
        "text/html" => "html",
        "text/plain" => "txt",
        _ => "bin",
    }
}

/// A file attached to a turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub mime_type: String,
    /// `data:<mime>;base64,<payload>`
    pub data: String,
    /// Original filename
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Attachment {
    /// Build an attachment from raw bytes
    pub fn from_bytes(name: impl Into<String>, mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        let mime_type = mime_type.into();
        Self {
            id: Uuid::new_v4().to_string(),
            data: format!("data:{}{}{}", mime_type, BASE64_DELIMITER, BASE64.encode(bytes)),
            mime_type,
            name: name.into(),
            description: None,
        }
    }

    /// Read a file from disk, enforcing the configured size limit
    pub fn from_path(path: &Path, config: &AttachmentConfig) -> Result<Self, AttachmentError> {
        if !path.exists() {
            return Err(AttachmentError::FileNotFound(path.display().to_string()));
        }

        let size = fs::metadata(path)
            .map_err(|e| AttachmentError::Io(e.to_string()))?
            .len();
        if size > config.max_attachment_size {
            return Err(AttachmentError::FileTooLarge {
                size,
                max: config.max_attachment_size,
            });
        }

        let bytes = fs::read(path).map_err(|e| AttachmentError::Io(e.to_string()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::from_bytes(name, detect_mime_type(path), &bytes))
    }

    /// Split the data string into a backend inline-data part
    pub fn encode(&self) -> Result<InlineData, CoreError> {
        let (header, payload) = self.data.split_once(BASE64_DELIMITER).ok_or_else(|| {
            CoreError::MalformedAttachment(format!(
                "attachment \"{}\" ({}) has no base64 payload",
                self.name, self.id
            ))
        })?;

        let mime_type = header
            .strip_prefix("data:")
            .filter(|mime| !mime.is_empty())
            .unwrap_or(&self.mime_type);
        Ok(InlineData::new(mime_type, payload))
    }

    /// Wrap backend image data as a new attachment named after `context`
    pub fn decode(inline: InlineData, context: &str) -> Self {
        let id = Uuid::new_v4().to_string();
        let short_id: String = id.chars().take(8).collect();
        let name = format!(
            "{}-{}.{}",
            context,
            short_id,
            extension_for_mime(&inline.mime_type)
        );
        Self {
            data: format!("data:{}{}{}", inline.mime_type, BASE64_DELIMITER, inline.data),
            mime_type: inline.mime_type,
            id,
            name,
            description: None,
        }
    }

    /// Text part sent ahead of the attachment's data part
    pub fn preface(&self) -> String {
        match &self.description {
            Some(description) => format!(
                "This file, which I've named \"{}\", has the original filename \"{}\".",
                description, self.name
            ),
            None => format!(
                "This is the file with the original filename \"{}\".",
                self.name
            ),
        }
    }

    /// Decoded payload bytes
    pub fn bytes(&self) -> Result<Vec<u8>, CoreError> {
        let inline = self.encode()?;
        BASE64.decode(inline.data.as_bytes()).map_err(|e| {
            CoreError::MalformedAttachment(format!("attachment \"{}\": {}", self.name, e))
        })
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    /// Decoded size in bytes, computed from the payload length
    pub fn size(&self) -> u64 {
        let payload = self
            .data
            .split_once(BASE64_DELIMITER)
            .map(|(_, payload)| payload)
            .unwrap_or(&self.data);
        let padding = payload.bytes().rev().take_while(|b| *b == b'=').count() as u64;
        (payload.len() as u64 * 3 / 4).saturating_sub(padding)
    }
}

/// Format a size in bytes to a human-readable string
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1}GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

fn size_label(bytes: &u64) -> String {
    format_size(*bytes)
}

/// Error types for attachment operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttachmentError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File too large: {} (max: {})", size_label(.size), size_label(.max))]
    FileTooLarge { size: u64, max: u64 },

    #[error("Too many attachments: {count} (max: {max})")]
    TooManyAttachments { count: usize, max: usize },

    #[error("IO error: {0}")]
    Io(String),
}

/// Staging area for attachments of the next message
///
/// Descriptions may be edited while an attachment is staged; `take_all`
/// hands the attachments to a send and freezes their descriptions.
#[derive(Debug, Default)]
pub struct AttachmentStaging {
    pending: Vec<Attachment>,
    config: AttachmentConfig,
}

impl AttachmentStaging {
    pub fn new(config: AttachmentConfig) -> Self {
        Self {
            pending: Vec::new(),
            config,
        }
    }

    pub fn count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self) -> &[Attachment] {
        &self.pending
    }

    /// Check if adding a file of the given size would exceed limits
    pub fn can_add(&self, size: u64) -> Result<(), AttachmentError> {
        if self.pending.len() >= self.config.max_attachments {
            return Err(AttachmentError::TooManyAttachments {
                count: self.pending.len() + 1,
                max: self.config.max_attachments,
            });
        }

        if size > self.config.max_attachment_size {
            return Err(AttachmentError::FileTooLarge {
                size,
                max: self.config.max_attachment_size,
            });
        }

        Ok(())
    }

    pub fn add(&mut self, attachment: Attachment) -> Result<(), AttachmentError> {
        self.can_add(attachment.size())?;
        self.pending.push(attachment);
        Ok(())
    }

    /// Read a file and stage it
    pub fn attach_file(&mut self, path: &Path) -> Result<&Attachment, AttachmentError> {
        let attachment = Attachment::from_path(path, &self.config)?;
        self.add(attachment)?;
        let index = self.pending.len() - 1;
        Ok(&self.pending[index])
    }

    pub fn remove(&mut self, id: &str) -> Option<Attachment> {
        let pos = self.pending.iter().position(|a| a.id == id)?;
        Some(self.pending.remove(pos))
    }

    /// Returns `false` if no staged attachment has this id
    pub fn set_description(&mut self, id: &str, description: impl Into<String>) -> bool {
        match self.pending.iter_mut().find(|a| a.id == id) {
            Some(attachment) => {
                attachment.description = Some(description.into());
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Hand every staged attachment to a send
    ///
    /// Descriptions are trimmed; blank ones become absent.
    pub fn take_all(&mut self) -> Vec<Attachment> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .map(|mut attachment| {
                attachment.description = attachment
                    .description
                    .take()
                    .map(|d| d.trim().to_string())
                    .filter(|d| !d.is_empty());
                attachment
            })
            .collect()
    }

    pub fn total_size(&self) -> u64 {
        self.pending.iter().map(Attachment::size).sum()
    }
}
