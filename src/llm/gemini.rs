//! Google Gemini backend implementation
//!
//! SECURITY: API keys are ONLY sent to official Google endpoints (or the
//! base URL explicitly configured by the user).

use super::streaming::SseDecoder;
use super::{
    Content, EditedImage, FragmentStream, GenerationConfig, GenerativeBackend, GroundingReference,
    InlineData, LlmError, Part, StreamFragment,
};
use crate::config::GeminiConfig;
use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::env;

/// Official Google Gemini API endpoint
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub struct GeminiBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    text_model: String,
    image_model: String,
    edit_model: String,
}

impl GeminiBackend {
    /// Create a backend from config; the key is read from the env var it names
    pub fn new(config: &GeminiConfig) -> anyhow::Result<Self> {
        let api_key = env::var(&config.api_key_env)
            .with_context(|| format!("{} environment variable not set", config.api_key_env))?;
        Ok(Self::with_api_key(config, api_key))
    }

    pub fn with_api_key(config: &GeminiConfig, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            text_model: config.text_model.clone(),
            image_model: config.image_model.clone(),
            edit_model: config.edit_model.clone(),
        }
    }

    fn url(&self, model: &str, method: &str) -> String {
        let separator = if method.contains('?') { '&' } else { '?' };
        format!(
            "{}/{}:{}{}key={}",
            self.base_url, model, method, separator, self.api_key
        )
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(LlmError::from_network_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::from_http_status(status, error_text));
        }
        Ok(response)
    }
}

/// Build the streaming request body for a projected conversation
fn text_request(contents: &[Content], config: &GenerationConfig) -> GeminiRequest {
    GeminiRequest {
        contents: contents.iter().map(GeminiContent::from).collect(),
        system_instruction: config
            .system_instruction
            .as_ref()
            .map(|text| GeminiSystemInstruction {
                parts: vec![GeminiPart::text(text.clone())],
            }),
        tools: config
            .search_enabled
            .then(|| vec![GeminiTool::google_search()]),
        generation_config: config.reduced_reasoning.then(|| GeminiGenerationConfig {
            thinking_config: Some(GeminiThinkingConfig { thinking_budget: 0 }),
            response_modalities: None,
        }),
    }
}

fn edit_request(prompt: &str, source: &InlineData) -> GeminiRequest {
    GeminiRequest {
        contents: vec![GeminiContent {
            role: "user".to_string(),
            parts: vec![
                GeminiPart::inline_data(source.clone()),
                GeminiPart::text(prompt),
            ],
        }],
        system_instruction: None,
        tools: None,
        generation_config: Some(GeminiGenerationConfig {
            thinking_config: None,
            response_modalities: Some(vec!["TEXT".to_string(), "IMAGE".to_string()]),
        }),
    }
}

/// Turn one SSE payload into a fragment
///
/// Returns `Ok(None)` for chunks that carry neither text nor references.
fn parse_stream_payload(payload: &str) -> Result<Option<StreamFragment>, LlmError> {
    let chunk: GeminiResponse = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::debug!("Skipping unparseable stream chunk: {}", e);
            return Ok(None);
        }
    };

    if let Some(error) = chunk.error {
        return Err(LlmError::ServiceError(error.message));
    }

    let Some(candidate) = chunk.candidates.into_iter().next() else {
        return Ok(None);
    };

    let text_delta: String = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter(|part| !part.thought.unwrap_or(false))
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();

    let grounding = candidate.grounding_metadata.map(|metadata| {
        metadata
            .grounding_chunks
            .into_iter()
            .filter_map(|chunk| chunk.web)
            .map(|web| GroundingReference {
                title: web.title.unwrap_or_else(|| web.uri.clone()),
                uri: web.uri,
            })
            .collect::<Vec<_>>()
    });

    if text_delta.is_empty() && grounding.is_none() {
        return Ok(None);
    }
    Ok(Some(StreamFragment {
        text_delta,
        grounding,
    }))
}

fn parse_edit_response(response: GeminiResponse) -> Result<EditedImage, LlmError> {
    let parts = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts)
        .unwrap_or_default();

    let mut text = String::new();
    let mut image = None;
    for part in parts {
        if let Some(t) = part.text {
            text.push_str(&t);
        }
        if image.is_none() {
            image = part.inline_data;
        }
    }

    let image = image.ok_or(LlmError::NoImageReturned)?;
    Ok(EditedImage { text, image })
}

#[async_trait]
impl GenerativeBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn stream_text(
        &self,
        contents: &[Content],
        config: &GenerationConfig,
    ) -> Result<FragmentStream, LlmError> {
        let request = text_request(contents, config);
        tracing::debug!(
            "Gemini stream request: {} contents, search={}, reduced_reasoning={}",
            request.contents.len(),
            config.search_enabled,
            config.reduced_reasoning
        );

        let url = self.url(&self.text_model, "streamGenerateContent?alt=sse");
        let response = self.post(&url, &request).await?;
        let mut bytes = Box::pin(response.bytes_stream());

        Ok(Box::pin(async_stream::stream! {
            let mut decoder = SseDecoder::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(LlmError::from_network_error(e));
                        return;
                    }
                };
                for payload in decoder.push(&chunk) {
                    match parse_stream_payload(&payload) {
                        Ok(Some(fragment)) => yield Ok(fragment),
                        Ok(None) => {}
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }
            for payload in decoder.finish() {
                match parse_stream_payload(&payload) {
                    Ok(Some(fragment)) => yield Ok(fragment),
                    Ok(None) => {}
                    Err(e) => yield Err(e),
                }
            }
        }))
    }

    async fn generate_image(&self, prompt: &str) -> Result<InlineData, LlmError> {
        let request = ImagenRequest {
            instances: vec![ImagenInstance {
                prompt: prompt.to_string(),
            }],
            parameters: ImagenParameters { sample_count: 1 },
        };
        let url = self.url(&self.image_model, "predict");
        let response: ImagenResponse = self
            .post(&url, &request)
            .await?
            .json()
            .await
            .map_err(LlmError::from_network_error)?;

        let prediction = response
            .predictions
            .into_iter()
            .next()
            .ok_or(LlmError::NoImageReturned)?;
        Ok(InlineData::new(
            prediction
                .mime_type
                .unwrap_or_else(|| "image/png".to_string()),
            prediction.bytes_base64_encoded,
        ))
    }

    async fn edit_image(&self, prompt: &str, source: &InlineData) -> Result<EditedImage, LlmError> {
        let request = edit_request(prompt, source);
        let url = self.url(&self.edit_model, "generateContent");
        let response: GeminiResponse = self
            .post(&url, &request)
            .await?
            .json()
            .await
            .map_err(LlmError::from_network_error)?;
        parse_edit_response(response)
    }
}

// Gemini API types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

impl From<&Content> for GeminiContent {
    fn from(content: &Content) -> Self {
        Self {
            role: content.role.as_str().to_string(),
            parts: content
                .parts
                .iter()
                .map(|part| match part {
                    Part::Text(text) => GeminiPart::text(text.clone()),
                    Part::InlineData(data) => GeminiPart::inline_data(data.clone()),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
    /// Set on reasoning summaries, which are not part of the answer
    #[serde(skip_serializing)]
    thought: Option<bool>,
}

impl GeminiPart {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    fn inline_data(data: InlineData) -> Self {
        Self {
            inline_data: Some(data),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize)]
struct GeminiTool {
    google_search: serde_json::Value,
}

impl GeminiTool {
    fn google_search() -> Self {
        Self {
            google_search: serde_json::json!({}),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<GeminiThinkingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiThinkingConfig {
    thinking_budget: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    error: Option<GeminiApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    grounding_metadata: Option<GeminiGroundingMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GeminiGroundingChunk>,
}

#[derive(Debug, Deserialize)]
struct GeminiGroundingChunk {
    web: Option<GeminiWebSource>,
}

#[derive(Debug, Deserialize)]
struct GeminiWebSource {
    uri: String,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiApiError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
struct ImagenRequest {
    instances: Vec<ImagenInstance>,
    parameters: ImagenParameters,
}

#[derive(Debug, Serialize)]
struct ImagenInstance {
    prompt: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImagenParameters {
    sample_count: u32,
}

#[derive(Debug, Deserialize)]
struct ImagenResponse {
    #[serde(default)]
    predictions: Vec<ImagenPrediction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImagenPrediction {
    bytes_base64_encoded: String,
    mime_type: Option<String>,
}
