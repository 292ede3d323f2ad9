//! Scripted backend for integration tests and offline use
//!
//! Registered as provider "sim". No API key required. Each backend operation
//! pops the next queued reply; when nothing is queued it falls back to a
//! canned response (an echo of the prompt, a 1x1 PNG, or the unchanged
//! source image). Every call is recorded so tests can assert exactly what
//! reached the backend.

use super::{
    Content, EditedImage, FragmentStream, GenerationConfig, GenerativeBackend, GroundingReference,
    InlineData, LlmError, Role, StreamFragment,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;

/// Transparent 1x1 PNG
pub const PLACEHOLDER_PNG_BASE64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

/// A backend call as the scripted backend received it
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    StreamText {
        contents: Vec<Content>,
        config: GenerationConfig,
    },
    GenerateImage {
        prompt: String,
    },
    EditImage {
        prompt: String,
        source: InlineData,
    },
}

/// Pause point inside a scripted stream
///
/// The stream signals `reached` when it gets to the gate and then waits for
/// `release`. Both use stored permits, so the order of the two sides does
/// not matter.
#[derive(Debug, Default, Clone)]
pub struct ScriptGate {
    reached: Arc<Notify>,
    release: Arc<Notify>,
}

impl ScriptGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until a stream has arrived at this gate
    pub async fn wait_reached(&self) {
        self.reached.notified().await;
    }

    /// Let the waiting stream continue
    pub fn release(&self) {
        self.release.notify_one();
    }

    async fn pass(&self) {
        self.reached.notify_one();
        self.release.notified().await;
    }
}

#[derive(Debug)]
enum ScriptStep {
    Fragment(StreamFragment),
    Fail(LlmError),
    Hold(ScriptGate),
}

/// Sequence of stream items replayed by one `stream_text` call
#[derive(Debug, Default)]
pub struct StreamScript {
    steps: Vec<ScriptStep>,
}

impl StreamScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, delta: impl Into<String>) -> Self {
        self.steps
            .push(ScriptStep::Fragment(StreamFragment::text(delta)));
        self
    }

    /// Fragment that carries a reference list and no text
    pub fn grounding(mut self, references: Vec<GroundingReference>) -> Self {
        self.steps.push(ScriptStep::Fragment(
            StreamFragment::text("").with_grounding(references),
        ));
        self
    }

    pub fn fragment(mut self, fragment: StreamFragment) -> Self {
        self.steps.push(ScriptStep::Fragment(fragment));
        self
    }

    /// Fail mid-stream; later steps are never replayed
    pub fn fail(mut self, error: LlmError) -> Self {
        self.steps.push(ScriptStep::Fail(error));
        self
    }

    pub fn hold(mut self, gate: &ScriptGate) -> Self {
        self.steps.push(ScriptStep::Hold(gate.clone()));
        self
    }
}

/// Scripted `GenerativeBackend`
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    streams: Mutex<VecDeque<Result<StreamScript, LlmError>>>,
    images: Mutex<VecDeque<Result<InlineData, LlmError>>>,
    edits: Mutex<VecDeque<Result<EditedImage, LlmError>>>,
    calls: Mutex<Vec<BackendCall>>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_stream(&self, script: StreamScript) -> &Self {
        lock(&self.streams).push_back(Ok(script));
        self
    }

    /// Make the next `stream_text` call fail before any fragment
    pub fn push_stream_error(&self, error: LlmError) -> &Self {
        lock(&self.streams).push_back(Err(error));
        self
    }

    pub fn push_image(&self, result: Result<InlineData, LlmError>) -> &Self {
        lock(&self.images).push_back(result);
        self
    }

    pub fn push_edit(&self, result: Result<EditedImage, LlmError>) -> &Self {
        lock(&self.edits).push_back(result);
        self
    }

    /// All calls received so far, oldest first
    pub fn calls(&self) -> Vec<BackendCall> {
        lock(&self.calls).clone()
    }

    fn record(&self, call: BackendCall) {
        tracing::debug!("Scripted backend call: {:?}", call);
        lock(&self.calls).push(call);
    }
}

/// Canned reply: echo the text of the last user content
fn echo_script(contents: &[Content]) -> StreamScript {
    let prompt = contents
        .iter()
        .rev()
        .find(|content| content.role == Role::User)
        .map(|content| {
            content
                .parts
                .iter()
                .filter_map(|part| part.as_text())
                .last()
                .unwrap_or_default()
                .to_string()
        })
        .unwrap_or_default();
    StreamScript::new().text("(sim) ").text(prompt)
}

#[async_trait]
impl GenerativeBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "sim"
    }

    async fn stream_text(
        &self,
        contents: &[Content],
        config: &GenerationConfig,
    ) -> Result<FragmentStream, LlmError> {
        self.record(BackendCall::StreamText {
            contents: contents.to_vec(),
            config: config.clone(),
        });

        let queued = lock(&self.streams).pop_front();
        let script = match queued {
            Some(reply) => reply?,
            None => echo_script(contents),
        };

        Ok(Box::pin(async_stream::stream! {
            for step in script.steps {
                match step {
                    ScriptStep::Fragment(fragment) => yield Ok(fragment),
                    ScriptStep::Fail(error) => {
                        yield Err(error);
                        return;
                    }
                    ScriptStep::Hold(gate) => gate.pass().await,
                }
            }
        }))
    }

    async fn generate_image(&self, prompt: &str) -> Result<InlineData, LlmError> {
        self.record(BackendCall::GenerateImage {
            prompt: prompt.to_string(),
        });
        let queued = lock(&self.images).pop_front();
        queued.unwrap_or_else(|| Ok(InlineData::new("image/png", PLACEHOLDER_PNG_BASE64)))
    }

    async fn edit_image(&self, prompt: &str, source: &InlineData) -> Result<EditedImage, LlmError> {
        self.record(BackendCall::EditImage {
            prompt: prompt.to_string(),
            source: source.clone(),
        });
        let queued = lock(&self.edits).pop_front();
        queued.unwrap_or_else(|| {
            Ok(EditedImage {
                text: format!("(sim) {}", prompt),
                image: source.clone(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Part;
    use futures::StreamExt;

    fn user(text: &str) -> Content {
        Content::new(Role::User, vec![Part::text(text)])
    }

    #[tokio::test]
    async fn test_echo_when_nothing_queued() {
        let backend = ScriptedBackend::new();
        let stream = backend
            .stream_text(&[user("hello")], &GenerationConfig::default())
            .await
            .unwrap();
        let text: String = stream
            .map(|item| item.unwrap().text_delta)
            .collect::<Vec<_>>()
            .await
            .concat();
        assert_eq!(text, "(sim) hello");
        assert_eq!(backend.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_script_stops_after_failure() {
        let backend = ScriptedBackend::new();
        backend.push_stream(
            StreamScript::new()
                .text("a")
                .fail(LlmError::Network("reset".to_string()))
                .text("never"),
        );
        let items: Vec<_> = backend
            .stream_text(&[user("x")], &GenerationConfig::default())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(LlmError::Network(_))));
    }

    #[tokio::test]
    async fn test_stream_error_before_first_fragment() {
        let backend = ScriptedBackend::new();
        backend.push_stream_error(LlmError::Unauthorized("bad key".to_string()));
        let result = backend
            .stream_text(&[user("x")], &GenerationConfig::default())
            .await;
        assert!(matches!(result, Err(LlmError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_gate_pauses_stream() {
        let backend = ScriptedBackend::new();
        let gate = ScriptGate::new();
        backend.push_stream(StreamScript::new().text("a").hold(&gate).text("b"));

        let mut stream = backend
            .stream_text(&[user("x")], &GenerationConfig::default())
            .await
            .unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().text_delta, "a");

        let consumer = tokio::spawn(async move { stream.next().await });
        gate.wait_reached().await;
        gate.release();
        let next = consumer.await.unwrap().unwrap().unwrap();
        assert_eq!(next.text_delta, "b");
    }

    #[tokio::test]
    async fn test_image_calls_are_logged() {
        let backend = ScriptedBackend::new();
        let image = backend.generate_image("a red bicycle").await.unwrap();
        assert_eq!(image.mime_type, "image/png");

        backend.push_edit(Err(LlmError::NoImageReturned));
        let result = backend.edit_image("blue", &image).await;
        assert!(matches!(result, Err(LlmError::NoImageReturned)));

        assert_eq!(
            backend.calls(),
            vec![
                BackendCall::GenerateImage {
                    prompt: "a red bicycle".to_string()
                },
                BackendCall::EditImage {
                    prompt: "blue".to_string(),
                    source: image,
                },
            ]
        );
    }
}
