//! Mode Dispatcher - runs one backend operation per send
//!
//! A `DispatchPlan` says which operation to run. The dispatcher runs it and
//! folds the result into the conversation store: streamed text is patched
//! into a model turn fragment by fragment, images arrive as one model turn.

use futures::StreamExt;
use std::sync::Arc;

use super::attachments::Attachment;
use super::conversation_store::ConversationStore;
use super::errors::CoreError;
use super::request_builder::BuiltRequest;
use super::types::Turn;
use crate::llm::{GenerativeBackend, GroundingReference, StreamFragment};

/// Name prefix of generated image attachments
pub const GENERATED_IMAGE_CONTEXT: &str = "generated";
/// Name prefix of edited image attachments
pub const EDITED_IMAGE_CONTEXT: &str = "edited";

/// The backend operation a send resolves to
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchPlan {
    /// Streamed text response
    StreamText(BuiltRequest),
    /// Text-to-image
    GenerateImage { prompt: String },
    /// Image-to-image
    EditImage { prompt: String, source: Attachment },
}

impl DispatchPlan {
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchPlan::StreamText(_) => "stream_text",
            DispatchPlan::GenerateImage { .. } => "generate_image",
            DispatchPlan::EditImage { .. } => "edit_image",
        }
    }
}

/// Running state of a streamed response
///
/// Text accumulates; a fragment's reference list replaces the previous one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamFold {
    pub text: String,
    pub grounding: Option<Vec<GroundingReference>>,
}

impl StreamFold {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, fragment: StreamFragment) {
        self.text.push_str(&fragment.text_delta);
        if fragment.grounding.is_some() {
            self.grounding = fragment.grounding;
        }
    }

    /// Fold a whole fragment sequence into a fresh state
    pub fn replay<I>(fragments: I) -> Self
    where
        I: IntoIterator<Item = StreamFragment>,
    {
        let mut fold = Self::new();
        for fragment in fragments {
            fold.apply(fragment);
        }
        fold
    }
}

/// Executes dispatch plans against a backend
pub struct Dispatcher {
    backend: Arc<dyn GenerativeBackend>,
    store: Arc<ConversationStore>,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn GenerativeBackend>, store: Arc<ConversationStore>) -> Self {
        Self { backend, store }
    }

    pub fn backend(&self) -> &Arc<dyn GenerativeBackend> {
        &self.backend
    }

    /// Run the plan and return the id of the model turn it produced
    pub async fn run(&self, plan: DispatchPlan, conversation_id: &str) -> Result<String, CoreError> {
        tracing::debug!("Dispatching {} for {}", plan.kind(), conversation_id);
        match plan {
            DispatchPlan::StreamText(request) => self.stream_text(request, conversation_id).await,
            DispatchPlan::GenerateImage { prompt } => {
                let image = self.backend.generate_image(&prompt).await?;
                let attachment = Attachment::decode(image, GENERATED_IMAGE_CONTEXT);
                Ok(self.append(conversation_id, Turn::model_with_image("", attachment)))
            }
            DispatchPlan::EditImage { prompt, source } => {
                let source = source.encode()?;
                let edited = self.backend.edit_image(&prompt, &source).await?;
                let attachment = Attachment::decode(edited.image, EDITED_IMAGE_CONTEXT);
                Ok(self.append(
                    conversation_id,
                    Turn::model_with_image(edited.text, attachment),
                ))
            }
        }
    }

    async fn stream_text(
        &self,
        request: BuiltRequest,
        conversation_id: &str,
    ) -> Result<String, CoreError> {
        let mut stream = self
            .backend
            .stream_text(&request.contents, &request.config)
            .await?;

        let turn_id = self.append(conversation_id, Turn::model(""));
        let mut fold = StreamFold::new();
        while let Some(item) = stream.next().await {
            let fragment = item?;
            let grounding_changed = fragment.grounding.is_some();
            fold.apply(fragment);
            self.store.patch_latest_model_turn(
                conversation_id,
                &turn_id,
                &fold.text,
                grounding_changed.then(|| fold.grounding.clone()).flatten(),
            );
        }

        tracing::debug!(
            "Stream finished for {}: {} chars, {} references",
            conversation_id,
            fold.text.len(),
            fold.grounding.as_ref().map_or(0, Vec::len)
        );
        Ok(turn_id)
    }

    fn append(&self, conversation_id: &str, turn: Turn) -> String {
        let turn_id = turn.id.clone();
        self.store.append_turn(conversation_id, turn);
        turn_id
    }
}

#[cfg(all(test, feature = "test-sim"))]
mod tests {
    use super::*;
    use crate::core::types::PLACEHOLDER_TITLE;
    use crate::llm::scripted::{BackendCall, ScriptGate, StreamScript};
    use crate::llm::{InlineData, LlmError, ScriptedBackend};
    use proptest::prelude::*;

    fn reference(n: u8) -> GroundingReference {
        GroundingReference {
            uri: format!("https://{}.example", n),
            title: format!("Source {}", n),
        }
    }

    fn setup() -> (Arc<ScriptedBackend>, Arc<ConversationStore>, Dispatcher, String) {
        let backend = Arc::new(ScriptedBackend::new());
        let store = Arc::new(ConversationStore::new());
        let conversation = store.create_conversation(PLACEHOLDER_TITLE);
        let dispatcher = Dispatcher::new(backend.clone(), store.clone());
        (backend, store, dispatcher, conversation.id)
    }

    fn text_plan() -> DispatchPlan {
        DispatchPlan::StreamText(BuiltRequest {
            contents: vec![],
            config: Default::default(),
        })
    }

    #[test]
    fn test_fold_grounding_last_wins() {
        let fold = StreamFold::replay([
            StreamFragment::text("a").with_grounding(vec![reference(1)]),
            StreamFragment::text("b"),
            StreamFragment::text("c").with_grounding(vec![reference(2), reference(3)]),
        ]);
        assert_eq!(fold.text, "abc");
        assert_eq!(fold.grounding, Some(vec![reference(2), reference(3)]));
    }

    proptest! {
        #[test]
        fn prop_replay_is_deterministic(deltas in proptest::collection::vec(".{0,8}", 0..10)) {
            let fragments: Vec<_> = deltas.iter().map(|d| StreamFragment::text(d.clone())).collect();
            let once = StreamFold::replay(fragments.clone());
            let twice = StreamFold::replay(fragments);
            prop_assert_eq!(&once, &twice);
            prop_assert_eq!(once.text, deltas.concat());
        }
    }

    #[tokio::test]
    async fn test_stream_patches_single_model_turn() {
        let (backend, store, dispatcher, id) = setup();
        backend.push_stream(
            StreamScript::new()
                .text("Hel")
                .text("lo")
                .grounding(vec![reference(1)]),
        );

        let turn_id = dispatcher.run(text_plan(), &id).await.unwrap();
        let conversation = store.get(&id).unwrap();
        assert_eq!(conversation.turns.len(), 1);
        let turn = &conversation.turns[0];
        assert_eq!(turn.id, turn_id);
        assert!(turn.is_model());
        assert_eq!(turn.text, "Hello");
        assert_eq!(turn.grounding, Some(vec![reference(1)]));
    }

    #[tokio::test]
    async fn test_open_failure_appends_nothing() {
        let (backend, store, dispatcher, id) = setup();
        backend.push_stream_error(LlmError::RateLimited("quota".to_string()));

        let err = dispatcher.run(text_plan(), &id).await.unwrap_err();
        assert!(matches!(err, CoreError::Backend(LlmError::RateLimited(_))));
        assert!(store.get(&id).unwrap().turns.is_empty());
    }

    #[tokio::test]
    async fn test_mid_stream_failure_keeps_partial_text() {
        let (backend, store, dispatcher, id) = setup();
        backend.push_stream(
            StreamScript::new()
                .text("partial")
                .fail(LlmError::Network("reset".to_string())),
        );

        assert!(dispatcher.run(text_plan(), &id).await.is_err());
        let turns = store.get(&id).unwrap().turns;
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].text, "partial");
    }

    #[tokio::test]
    async fn test_patches_visible_between_fragments() {
        let (backend, store, dispatcher, id) = setup();
        let gate = ScriptGate::new();
        backend.push_stream(StreamScript::new().text("first").hold(&gate).text(" second"));

        let run = {
            let id = id.clone();
            tokio::spawn(async move { dispatcher.run(text_plan(), &id).await })
        };
        gate.wait_reached().await;
        assert_eq!(store.get(&id).unwrap().turns[0].text, "first");

        gate.release();
        run.await.unwrap().unwrap();
        assert_eq!(store.get(&id).unwrap().turns[0].text, "first second");
    }

    #[tokio::test]
    async fn test_generate_image_appends_image_turn() {
        let (backend, store, dispatcher, id) = setup();
        let plan = DispatchPlan::GenerateImage {
            prompt: "a red bicycle".to_string(),
        };
        dispatcher.run(plan, &id).await.unwrap();

        let turns = store.get(&id).unwrap().turns;
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].text, "");
        assert_eq!(turns[0].attachments.len(), 1);
        assert!(turns[0].attachments[0].name.starts_with("generated-"));
        assert_eq!(
            backend.calls(),
            vec![BackendCall::GenerateImage {
                prompt: "a red bicycle".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_edit_image_sends_encoded_source() {
        let (backend, store, dispatcher, id) = setup();
        let source = Attachment::from_bytes("cat.png", "image/png", b"cat");
        let expected = source.encode().unwrap();
        backend.push_edit(Ok(crate::llm::EditedImage {
            text: "Now blue".to_string(),
            image: InlineData::new("image/jpeg", "AAAA"),
        }));

        let plan = DispatchPlan::EditImage {
            prompt: "make it blue".to_string(),
            source,
        };
        dispatcher.run(plan, &id).await.unwrap();

        let turn = &store.get(&id).unwrap().turns[0];
        assert_eq!(turn.text, "Now blue");
        assert!(turn.attachments[0].name.starts_with("edited-"));
        assert!(turn.attachments[0].name.ends_with(".jpg"));
        assert_eq!(
            backend.calls(),
            vec![BackendCall::EditImage {
                prompt: "make it blue".to_string(),
                source: expected,
            }]
        );
    }

    #[tokio::test]
    async fn test_edit_with_malformed_source_skips_backend() {
        let (backend, _store, dispatcher, id) = setup();
        let mut source = Attachment::from_bytes("cat.png", "image/png", b"cat");
        source.data = "not a data string".to_string();

        let plan = DispatchPlan::EditImage {
            prompt: "x".to_string(),
            source,
        };
        let err = dispatcher.run(plan, &id).await.unwrap_err();
        assert!(matches!(err, CoreError::MalformedAttachment(_)));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_image_maps_to_core_error() {
        let (backend, _store, dispatcher, id) = setup();
        backend.push_image(Err(LlmError::NoImageReturned));
        let plan = DispatchPlan::GenerateImage {
            prompt: "x".to_string(),
        };
        assert!(matches!(
            dispatcher.run(plan, &id).await,
            Err(CoreError::NoImageReturned)
        ));
    }
}
