//! CLI transport for direct terminal interaction

use crate::config::Config;
use crate::core::conversation_store::{ConversationStore, StoreEvent};
use crate::core::{
    Attachment, AttachmentStaging, ChatPersistence, Conversation, CoreError, ResponseMode,
    SendOutcome, SessionController, Turn,
};
use crate::llm::{self, Role};
use crate::storage::ChatStorage;
use anyhow::{Context, Result};
use colored::Colorize;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Options shared by every command
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub provider: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
}

impl GlobalOptions {
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config_path {
            Some(path) => Config::load_from(path)?,
            None => Config::load().context("Failed to load configuration")?,
        };
        if let Some(dir) = &self.data_dir {
            config.storage.data_dir = Some(dir.clone());
        }
        Ok(config)
    }

    fn open_storage(&self, config: &Config) -> Result<ChatStorage> {
        ChatStorage::new(config.data_dir()?)
    }
}

/// Where a send goes
#[derive(Debug, Clone, Default)]
pub enum Target {
    /// Start a new conversation
    #[default]
    New,
    /// Continue the most recently created conversation
    Latest,
    Conversation(String),
}

/// Arguments of `parley send`
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub message: String,
    pub files: Vec<PathBuf>,
    /// Matched to `files` by position
    pub descriptions: Vec<String>,
    pub mode: ResponseMode,
    pub target: Target,
    pub output_dir: PathBuf,
}

/// Source image of `parley edit`
#[derive(Debug, Clone)]
pub enum EditSource {
    File(PathBuf),
    Turn {
        conversation_id: String,
        turn_id: String,
        attachment_id: Option<String>,
    },
}

/// Changes requested by `parley settings`
#[derive(Debug, Clone, Default)]
pub struct SettingsUpdate {
    pub system_prompt: Option<String>,
    pub use_search: Option<bool>,
    pub theme: Option<String>,
    pub font: Option<String>,
}

impl SettingsUpdate {
    fn is_empty(&self) -> bool {
        self.system_prompt.is_none()
            && self.use_search.is_none()
            && self.theme.is_none()
            && self.font.is_none()
    }
}

fn open_controller(options: &GlobalOptions) -> Result<(Config, SessionController)> {
    let config = options.load_config()?;
    let storage = options.open_storage(&config)?;
    let provider = options
        .provider
        .clone()
        .unwrap_or_else(|| config.default_provider.clone());
    let backend = llm::create_backend(&config, &provider)?;
    let controller = SessionController::new(backend, Arc::new(storage))
        .with_autosave(crate::core::autosave::DEFAULT_DEBOUNCE);
    Ok((config, controller))
}

/// Send a message and stream the response to stdout
pub async fn run_send(options: &GlobalOptions, request: SendRequest) -> Result<()> {
    let (config, controller) = open_controller(options)?;

    match &request.target {
        Target::New => controller.new_conversation(),
        Target::Latest => {
            if let Some(latest) = controller.conversations().first() {
                controller.select_conversation(&latest.id)?;
            }
        }
        Target::Conversation(id) => controller.select_conversation(id)?,
    }

    let mut staging = AttachmentStaging::new(config.attachments.clone());
    for (index, path) in request.files.iter().enumerate() {
        let id = staging
            .attach_file(path)
            .with_context(|| format!("Cannot attach {}", path.display()))?
            .id
            .clone();
        if let Some(description) = request.descriptions.get(index) {
            staging.set_description(&id, description.clone());
        }
    }
    if !staging.is_empty() {
        tracing::info!(
            "Attached {} files ({})",
            staging.count(),
            crate::core::attachments::format_size(staging.total_size())
        );
    }

    tracing::debug!(
        "Sending with {} backend in {} mode",
        controller.backend_name(),
        request.mode.label()
    );
    let printer = spawn_printer(&controller);
    let outcome = controller
        .send_message(&request.message, staging.take_all(), request.mode)
        .await;
    let outcome = join_printer(printer, outcome).await?;

    finish(&controller, outcome, &request.output_dir).await
}

/// Edit an image from a file or from an earlier turn
pub async fn run_edit(
    options: &GlobalOptions,
    prompt: &str,
    source: EditSource,
    output_dir: &Path,
) -> Result<()> {
    let (config, controller) = open_controller(options)?;
    tracing::debug!(
        "Editing with {} backend in {} mode",
        controller.backend_name(),
        ResponseMode::Image.label()
    );

    let outcome = match source {
        EditSource::File(path) => {
            let attachment = Attachment::from_path(&path, &config.attachments)
                .with_context(|| format!("Cannot attach {}", path.display()))?;
            controller.new_conversation();
            let printer = spawn_printer(&controller);
            let outcome = controller.edit_image(prompt, attachment).await;
            join_printer(printer, outcome).await?
        }
        EditSource::Turn {
            conversation_id,
            turn_id,
            attachment_id,
        } => {
            controller.select_conversation(&conversation_id)?;
            let printer = spawn_printer(&controller);
            let outcome = controller
                .edit_turn_image(&turn_id, attachment_id.as_deref(), prompt)
                .await;
            join_printer(printer, outcome).await?
        }
    };

    finish(&controller, outcome, output_dir).await
}

fn spawn_printer(controller: &SessionController) -> JoinHandle<()> {
    tokio::spawn(print_responses(
        controller.store().subscribe(),
        controller.store().clone(),
    ))
}

/// Wait for the printer to catch up; a rejected send never ends a response
async fn join_printer(
    printer: JoinHandle<()>,
    outcome: Result<SendOutcome, CoreError>,
) -> Result<SendOutcome> {
    if outcome.is_err() {
        printer.abort();
    }
    let _ = printer.await;
    Ok(outcome?)
}

/// Print model turns as they grow until the response finishes
async fn print_responses(
    mut events: mpsc::UnboundedReceiver<StoreEvent>,
    store: Arc<ConversationStore>,
) {
    let mut printed: HashMap<String, usize> = HashMap::new();
    let mut stdout = std::io::stdout();

    while let Some(event) = events.recv().await {
        match event {
            StoreEvent::TurnAppended {
                conversation_id,
                turn_id,
            }
            | StoreEvent::TurnPatched {
                conversation_id,
                turn_id,
            } => {
                let Some(turn) = store.turn(&conversation_id, &turn_id) else {
                    continue;
                };
                if !turn.is_model() {
                    continue;
                }
                let already = printed.entry(turn_id).or_insert(0);
                if let Some(delta) = turn.text.get(*already..) {
                    let _ = write!(stdout, "{}", delta);
                    let _ = stdout.flush();
                }
                *already = turn.text.len();
            }
            StoreEvent::ResponseStateChanged {
                in_flight: false, ..
            } => break,
            _ => {}
        }
    }
    if !printed.is_empty() {
        println!();
    }
}

/// Report sources and saved images, then flush everything to disk
async fn finish(
    controller: &SessionController,
    outcome: SendOutcome,
    output_dir: &Path,
) -> Result<()> {
    let turn = controller
        .store()
        .turn(outcome.conversation_id(), outcome.turn_id());

    if let Some(turn) = &turn {
        print_grounding(turn);
        for path in save_images(turn, output_dir)? {
            println!("{} {}", "Saved image:".green(), path.display());
        }
    }

    controller
        .persist_now()
        .await
        .context("Failed to save conversations")?;
    eprintln!(
        "{} {}",
        "Conversation:".dimmed(),
        outcome.conversation_id().dimmed()
    );

    if let SendOutcome::Recovered { error, .. } = outcome {
        anyhow::bail!("Response failed: {}", error);
    }
    Ok(())
}

fn print_grounding(turn: &Turn) {
    let Some(references) = turn.grounding.as_ref().filter(|r| !r.is_empty()) else {
        return;
    };
    println!();
    println!("{}", "Sources:".bold());
    for (index, reference) in references.iter().enumerate() {
        println!("  [{}] {} {}", index + 1, reference.title, reference.uri.dimmed());
    }
}

/// Write a turn's image attachments into `output_dir`
pub fn save_images(turn: &Turn, output_dir: &Path) -> Result<Vec<PathBuf>> {
    let images: Vec<_> = turn.attachments.iter().filter(|a| a.is_image()).collect();
    if images.is_empty() {
        return Ok(Vec::new());
    }

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    let mut saved = Vec::with_capacity(images.len());
    for image in images {
        let bytes = image.bytes()?;
        let path = output_dir.join(&image.name);
        std::fs::write(&path, bytes)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        saved.push(path);
    }
    Ok(saved)
}

fn load_store(options: &GlobalOptions) -> Result<(ChatStorage, ConversationStore)> {
    let config = options.load_config()?;
    let storage = options.open_storage(&config)?;
    let store = ConversationStore::new();
    store.replace_all(storage.load_conversations()?);
    Ok((storage, store))
}

/// List conversations, most recent first
pub fn run_list(options: &GlobalOptions) -> Result<()> {
    let (_, store) = load_store(options)?;
    let conversations = store.list();
    if conversations.is_empty() {
        println!("No conversations yet.");
        return Ok(());
    }

    for conversation in conversations {
        println!(
            "{}  {}  {} {}",
            conversation.id.dimmed(),
            conversation.created_at.format("%Y-%m-%d %H:%M"),
            conversation.title.bold(),
            format!("({} turns)", conversation.turns.len()).dimmed()
        );
    }
    Ok(())
}

/// Print every turn of a conversation
pub fn run_show(options: &GlobalOptions, conversation_id: &str) -> Result<()> {
    let (_, store) = load_store(options)?;
    let conversation = store
        .get(conversation_id)
        .with_context(|| format!("Conversation not found: {}", conversation_id))?;
    print_conversation(&conversation);
    Ok(())
}

fn print_conversation(conversation: &Conversation) {
    println!("{}", conversation.title.bold().cyan());
    for turn in &conversation.turns {
        println!();
        let label = match turn.role {
            Role::User => "You".bold().blue(),
            Role::Model => "Model".bold().magenta(),
        };
        println!("{} {}", label, turn.id.dimmed());
        for attachment in &turn.attachments {
            let description = attachment
                .description
                .as_deref()
                .map(|d| format!(" \"{}\"", d))
                .unwrap_or_default();
            println!(
                "  {} {}{} {}",
                "📎".dimmed(),
                attachment.name,
                description,
                attachment.mime_type.dimmed()
            );
        }
        if !turn.text.is_empty() {
            println!("{}", turn.text);
        }
        print_grounding(turn);
    }
}

/// Delete a conversation
pub fn run_delete(options: &GlobalOptions, conversation_id: &str) -> Result<()> {
    let (storage, store) = load_store(options)?;
    if !store.delete_conversation(conversation_id) {
        anyhow::bail!("Conversation not found: {}", conversation_id);
    }
    storage.save_conversations(&store.snapshot())?;
    println!("Deleted conversation {}", conversation_id);
    Ok(())
}

/// Delete one turn of a conversation
pub fn run_delete_turn(options: &GlobalOptions, conversation_id: &str, turn_id: &str) -> Result<()> {
    let (storage, store) = load_store(options)?;
    if !store.contains(conversation_id) {
        anyhow::bail!("Conversation not found: {}", conversation_id);
    }
    if !store.delete_turn(conversation_id, turn_id) {
        anyhow::bail!("Turn not found: {}", turn_id);
    }
    storage.save_conversations(&store.snapshot())?;
    println!("Deleted turn {}", turn_id);
    Ok(())
}

/// Show settings, or apply and persist changes
pub fn run_settings(options: &GlobalOptions, update: SettingsUpdate) -> Result<()> {
    let config = options.load_config()?;
    let storage = options.open_storage(&config)?;
    let mut settings = storage.load_settings()?.unwrap_or_default();

    if !update.is_empty() {
        if let Some(prompt) = update.system_prompt {
            settings.system_prompt = prompt;
        }
        if let Some(use_search) = update.use_search {
            settings.use_search = use_search;
        }
        if let Some(theme) = update.theme {
            settings.theme = theme;
        }
        if let Some(font) = update.font {
            settings.font = font;
        }
        storage.save_settings(&settings)?;
    }

    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

/// Print the effective configuration; with `init`, write the defaults first
pub fn run_config(options: &GlobalOptions, init: bool) -> Result<()> {
    let path = match &options.config_path {
        Some(path) => path.clone(),
        None => Config::config_path()?,
    };

    if init {
        if path.exists() {
            println!("{} {}", "Config already exists:".yellow(), path.display());
        } else {
            Config::default().save_to(&path)?;
            println!("{} {}", "Wrote default config to".green(), path.display());
        }
    }

    let config = options.load_config()?;
    println!("{}", "=== Parley Config ===".bold().cyan());
    println!("{} {}", "File:".bold(), path.display());
    println!("{} {}", "Data:".bold(), config.data_dir()?.display());
    println!();
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_images_writes_only_images() {
        let dir = TempDir::new().unwrap();
        let mut turn = Turn::model_with_image(
            "",
            Attachment::from_bytes("generated-1.png", "image/png", b"png"),
        );
        turn.attachments
            .push(Attachment::from_bytes("notes.txt", "text/plain", b"hi"));

        let saved = save_images(&turn, &dir.path().join("out")).unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(std::fs::read(&saved[0]).unwrap(), b"png");
    }

    #[test]
    fn test_settings_update_is_empty() {
        assert!(SettingsUpdate::default().is_empty());
        let update = SettingsUpdate {
            use_search: Some(false),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }
}
