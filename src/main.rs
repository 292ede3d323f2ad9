use anyhow::Result;
use clap::{Parser, Subcommand};
use parley_cli::core::ResponseMode;
use parley_cli::transport::cli::{self, EditSource, GlobalOptions, SendRequest, SettingsUpdate, Target};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "parley")]
#[command(
    author,
    version = concat!(env!("CARGO_PKG_VERSION"), env!("PARLEY_VERSION_SUFFIX")),
    about = "Parley - multimodal chat with Gemini from the terminal",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Backend to use (gemini, sim)
    #[arg(short, long, global = true)]
    provider: Option<String>,

    /// Directory holding settings and conversations
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Configuration file (default: platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a message and stream the response
    Send {
        /// Message text
        message: String,

        /// Attach a file (repeatable)
        #[arg(short, long = "file")]
        files: Vec<PathBuf>,

        /// Description for the file at the same position (repeatable)
        #[arg(short, long = "describe")]
        descriptions: Vec<String>,

        /// Response mode (default, no-reasoning, search, image)
        #[arg(short, long, default_value = "default")]
        mode: ResponseMode,

        /// Continue an existing conversation
        #[arg(short, long, conflicts_with = "continue_latest")]
        conversation: Option<String>,

        /// Continue the most recent conversation
        #[arg(long = "continue")]
        continue_latest: bool,

        /// Where generated images are written
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },

    /// Edit an image with a prompt
    Edit {
        /// What to change
        prompt: String,

        /// Image file to edit
        #[arg(short, long, conflicts_with = "turn")]
        image: Option<PathBuf>,

        /// Conversation holding the image to edit (with --turn)
        #[arg(short, long, requires = "turn")]
        conversation: Option<String>,

        /// Turn holding the image to edit
        #[arg(short, long, requires = "conversation")]
        turn: Option<String>,

        /// Specific attachment of the turn (default: first image)
        #[arg(long, requires = "turn")]
        attachment: Option<String>,

        /// Where edited images are written
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },

    /// List conversations, most recent first
    List,

    /// Show a conversation
    Show {
        /// Conversation ID
        id: String,
    },

    /// Delete a conversation
    Delete {
        /// Conversation ID
        id: String,
    },

    /// Delete a single turn from a conversation
    DeleteTurn {
        /// Conversation ID
        conversation: String,

        /// Turn ID
        turn: String,
    },

    /// Show the configuration
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },

    /// Show or change settings
    Settings {
        /// System prompt sent with every text request
        #[arg(long)]
        system_prompt: Option<String>,

        /// Ground text responses in web search
        #[arg(long)]
        use_search: Option<bool>,

        /// Display theme
        #[arg(long)]
        theme: Option<String>,

        /// Display font
        #[arg(long)]
        font: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "parley_cli=debug"
    } else {
        "parley_cli=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let options = GlobalOptions {
        provider: cli.provider,
        data_dir: cli.data_dir,
        config_path: cli.config,
    };

    match cli.command {
        Commands::Send {
            message,
            files,
            descriptions,
            mode,
            conversation,
            continue_latest,
            out,
        } => {
            let target = match conversation {
                Some(id) => Target::Conversation(id),
                None if continue_latest => Target::Latest,
                None => Target::New,
            };
            cli::run_send(
                &options,
                SendRequest {
                    message,
                    files,
                    descriptions,
                    mode,
                    target,
                    output_dir: out,
                },
            )
            .await?;
        }
        Commands::Edit {
            prompt,
            image,
            conversation,
            turn,
            attachment,
            out,
        } => {
            let source = match (image, conversation, turn) {
                (Some(path), _, _) => EditSource::File(path),
                (None, Some(conversation_id), Some(turn_id)) => EditSource::Turn {
                    conversation_id,
                    turn_id,
                    attachment_id: attachment,
                },
                _ => anyhow::bail!("Either --image or --conversation with --turn is required"),
            };
            cli::run_edit(&options, &prompt, source, &out).await?;
        }
        Commands::List => {
            cli::run_list(&options)?;
        }
        Commands::Show { id } => {
            cli::run_show(&options, &id)?;
        }
        Commands::Delete { id } => {
            cli::run_delete(&options, &id)?;
        }
        Commands::DeleteTurn { conversation, turn } => {
            cli::run_delete_turn(&options, &conversation, &turn)?;
        }
        Commands::Config { init } => {
            cli::run_config(&options, init)?;
        }
        Commands::Settings {
            system_prompt,
            use_search,
            theme,
            font,
        } => {
            cli::run_settings(
                &options,
                SettingsUpdate {
                    system_prompt,
                    use_search,
                    theme,
                    font,
                },
            )?;
        }
    }

    Ok(())
}
