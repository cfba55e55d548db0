mod app;
mod chat;
mod logging;
mod voice;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use persona_voice_core::config::Config;
use persona_voice_core::store::{ConversationStore, PersonaStore};
use persona_voice_core::types::NewPersona;
use persona_voice_media::device::FileSink;
use persona_voice_media::PlaybackManager;

use crate::app::App;
use crate::chat::ChatSession;

#[derive(Parser)]
#[command(
    name = "persona-voice",
    about = "Talk to AI personas by voice or text",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Persona management
    Personas {
        #[command(subcommand)]
        action: PersonaAction,
    },

    /// Text chat with a persona (one-shot or interactive)
    Chat {
        /// Persona slug
        #[arg(short, long)]
        persona: String,

        /// Message to send (omit for interactive mode)
        #[arg(short, long)]
        message: Option<String>,

        /// Resume an existing conversation
        #[arg(long)]
        conversation: Option<String>,

        /// Also synthesize and play replies
        #[arg(long)]
        speak: bool,

        /// Directory for reply audio
        #[arg(long, default_value = "replies")]
        out: PathBuf,

        /// Player command for reply audio (e.g. "ffplay -nodisp -autoexit")
        #[arg(long)]
        player: Option<String>,
    },

    /// Voice conversation: each input recording is one spoken turn
    Voice {
        /// Persona slug
        #[arg(short, long)]
        persona: String,

        /// Recorded turns, in order
        #[arg(short, long = "input", required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,

        /// Resume an existing conversation
        #[arg(long)]
        conversation: Option<String>,

        /// Directory for reply audio
        #[arg(long, default_value = "replies")]
        out: PathBuf,

        /// Player command for reply audio (e.g. "ffplay -nodisp -autoexit")
        #[arg(long)]
        player: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Conversation transcripts
    Conversations {
        #[command(subcommand)]
        action: ConversationAction,
    },
}

#[derive(Subcommand)]
enum PersonaAction {
    /// List personas, newest first
    List,
    /// Show one persona
    Show { slug: String },
    /// Add a persona
    Add {
        #[arg(long)]
        slug: String,
        #[arg(long)]
        name: String,
        /// Base system prompt
        #[arg(long)]
        prompt: String,
        /// Communication style bullet (repeatable)
        #[arg(long = "style")]
        style: Vec<String>,
        /// Topic to avoid (repeatable)
        #[arg(long = "taboo")]
        taboo: Vec<String>,
        /// Default synthesis voice id
        #[arg(long, conflicts_with = "voice_description")]
        voice: Option<String>,
        /// Generate a voice from this description (ElevenLabs voice design)
        #[arg(long)]
        voice_description: Option<String>,
        /// Gender hint for the generated voice
        #[arg(long, requires = "voice_description")]
        voice_gender: Option<String>,
        #[arg(long)]
        avatar: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value (dotted path)
    Get { key: String },
    /// Check the configuration for problems
    Validate,
}

#[derive(Subcommand)]
enum ConversationAction {
    /// List conversations, most recent first
    List,
    /// Print a conversation transcript
    Show { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_path);
    let config = Config::load(&config_path)?;

    logging::init(config.logging.as_ref(), cli.verbose);
    tracing::debug!(config = %config_path.display(), "Configuration loaded");

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => anyhow::bail!("'{key}' is not set"),
            },
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for warning in &warnings {
                    println!("warning: {warning}");
                }
                for error in &errors {
                    println!("error: {error}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} configuration error(s) in {}", errors.len(), config_path.display());
                }
                println!("Config OK: {}", config_path.display());
            }
        },
        Commands::Personas { action } => {
            let app = App::load(config).await?;
            match action {
                PersonaAction::List => {
                    for persona in app.personas.list().await? {
                        println!(
                            "{:<20} {:<24} voice={}",
                            persona.slug,
                            persona.name,
                            persona.voice_id.as_deref().unwrap_or("(fallback)")
                        );
                    }
                }
                PersonaAction::Show { slug } => {
                    let persona = app.persona(&slug).await?;
                    println!("{}", serde_json::to_string_pretty(&persona)?);
                }
                PersonaAction::Add {
                    slug,
                    name,
                    prompt,
                    style,
                    taboo,
                    voice,
                    voice_description,
                    voice_gender,
                    avatar,
                } => {
                    let voice = match voice_description {
                        Some(description) => {
                            app.design_voice(&name, &description, voice_gender).await?
                        }
                        None => voice,
                    };
                    let persona = app
                        .personas
                        .create(NewPersona {
                            slug,
                            name,
                            system_prompt: prompt,
                            style_bullets: style,
                            taboo,
                            voice_id: voice,
                            avatar_url: avatar,
                        })
                        .await?;
                    app.personas.save_file(&app.config.personas_file()).await?;
                    println!("Added persona {} ({})", persona.slug, persona.id);
                }
            }
        }
        Commands::Chat {
            persona,
            message,
            conversation,
            speak,
            out,
            player,
        } => {
            let app = App::load(config).await?;
            let persona = app.persona(&persona).await?;
            let conversation_id = app.conversation(&persona, conversation.as_deref()).await?;

            let speech = speak.then(|| {
                let mut sink = FileSink::new(out);
                if let Some(player) = &player {
                    sink = sink.with_player(player);
                }
                (app.synthesis(), PlaybackManager::new(std::sync::Arc::new(sink)))
            });
            let mut session = ChatSession::new(&app, app.generator()?, speech, conversation_id, persona);

            match message {
                Some(message) => {
                    session.handle_line(&message).await?;
                }
                None => session.run_interactive().await?,
            }
        }
        Commands::Voice {
            persona,
            inputs,
            conversation,
            out,
            player,
        } => {
            let app = App::load(config).await?;
            voice::run(
                &app,
                voice::VoiceArgs {
                    persona,
                    inputs,
                    conversation,
                    out_dir: out,
                    player,
                },
            )
            .await?;
        }
        Commands::Conversations { action } => {
            let app = App::load(config).await?;
            match action {
                ConversationAction::List => {
                    for conversation in app.conversations.list().await? {
                        println!(
                            "{}  persona={}  updated={}",
                            conversation.id,
                            conversation.persona_id,
                            conversation.updated_at.to_rfc3339()
                        );
                    }
                }
                ConversationAction::Show { id } => {
                    let conversation = app
                        .conversations
                        .get_conversation(&id)
                        .await?
                        .ok_or_else(|| anyhow::anyhow!("conversation {id} not found"))?;
                    let personas = app.personas.list().await?;
                    for message in conversation.messages {
                        let speaker = match &message.persona_id {
                            Some(pid) => personas
                                .iter()
                                .find(|p| &p.id == pid)
                                .map(|p| p.name.clone())
                                .unwrap_or_else(|| "assistant".into()),
                            None => "you".into(),
                        };
                        let audio = if message.audio_url.is_some() { " [audio]" } else { "" };
                        println!("{speaker}: {}{audio}", message.content);
                    }
                }
            }
        }
    }

    Ok(())
}
