//! Text chat with a persona, with `@slug` switching and optional spoken replies.

use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use persona_voice_agent::{ResponseGenerator, reply_or_apology};
use persona_voice_core::command::parse_persona_switch;
use persona_voice_core::store::{ConversationStore, PersonaStore};
use persona_voice_core::types::{Persona, Role};
use persona_voice_media::{AudioResource, PlaybackManager, SpeechSynthesisClient};

use crate::app::App;

pub struct ChatSession<'a> {
    app: &'a App,
    generator: ResponseGenerator,
    speech: Option<(SpeechSynthesisClient, PlaybackManager)>,
    conversation_id: String,
    persona: Persona,
}

impl<'a> ChatSession<'a> {
    pub fn new(
        app: &'a App,
        generator: ResponseGenerator,
        speech: Option<(SpeechSynthesisClient, PlaybackManager)>,
        conversation_id: String,
        persona: Persona,
    ) -> Self {
        Self {
            app,
            generator,
            speech,
            conversation_id,
            persona,
        }
    }

    /// Handle one line of input. Returns the reply, or `None` for a bare switch.
    pub async fn handle_line(&mut self, line: &str) -> anyhow::Result<Option<String>> {
        let slugs: Vec<String> = self
            .app
            .personas
            .list()
            .await?
            .into_iter()
            .map(|p| p.slug)
            .collect();

        let mut text = line.trim().to_string();
        if let Some(switch) = parse_persona_switch(&text, slugs.iter().map(String::as_str)) {
            let persona = self.app.persona(&switch.slug).await?;
            self.app
                .conversations
                .set_persona(&self.conversation_id, &persona.id)
                .await?;
            println!("-- now talking to {} --", persona.name);
            self.persona = persona;
            match switch.message {
                Some(message) => text = message,
                None => return Ok(None),
            }
        }

        if text.is_empty() {
            return Ok(None);
        }
        self.reply(&text).await.map(Some)
    }

    async fn reply(&self, text: &str) -> anyhow::Result<String> {
        let conversations = &self.app.conversations;
        let history = conversations
            .get_conversation(&self.conversation_id)
            .await?
            .map(|c| c.messages)
            .unwrap_or_default();

        conversations
            .append_message(&self.conversation_id, Role::User, text, None, None)
            .await?;

        let reply = reply_or_apology(
            self.generator
                .generate_reply(&self.persona, &history, text)
                .await,
        );

        let audio = match &self.speech {
            Some((synthesis, _)) => match synthesis.synthesize_for(&reply, None, &self.persona).await {
                Ok(audio) => Some(audio),
                Err(e) => {
                    warn!(%e, "Reply will be text only");
                    None
                }
            },
            None => None,
        };

        conversations
            .append_message(
                &self.conversation_id,
                Role::Assistant,
                &reply,
                audio.as_ref().map(AudioResource::data_url),
                Some(self.persona.id.clone()),
            )
            .await?;

        println!("{}: {reply}", self.persona.name);

        if let (Some(audio), Some((_, playback))) = (&audio, &self.speech) {
            if let Err(e) = playback.play(audio, &CancellationToken::new()).await {
                eprintln!("{}", e.user_message());
            }
        }
        Ok(reply)
    }

    /// Read lines from stdin until EOF or `/quit`.
    pub async fn run_interactive(&mut self) -> anyhow::Result<()> {
        println!(
            "Chatting with {} (conversation {}). Type @slug to switch, /quit to exit.",
            self.persona.name, self.conversation_id
        );
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("> ");
            std::io::stdout().flush()?;
            let Some(line) = lines.next_line().await? else {
                break;
            };
            if line.trim() == "/quit" {
                break;
            }
            if let Err(e) = self.handle_line(&line).await {
                eprintln!("error: {e:#}");
            }
        }
        Ok(())
    }
}
