//! JSONL-based conversation store: messages as append-only JSONL files.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Result, VoiceError};
use crate::store::ConversationStore;
use crate::types::{Conversation, ConversationWithMessages, Message, Role};

/// File-based conversation store.
///
/// Layout:
/// - `<base>/conversations.json`: array of `Conversation`
/// - `<base>/messages/<conversation id>.jsonl`: one message per line
pub struct JsonlConversationStore {
    base: PathBuf,
    // Serializes index read-modify-write cycles.
    index_lock: Mutex<()>,
}

impl JsonlConversationStore {
    pub fn new(base: PathBuf) -> Self {
        Self {
            base,
            index_lock: Mutex::new(()),
        }
    }

    /// Default store location: `~/.persona_voice/conversations/`
    pub fn default_path() -> PathBuf {
        crate::config::data_dir().join("conversations")
    }

    fn index_path(&self) -> PathBuf {
        self.base.join("conversations.json")
    }

    fn message_dir(&self) -> PathBuf {
        self.base.join("messages")
    }

    fn message_path(&self, conversation_id: &str) -> PathBuf {
        self.message_dir().join(format!("{conversation_id}.jsonl"))
    }

    async fn ensure_dirs(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.base).await?;
        tokio::fs::create_dir_all(self.message_dir()).await?;
        Ok(())
    }

    async fn load_index(&self) -> Result<Vec<Conversation>> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&data)?)
    }

    async fn save_index(&self, conversations: &[Conversation]) -> Result<()> {
        self.ensure_dirs().await?;
        let data = serde_json::to_string_pretty(conversations)?;
        let path = self.index_path();
        // Atomic write: write to temp then rename
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let path = self.message_path(conversation_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(&path).await?;
        let mut messages = Vec::new();
        for line in data.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let message: Message = serde_json::from_str(line)
                .map_err(|e| VoiceError::Store(format!("corrupt message line: {e}")))?;
            messages.push(message);
        }
        Ok(messages)
    }

    async fn touch(&self, conversation_id: &str, persona_id: Option<&str>) -> Result<()> {
        let _guard = self.index_lock.lock().await;
        let mut index = self.load_index().await?;
        let conversation = index
            .iter_mut()
            .find(|c| c.id == conversation_id)
            .ok_or_else(|| VoiceError::NotFound(format!("conversation {conversation_id}")))?;
        if let Some(persona_id) = persona_id {
            conversation.persona_id = persona_id.to_string();
        }
        conversation.updated_at = Utc::now();
        self.save_index(&index).await
    }

    /// All conversations, most recently updated first.
    pub async fn list(&self) -> Result<Vec<Conversation>> {
        let mut index = self.load_index().await?;
        index.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(index)
    }
}

#[async_trait]
impl ConversationStore for JsonlConversationStore {
    async fn create_conversation(&self, persona_id: &str) -> Result<Conversation> {
        let conversation = Conversation::new(persona_id);
        let _guard = self.index_lock.lock().await;
        let mut index = self.load_index().await?;
        index.push(conversation.clone());
        self.save_index(&index).await?;
        debug!(id = %conversation.id, persona_id, "Created conversation");
        Ok(conversation)
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        audio_url: Option<String>,
        persona_id: Option<String>,
    ) -> Result<Message> {
        // Validates existence and bumps updated_at before the line is written.
        self.touch(conversation_id, None).await?;

        let message = Message::new(conversation_id, role, content, audio_url, persona_id);
        let line = serde_json::to_string(&message)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.message_path(conversation_id))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        Ok(message)
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<ConversationWithMessages>> {
        let index = self.load_index().await?;
        let Some(conversation) = index.into_iter().find(|c| c.id == id) else {
            return Ok(None);
        };
        let messages = self.load_messages(id).await?;
        debug!(id, messages = messages.len(), "Loaded conversation");
        Ok(Some(ConversationWithMessages {
            conversation,
            messages,
        }))
    }

    async fn set_persona(&self, conversation_id: &str, persona_id: &str) -> Result<()> {
        self.touch(conversation_id, Some(persona_id)).await
    }
}
