//! Persona and conversation store traits, with in-memory implementations.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Result, VoiceError};
use crate::types::{
    is_valid_slug, sanitize_slug, Conversation, ConversationWithMessages, Message, NewPersona,
    Persona, Role,
};

#[async_trait]
pub trait PersonaStore: Send + Sync {
    /// Look up a persona by slug. Tries the slug as given, then its sanitized form.
    async fn get(&self, slug: &str) -> Result<Option<Persona>>;

    async fn create(&self, fields: NewPersona) -> Result<Persona>;

    async fn list(&self) -> Result<Vec<Persona>>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(&self, persona_id: &str) -> Result<Conversation>;

    async fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        audio_url: Option<String>,
        persona_id: Option<String>,
    ) -> Result<Message>;

    async fn get_conversation(&self, id: &str) -> Result<Option<ConversationWithMessages>>;

    /// Point the conversation at another persona (persona switch).
    async fn set_persona(&self, conversation_id: &str, persona_id: &str) -> Result<()>;
}

/// In-memory persona store keyed by slug.
#[derive(Default)]
pub struct MemoryPersonaStore {
    personas: RwLock<HashMap<String, Persona>>,
}

impl MemoryPersonaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_personas(personas: Vec<Persona>) -> Self {
        let map = personas.into_iter().map(|p| (p.slug.clone(), p)).collect();
        Self {
            personas: RwLock::new(map),
        }
    }

    /// Seed from a JSON file holding an array of personas.
    ///
    /// Entries carrying `id` and `created_at` are kept as they are; bare
    /// `NewPersona` entries are assigned fresh ones.
    pub async fn load_file(path: &Path) -> Result<Self> {
        let store = Self::new();
        if !path.exists() {
            return Ok(store);
        }
        let data = tokio::fs::read_to_string(path).await?;
        let entries: Vec<PersonaEntry> = serde_json::from_str(&data)?;
        let count = entries.len();
        for entry in entries {
            match entry {
                PersonaEntry::Stored(persona) => store.insert(persona).await?,
                PersonaEntry::New(fields) => {
                    store.create(fields).await?;
                }
            }
        }
        debug!(path = %path.display(), count, "Loaded personas");
        Ok(store)
    }

    /// Write every persona to `path` (temp file + rename).
    pub async fn save_file(&self, path: &Path) -> Result<()> {
        let mut all: Vec<Persona> = self.personas.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_string_pretty(&all)?).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), count = all.len(), "Saved personas");
        Ok(())
    }

    async fn insert(&self, persona: Persona) -> Result<()> {
        if !is_valid_slug(&persona.slug) {
            return Err(VoiceError::Store(format!(
                "invalid persona slug '{}'",
                persona.slug
            )));
        }
        let mut personas = self.personas.write().await;
        let key = sanitize_slug(&persona.slug);
        if let Some(existing) = personas.keys().find(|slug| sanitize_slug(slug) == key) {
            return Err(VoiceError::Store(format!(
                "persona '{}' already exists (as '{existing}')",
                persona.slug
            )));
        }
        personas.insert(persona.slug.clone(), persona);
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PersonaEntry {
    Stored(Persona),
    New(NewPersona),
}

#[async_trait]
impl PersonaStore for MemoryPersonaStore {
    async fn get(&self, slug: &str) -> Result<Option<Persona>> {
        let personas = self.personas.read().await;
        if let Some(p) = personas.get(slug) {
            return Ok(Some(p.clone()));
        }
        let sanitized = sanitize_slug(slug);
        Ok(personas
            .values()
            .find(|p| sanitize_slug(&p.slug) == sanitized)
            .cloned())
    }

    async fn create(&self, fields: NewPersona) -> Result<Persona> {
        let persona = fields.into_persona();
        self.insert(persona.clone()).await?;
        Ok(persona)
    }

    async fn list(&self) -> Result<Vec<Persona>> {
        let mut all: Vec<Persona> = self.personas.read().await.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }
}

/// In-memory conversation store.
#[derive(Default)]
pub struct MemoryConversationStore {
    conversations: RwLock<HashMap<String, ConversationWithMessages>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn create_conversation(&self, persona_id: &str) -> Result<Conversation> {
        let conversation = Conversation::new(persona_id);
        self.conversations.write().await.insert(
            conversation.id.clone(),
            ConversationWithMessages {
                conversation: conversation.clone(),
                messages: Vec::new(),
            },
        );
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
        let mut conversations = self.conversations.write().await;
        let entry = conversations
            .get_mut(conversation_id)
            .ok_or_else(|| VoiceError::NotFound(format!("conversation {conversation_id}")))?;
        let message = Message::new(conversation_id, role, content, audio_url, persona_id);
        entry.messages.push(message.clone());
        entry.conversation.updated_at = Utc::now();
        Ok(message)
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<ConversationWithMessages>> {
        Ok(self.conversations.read().await.get(id).cloned())
    }

    async fn set_persona(&self, conversation_id: &str, persona_id: &str) -> Result<()> {
        let mut conversations = self.conversations.write().await;
        let entry = conversations
            .get_mut(conversation_id)
            .ok_or_else(|| VoiceError::NotFound(format!("conversation {conversation_id}")))?;
        entry.conversation.persona_id = persona_id.to_string();
        entry.conversation.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_persona(slug: &str) -> NewPersona {
        NewPersona {
            slug: slug.into(),
            name: slug.to_uppercase(),
            system_prompt: format!("You are {slug}."),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_persona_get_by_sanitized_slug() {
        let store = MemoryPersonaStore::new();
        store.create(new_persona("navalravikant")).await.unwrap();

        assert!(store.get("navalravikant").await.unwrap().is_some());
        assert!(store.get("Naval-Ravikant").await.unwrap().is_some());
        assert!(store.get("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persona_duplicate_and_invalid_slug() {
        let store = MemoryPersonaStore::new();
        store.create(new_persona("elon")).await.unwrap();
        assert!(store.create(new_persona("elon")).await.is_err());
        assert!(store.create(new_persona("bad slug")).await.is_err());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_persona_slugs_unique_after_sanitizing() {
        let store = MemoryPersonaStore::new();
        store.create(new_persona("naval-ravikant")).await.unwrap();

        let err = store.create(new_persona("NavalRavikant")).await.unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert_eq!(store.get("navalravikant").await.unwrap().unwrap().slug, "naval-ravikant");
    }

    #[tokio::test]
    async fn test_persona_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("personas.json");
        std::fs::write(
            &path,
            r#"[{"slug":"paulg","name":"Paul Graham","system_prompt":"You are Paul Graham.","style_bullets":["Plain words"]}]"#,
        )
        .unwrap();

        let store = MemoryPersonaStore::load_file(&path).await.unwrap();
        let p = store.get("paulg").await.unwrap().unwrap();
        assert_eq!(p.name, "Paul Graham");
        assert_eq!(p.style_bullets, vec!["Plain words".to_string()]);
    }

    #[tokio::test]
    async fn test_persona_save_keeps_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/personas.json");

        let store = MemoryPersonaStore::new();
        let elon = store.create(new_persona("elon")).await.unwrap();
        store.save_file(&path).await.unwrap();

        let reloaded = MemoryPersonaStore::load_file(&path).await.unwrap();
        let again = reloaded.get("elon").await.unwrap().unwrap();
        assert_eq!(again.id, elon.id);
        assert_eq!(again.created_at, elon.created_at);
    }

    #[tokio::test]
    async fn test_n_turns_round_trip_in_order() {
        let store = MemoryConversationStore::new();
        let conv = store.create_conversation("p1").await.unwrap();

        for i in 0..3 {
            store
                .append_message(&conv.id, Role::User, &format!("q{i}"), None, None)
                .await
                .unwrap();
            store
                .append_message(&conv.id, Role::Assistant, &format!("a{i}"), None, Some("p1".into()))
                .await
                .unwrap();
        }

        let loaded = store.get_conversation(&conv.id).await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 6);
        assert_eq!(
            loaded.messages.iter().filter(|m| m.role == Role::User).count(),
            3
        );
        let contents: Vec<_> = loaded.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["q0", "a0", "q1", "a1", "q2", "a2"]);
    }

    #[tokio::test]
    async fn test_append_to_missing_conversation() {
        let store = MemoryConversationStore::new();
        let err = store
            .append_message("nope", Role::User, "hi", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, VoiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_set_persona() {
        let store = MemoryConversationStore::new();
        let conv = store.create_conversation("p1").await.unwrap();
        store.set_persona(&conv.id, "p2").await.unwrap();
        let loaded = store.get_conversation(&conv.id).await.unwrap().unwrap();
        assert_eq!(loaded.conversation.persona_id, "p2");
    }
}
