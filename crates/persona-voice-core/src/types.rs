use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A configured character profile: prompt, style and voice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub system_prompt: String,
    #[serde(default)]
    pub style_bullets: Vec<String>,
    #[serde(default)]
    pub taboo: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when creating a persona. The store assigns id and timestamp.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPersona {
    pub slug: String,
    pub name: String,
    pub system_prompt: String,
    #[serde(default)]
    pub style_bullets: Vec<String>,
    #[serde(default)]
    pub taboo: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl NewPersona {
    pub fn into_persona(self) -> Persona {
        Persona {
            id: uuid::Uuid::new_v4().to_string(),
            slug: self.slug,
            name: self.name,
            system_prompt: self.system_prompt,
            style_bullets: self.style_bullets,
            taboo: self.taboo,
            voice_id: self.voice_id.filter(|v| !v.trim().is_empty()),
            avatar_url: self.avatar_url,
            created_at: Utc::now(),
        }
    }
}

/// Normalize a slug for lookup: lowercase with hyphens removed.
pub fn sanitize_slug(slug: &str) -> String {
    slug.replace('-', "").to_lowercase()
}

/// Whether a slug is URL-safe (ASCII alphanumerics, `-` and `_`).
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub persona_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(persona_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            persona_id: persona_id.to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// One transcript entry. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    /// Set on assistant messages only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        conversation_id: &str,
        role: Role,
        content: &str,
        audio_url: Option<String>,
        persona_id: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            audio_url,
            persona_id: match role {
                Role::Assistant => persona_id,
                Role::User => None,
            },
            created_at: Utc::now(),
        }
    }
}

/// A finished recording: one compressed blob plus its declared encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioArtifact {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub file_name: String,
}

impl AudioArtifact {
    pub fn new(bytes: Vec<u8>, mime_type: &str) -> Self {
        let ext = match mime_type.split(';').next().unwrap_or_default() {
            "audio/mpeg" => "mp3",
            "audio/wav" | "audio/x-wav" => "wav",
            "audio/ogg" => "ogg",
            "audio/mp4" => "m4a",
            _ => "webm",
        };
        Self {
            bytes,
            mime_type: mime_type.to_string(),
            file_name: format!("recording.{ext}"),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A conversation together with its messages in creation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationWithMessages {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}
