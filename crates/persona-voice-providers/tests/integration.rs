//! Provider integration tests: real API calls.
//!
//! These tests are skipped when the corresponding API key env var is not set.
//! Run with: `cargo test -p persona-voice-providers --test integration`

use persona_voice_core::config::TtsConfig;
use persona_voice_providers::elevenlabs::ElevenLabsTts;
use persona_voice_providers::openai::ChatCompletions;
use persona_voice_providers::{ChatCompleter, ChatMessage, CompletionRequest, SpeechSynthesizer};

fn groq_key() -> Option<String> {
    std::env::var("GROQ_API_KEY").ok().filter(|k| !k.is_empty())
}

fn eleven_key() -> Option<String> {
    std::env::var("ELEVEN_API_KEY").ok().filter(|k| !k.is_empty())
}

#[tokio::test]
async fn test_groq_chat_completion() {
    let Some(api_key) = groq_key() else {
        eprintln!("Skipping: GROQ_API_KEY not set");
        return;
    };

    let chat = ChatCompletions::groq(api_key, None);
    let request = CompletionRequest {
        model: "llama-3.1-8b-instant".into(),
        messages: vec![
            ChatMessage::new("system", "Follow instructions exactly."),
            ChatMessage::new("user", "Reply with exactly the word 'hello'."),
        ],
        max_tokens: 20,
        temperature: Some(0.0),
    };

    let reply = chat.complete(&request).await.expect("completion failed");
    let reply = reply.expect("completion had no content");
    assert!(
        reply.to_lowercase().contains("hello"),
        "Expected 'hello' in response, got: {reply}"
    );
}

#[tokio::test]
async fn test_elevenlabs_synthesis() {
    let Some(api_key) = eleven_key() else {
        eprintln!("Skipping: ELEVEN_API_KEY not set");
        return;
    };

    let tts = ElevenLabsTts::new(api_key, &TtsConfig::default());
    let audio = tts
        .synthesize("Hello.", "21m00Tcm4TlvDq8ikWAM")
        .await
        .expect("synthesis failed");
    assert!(!audio.bytes.is_empty());
    assert!(audio.mime_type.starts_with("audio/"));
}
