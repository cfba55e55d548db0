//! System prompt builder for persona replies.

use std::sync::LazyLock;

use regex::Regex;

use persona_voice_core::types::Persona;

/// Directive appended to every persona prompt.
pub const REPLY_DIRECTIVE: &str = "CRITICAL INSTRUCTIONS:
- Keep all responses to a MAXIMUM of 3 sentences. Be concise and impactful.
- Respond in first person as this persona - you ARE them, not narrating about them.
- Use natural, conversational language without any emotion tags, brackets, or third-person narrative.
- Express emotion through word choice and phrasing, not through descriptive tags.";

/// Build the single system instruction for a persona.
pub fn build_system_prompt(persona: &Persona) -> String {
    let mut prompt = persona.system_prompt.clone();

    if !persona.style_bullets.is_empty() {
        prompt.push_str("\n\nCommunication Style:\n");
        prompt.push_str(&bullet_list(&persona.style_bullets));
    }

    if !persona.taboo.is_empty() {
        prompt.push_str("\n\nTopics to Avoid:\n");
        prompt.push_str(&bullet_list(&persona.taboo));
    }

    prompt.push_str("\n\n");
    prompt.push_str(REPLY_DIRECTIVE);
    prompt
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

static STAGE_DIRECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[\w\s]+\]").expect("valid stage direction regex"));

static MULTI_SPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]{2,}").expect("valid whitespace regex"));

/// Remove bracketed stage directions such as `[chuckles]` from a reply.
///
/// Models occasionally ignore the no-tags directive; this keeps such markup
/// out of both the transcript and the synthesized audio.
pub fn strip_stage_directions(text: &str) -> String {
    let leading_tag = STAGE_DIRECTION_RE
        .find(text.trim_start())
        .is_some_and(|m| m.start() == 0);
    let without_tags = STAGE_DIRECTION_RE.replace_all(text, "");
    let collapsed = MULTI_SPACE_RE.replace_all(&without_tags, " ");
    let trimmed = collapsed.trim();
    if leading_tag {
        // Punctuation left dangling by a removed opening tag.
        trimmed
            .trim_start_matches(|c: char| c == ',' || c == '.' || c.is_whitespace())
            .to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persona_voice_core::types::NewPersona;

    fn persona(style: &[&str], taboo: &[&str]) -> Persona {
        NewPersona {
            slug: "naval".into(),
            name: "Naval".into(),
            system_prompt: "You are Naval Ravikant.".into(),
            style_bullets: style.iter().map(|s| s.to_string()).collect(),
            taboo: taboo.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
        .into_persona()
    }

    #[test]
    fn test_full_prompt_layout() {
        let prompt = build_system_prompt(&persona(&["Aphoristic", "Calm"], &["Politics"]));
        let expected = format!(
            "You are Naval Ravikant.\n\nCommunication Style:\n- Aphoristic\n- Calm\n\nTopics to Avoid:\n- Politics\n\n{REPLY_DIRECTIVE}"
        );
        assert_eq!(prompt, expected);
    }

    #[test]
    fn test_empty_sections_are_omitted() {
        let prompt = build_system_prompt(&persona(&[], &[]));
        assert!(!prompt.contains("Communication Style"));
        assert!(!prompt.contains("Topics to Avoid"));
        assert!(prompt.starts_with("You are Naval Ravikant.\n\nCRITICAL INSTRUCTIONS:"));
    }

    #[test]
    fn test_directive_content() {
        assert!(REPLY_DIRECTIVE.contains("MAXIMUM of 3 sentences"));
        assert!(REPLY_DIRECTIVE.contains("first person"));
        assert!(REPLY_DIRECTIVE.contains("brackets"));
    }

    #[test]
    fn test_strip_stage_directions() {
        assert_eq!(
            strip_stage_directions("[chuckles] Well, [pauses thoughtfully] that depends."),
            "Well, that depends."
        );
        assert_eq!(strip_stage_directions("No tags here."), "No tags here.");
        assert_eq!(strip_stage_directions("[sighs]"), "");
        assert_eq!(strip_stage_directions("[laughs], sure."), "sure.");
    }

    #[test]
    fn test_strip_keeps_leading_ellipsis() {
        assert_eq!(strip_stage_directions("...well, maybe."), "...well, maybe.");
        assert_eq!(
            strip_stage_directions("...well, [pauses] maybe."),
            "...well, maybe."
        );
    }
}
