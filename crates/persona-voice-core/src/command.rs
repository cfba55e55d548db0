//! Persona-switch chat command: `@slug [message]`.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::sanitize_slug;

static SWITCH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^@([A-Za-z0-9_-]+)(?:\s+(.*))?$").expect("valid persona switch regex")
});

/// A parsed `@slug` command resolved against the known persona slugs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaSwitch {
    /// The known slug that matched (casing from the persona set).
    pub slug: String,
    /// Optional message to send to the new persona right away.
    pub message: Option<String>,
}

/// Parse `input` as a persona switch.
///
/// Returns `None` when the text is not an `@slug` command or the slug does not
/// match any of `known_slugs` (compared case-insensitively, hyphens ignored).
pub fn parse_persona_switch<'a, I>(input: &str, known_slugs: I) -> Option<PersonaSwitch>
where
    I: IntoIterator<Item = &'a str>,
{
    let caps = SWITCH_RE.captures(input.trim())?;
    let wanted = sanitize_slug(&caps[1]);
    let slug = known_slugs
        .into_iter()
        .find(|known| sanitize_slug(known) == wanted)?;
    let message = caps
        .get(2)
        .map(|m| m.as_str().trim().to_string())
        .filter(|m| !m.is_empty());
    Some(PersonaSwitch {
        slug: slug.to_string(),
        message,
    })
}
