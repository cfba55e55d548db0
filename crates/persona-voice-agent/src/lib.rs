//! Reply generation: turns a persona, the conversation so far and the user's
//! words into the persona's next line.

pub mod prompt;
pub mod reply;

pub use reply::{reply_or_apology, ResponseGenerator, APOLOGY_REPLY};
