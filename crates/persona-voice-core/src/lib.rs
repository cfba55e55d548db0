//! Core types, config, errors, and stores for Persona Voice.

pub mod command;
pub mod config;
pub mod conversation_store;
pub mod error;
pub mod store;
pub mod types;
