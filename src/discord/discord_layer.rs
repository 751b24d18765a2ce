// Discord layer - commands, event handlers, and platform adapters.

#[path = "commands/command_catalog.rs"]
pub mod commands;

#[path = "moderation/automod_handler.rs"]
pub mod automod_handler;

#[path = "moderation/guild_actions.rs"]
pub mod guild_actions;

// Re-export command types for convenience
pub use commands::moderation::{Data, Error};
