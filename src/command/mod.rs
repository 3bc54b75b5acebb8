//! Command module - Chat commands, translation and parent-message context

pub mod handler;
pub mod translator;

pub use handler::{extract_url_from_text, CommandContext, CommandHandler, ParentMessage};
pub use translator::{ChatCompletionTranslator, PassthroughTranslator, Translator};
