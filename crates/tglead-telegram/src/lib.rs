//! Telegram adapters.
//!
//! Message history comes from a Telegram Desktop JSON export (the Bot API cannot
//! read group history); profile lookups go through the Bot API via teloxide.

pub mod export;
pub mod profile;

pub use export::ExportMessageSource;
pub use profile::BotProfileSource;
