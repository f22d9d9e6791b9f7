//! Conversation transports.
//!
//! Each transport drives the answer pipeline from an external chat
//! surface, owning the session bookkeeping around `RagChain::ask`.

pub mod telegram;

pub use telegram::{TelegramBot, TelegramConfig};
