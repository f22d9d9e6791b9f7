//! Telegram Bot API transport.
//!
//! Long-polls `getUpdates` and answers each message through the RAG
//! pipeline, keeping one conversation history per chat. The HTTP calls
//! sit behind the `TelegramHttpClient` trait so tests can run the full
//! bot loop against a mock.

use crate::chain::RagChain;
use crate::error::ChannelError;
use crate::session::SessionStore;
use crate::types::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const GREETING: &str =
    "Xin chào! Hãy đặt câu hỏi về tài liệu, tôi sẽ trả lời dựa trên nội dung đã được lập chỉ mục.";
const RESET_CONFIRMATION: &str = "Đã xóa lịch sử hội thoại.";

/// Wait before retrying after a failed poll.
const POLL_RETRY_SECS: u64 = 5;

/// Configuration for the Telegram transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Chats allowed to talk to the bot. Empty allows every chat.
    pub allowed_chat_ids: Vec<i64>,
    /// Long-poll timeout passed to `getUpdates`.
    pub polling_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            allowed_chat_ids: Vec::new(),
            polling_timeout_secs: 30,
        }
    }
}

/// The two Bot API calls the loop needs, mockable for tests.
#[async_trait]
pub trait TelegramHttpClient: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), String>;
    async fn get_updates(&self, offset: i64) -> Result<Vec<TelegramUpdate>, String>;
}

/// One incoming message, reduced to the fields the bot acts on.
#[derive(Debug, Clone)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub chat_id: i64,
    pub from_name: String,
    pub text: String,
}

/// The Telegram bot loop.
pub struct TelegramBot {
    config: TelegramConfig,
    chain: Arc<RagChain>,
    sessions: Arc<SessionStore>,
    http: Box<dyn TelegramHttpClient>,
    last_update_id: i64,
}

// Manual impl: the chain, session store, and HTTP client are not `Debug`.
impl std::fmt::Debug for TelegramBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramBot")
            .field("config", &self.config)
            .field("last_update_id", &self.last_update_id)
            .finish_non_exhaustive()
    }
}

impl TelegramBot {
    /// Create a bot talking to the real Telegram API.
    pub fn new(
        config: TelegramConfig,
        chain: Arc<RagChain>,
        sessions: Arc<SessionStore>,
    ) -> Result<Self, ChannelError> {
        if config.bot_token.is_empty() {
            return Err(ChannelError::Config {
                message: "bot token is empty".to_string(),
            });
        }
        let http = Box::new(TelegramApi::new(
            &config.bot_token,
            config.polling_timeout_secs,
        ));
        Ok(Self::with_http(config, chain, sessions, http))
    }

    /// Create a bot with a custom HTTP client.
    pub fn with_http(
        config: TelegramConfig,
        chain: Arc<RagChain>,
        sessions: Arc<SessionStore>,
        http: Box<dyn TelegramHttpClient>,
    ) -> Self {
        Self {
            config,
            chain,
            sessions,
            http,
            last_update_id: 0,
        }
    }

    /// Poll and answer until the surrounding task is cancelled.
    pub async fn run(&mut self) {
        info!(
            allowed_chats = self.config.allowed_chat_ids.len(),
            "telegram bot started"
        );
        loop {
            if let Err(e) = self.poll_once().await {
                warn!(error = %e, "telegram poll failed, backing off");
                tokio::time::sleep(Duration::from_secs(POLL_RETRY_SECS)).await;
            }
        }
    }

    /// Fetch one batch of updates and answer each allowed message.
    ///
    /// Returns how many updates were handled. The update offset advances
    /// over every received update, including disallowed ones, so spam is
    /// never redelivered.
    pub async fn poll_once(&mut self) -> Result<usize, ChannelError> {
        let updates = self
            .http
            .get_updates(self.last_update_id + 1)
            .await
            .map_err(|message| ChannelError::Api { message })?;

        let mut handled = 0;
        for update in updates {
            self.last_update_id = self.last_update_id.max(update.update_id);
            if !self.is_allowed(update.chat_id) {
                debug!(chat_id = update.chat_id, "ignoring disallowed chat");
                continue;
            }
            self.handle_update(&update).await?;
            handled += 1;
        }
        Ok(handled)
    }

    fn is_allowed(&self, chat_id: i64) -> bool {
        self.config.allowed_chat_ids.is_empty() || self.config.allowed_chat_ids.contains(&chat_id)
    }

    async fn handle_update(&self, update: &TelegramUpdate) -> Result<(), ChannelError> {
        let text = update.text.trim();
        if text.is_empty() {
            return Ok(());
        }
        let session_id = update.chat_id.to_string();
        info!(chat_id = update.chat_id, from = %update.from_name, "telegram message");

        let reply = match text {
            "/start" => {
                self.sessions.start(&session_id).await;
                GREETING.to_string()
            }
            "/reset" => {
                self.sessions.reset(&session_id).await;
                RESET_CONFIRMATION.to_string()
            }
            question => {
                // The pipeline sees only prior turns; the current question
                // rides separately and is appended afterwards.
                let history = self.sessions.history(&session_id).await;
                self.sessions
                    .append(&session_id, Message::user(question))
                    .await;
                let answer = self.chain.ask(question, history).await;
                self.sessions
                    .append(&session_id, Message::assistant(answer.clone()))
                    .await;
                answer
            }
        };

        self.http
            .send_message(update.chat_id, &reply)
            .await
            .map_err(|message| ChannelError::Api { message })
    }
}

/// Production [`TelegramHttpClient`] over reqwest.
pub struct TelegramApi {
    client: reqwest::Client,
    base_url: String,
    poll_timeout_secs: u64,
}

impl TelegramApi {
    pub fn new(bot_token: &str, poll_timeout_secs: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("https://api.telegram.org/bot{bot_token}"),
            poll_timeout_secs,
        }
    }
}

#[async_trait]
impl TelegramHttpClient for TelegramApi {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), String> {
        let url = format!("{}/sendMessage", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": text,
            }))
            .send()
            .await
            .map_err(|e| format!("sendMessage request failed: {e}"))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| format!("sendMessage response is not JSON: {e}"))?;

        if !body["ok"].as_bool().unwrap_or(false) {
            let desc = body["description"].as_str().unwrap_or("unknown error");
            return Err(format!("sendMessage rejected ({status}): {desc}"));
        }
        Ok(())
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<TelegramUpdate>, String> {
        let url = format!(
            "{}/getUpdates?offset={}&timeout={}",
            self.base_url, offset, self.poll_timeout_secs
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("getUpdates request failed: {e}"))?;

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| format!("getUpdates response is not JSON: {e}"))?;

        if !body["ok"].as_bool().unwrap_or(false) {
            let desc = body["description"].as_str().unwrap_or("unknown error");
            return Err(format!("getUpdates rejected: {desc}"));
        }

        let updates = body["result"]
            .as_array()
            .unwrap_or(&Vec::new())
            .iter()
            .filter_map(|u| {
                let msg = &u["message"];
                Some(TelegramUpdate {
                    update_id: u["update_id"].as_i64()?,
                    chat_id: msg["chat"]["id"].as_i64()?,
                    from_name: msg["from"]["first_name"]
                        .as_str()
                        .unwrap_or("Unknown")
                        .to_string(),
                    text: msg["text"].as_str().unwrap_or("").to_string(),
                })
            })
            .collect();

        Ok(updates)
    }
}
