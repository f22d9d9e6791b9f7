//! LLM provider interface and test doubles.
//!
//! The pipeline talks to language models exclusively through the
//! [`LlmProvider`] trait; concrete clients live under `providers`.

use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse, Message, TokenUsage};
use async_trait::async_trait;

/// Chat completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Run one completion round trip.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Cheap token estimate for a prompt, used for logging and budgeting.
    fn estimate_tokens(&self, messages: &[Message]) -> usize;

    /// Name of the underlying model.
    fn model_name(&self) -> &str;
}

impl std::fmt::Debug for dyn LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmProvider")
            .field("model", &self.model_name())
            .finish_non_exhaustive()
    }
}

/// Tokens a chat format spends framing one message (role marker, separators).
const MESSAGE_FRAMING_TOKENS: usize = 4;
/// Tokens spent priming the assistant turn at the end of the prompt.
const REPLY_PRIMING_TOKENS: usize = 3;

/// BPE token counter backed by tiktoken-rs.
pub struct TokenCounter {
    bpe: tiktoken_rs::CoreBPE,
}

impl TokenCounter {
    /// Build a counter for `model`, falling back to the cl100k_base
    /// encoding when tiktoken does not recognize the model name.
    pub fn for_model(model: &str) -> Self {
        let bpe = tiktoken_rs::get_bpe_from_model(model).unwrap_or_else(|_| {
            tiktoken_rs::cl100k_base().expect("cl100k_base should be available")
        });
        Self { bpe }
    }

    /// Count tokens in a single string.
    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    /// Estimate tokens for a whole prompt, framing included.
    pub fn count_messages(&self, messages: &[Message]) -> usize {
        let content: usize = messages
            .iter()
            .map(|msg| MESSAGE_FRAMING_TOKENS + self.count(&msg.content))
            .sum();
        content + REPLY_PRIMING_TOKENS
    }
}

/// Scripted in-memory provider for tests and offline runs.
///
/// Responses play back in FIFO order, and every incoming request is kept
/// so tests can assert on call counts and prompt contents.
pub struct MockLlmProvider {
    model: String,
    responses: std::sync::Mutex<Vec<Result<CompletionResponse, LlmError>>>,
    requests: std::sync::Mutex<Vec<CompletionRequest>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            responses: std::sync::Mutex::new(Vec::new()),
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Queue a text completion for the next `complete` call.
    pub fn queue_text(&self, text: &str) {
        self.responses.lock().unwrap().push(Ok(Self::canned(text)));
    }

    /// Queue an error for the next `complete` call.
    pub fn queue_failure(&self, error: LlmError) {
        self.responses.lock().unwrap().push(Err(error));
    }

    /// Number of `complete` calls received so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Every request received so far, in call order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn canned(text: &str) -> CompletionResponse {
        CompletionResponse {
            message: Message::assistant(text),
            usage: TokenUsage {
                input_tokens: 120,
                output_tokens: 40,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().unwrap().push(request);
        let mut queue = self.responses.lock().unwrap();
        if queue.is_empty() {
            return Ok(Self::canned("Mock provider reply (response queue is empty)."));
        }
        queue.remove(0)
    }

    fn estimate_tokens(&self, messages: &[Message]) -> usize {
        // Byte-length heuristic, not a real tokenizer.
        messages.iter().map(|m| m.content.len() / 4).sum::<usize>() + 100
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
