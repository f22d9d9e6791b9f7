//! [`LlmProvider`] backed by the Google Gemini generative API.
//!
//! Wire-format notes that shape this module: the key rides in a `?key=`
//! query parameter, the system instruction is a top-level
//! `system_instruction` field rather than a message, assistant turns use
//! the role string `"model"`, and consecutive same-role turns must be
//! merged before sending.

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::llm::{LlmProvider, TokenCounter};
use crate::types::{CompletionRequest, CompletionResponse, Message, Role, TokenUsage};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

/// Default base URL of the generative API.
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Whole-request timeout applied to every Gemini call.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Non-streaming Gemini completion client.
pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    token_counter: TokenCounter,
}

// Manual impl: `TokenCounter` is not `Debug`, and the API key must not leak.
impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl GeminiProvider {
    /// Build a provider, reading the API key from the environment variable
    /// named by `config.api_key_env`; `LlmError::AuthFailed` if unset.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key =
            std::env::var(&config.api_key_env).map_err(|_| LlmError::AuthFailed {
                provider: format!("Gemini (env var '{}' not set)", config.api_key_env),
            })?;
        Self::new_with_key(config, api_key)
    }

    /// Build a provider around a key the caller already holds.
    pub fn new_with_key(config: &LlmConfig, api_key: String) -> Result<Self, LlmError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| LlmError::Connection {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        let token_counter = TokenCounter::for_model(&config.model);

        Ok(Self {
            client,
            base_url,
            api_key,
            model: config.model.clone(),
            token_counter,
        })
    }

    /// Build the JSON request body for a `generateContent` call.
    ///
    /// Leading system turns become the top-level `system_instruction`; the
    /// remaining turns are coalesced into Gemini's `contents` format.
    fn build_request_body(&self, request: &CompletionRequest) -> Value {
        let (system_text, chat_messages) = Self::split_system_instruction(&request.messages);
        let contents =
            Self::coalesce_turns(chat_messages.iter().map(|msg| Self::message_json(msg)).collect());

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": request.max_tokens.unwrap_or(4096),
                "temperature": request.temperature,
            },
        });
        if let Some(system) = &system_text {
            body["system_instruction"] = serde_json::json!({"parts": [{"text": system}]});
        }
        body
    }

    /// Separate system turns from chat turns.
    ///
    /// Multiple system turns are joined with blank lines into one
    /// instruction block.
    fn split_system_instruction(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
        let system_parts: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let chat: Vec<&Message> = messages.iter().filter(|m| m.role != Role::System).collect();

        let system_text = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));
        (system_text, chat)
    }

    /// Render one chat turn as a Gemini content entry.
    fn message_json(msg: &Message) -> Value {
        let role = match msg.role {
            Role::Assistant => "model",
            // System turns are split off before this point.
            Role::User | Role::System => "user",
        };
        serde_json::json!({
            "role": role,
            "parts": [{"text": msg.content}],
        })
    }

    /// Enforce Gemini's turn sequencing rules on a contents array.
    ///
    /// Consecutive same-role turns are merged into one entry (the current
    /// question can repeat the final history turn), and a conversation that
    /// opens with a model turn gets a placeholder user turn prepended.
    fn coalesce_turns(contents: Vec<Value>) -> Vec<Value> {
        if contents.is_empty() {
            return contents;
        }

        let mut merged: Vec<Value> = Vec::with_capacity(contents.len());
        for entry in contents {
            let same_role = merged.last().is_some_and(|last| last["role"] == entry["role"]);
            if same_role {
                if let Some(last) = merged.last_mut()
                    && let (Some(existing), Some(new)) =
                        (last["parts"].as_array_mut(), entry["parts"].as_array())
                {
                    existing.extend(new.iter().cloned());
                }
            } else {
                merged.push(entry);
            }
        }

        if !merged.first().is_some_and(|m| m["role"] == "user") {
            merged.insert(
                0,
                serde_json::json!({"role": "user", "parts": [{"text": "Hello"}]}),
            );
        }

        merged
    }

    /// Turn a `generateContent` response body into a [`CompletionResponse`].
    fn parse_response(body: &Value) -> Result<CompletionResponse, LlmError> {
        let candidate = body["candidates"]
            .as_array()
            .ok_or_else(|| LlmError::ResponseParse {
                message: "response has no 'candidates' array".to_string(),
            })?
            .first()
            .ok_or_else(|| LlmError::ResponseParse {
                message: "response 'candidates' array is empty".to_string(),
            })?;

        let parts = candidate["content"]["parts"]
            .as_array()
            .ok_or_else(|| LlmError::ResponseParse {
                message: "candidate content has no 'parts' array".to_string(),
            })?;
        let text = Self::collect_text_parts(parts);

        let usage = TokenUsage {
            input_tokens: body["usageMetadata"]["promptTokenCount"]
                .as_u64()
                .unwrap_or(0) as usize,
            output_tokens: body["usageMetadata"]["candidatesTokenCount"]
                .as_u64()
                .unwrap_or(0) as usize,
        };

        Ok(CompletionResponse {
            message: Message::assistant(text),
            usage,
            model: body["modelVersion"].as_str().unwrap_or("gemini").to_string(),
            finish_reason: candidate["finishReason"].as_str().map(String::from),
        })
    }

    /// Concatenate the text parts of a candidate, skipping anything else.
    fn collect_text_parts(parts: &[Value]) -> String {
        let mut text = String::new();
        for part in parts {
            match part.get("text").and_then(Value::as_str) {
                Some(t) => text.push_str(t),
                None => debug!(?part, "ignoring non-text Gemini part"),
            }
        }
        text
    }

    /// Classify a non-success HTTP status.
    fn map_http_error(status: reqwest::StatusCode, body_text: &str) -> LlmError {
        match status.as_u16() {
            401 | 403 => LlmError::AuthFailed {
                provider: "Gemini".to_string(),
            },
            429 => LlmError::RateLimited {
                retry_after_secs: 30,
            },
            _ => LlmError::ApiRequest {
                message: format!("Gemini API returned {status}: {body_text}"),
            },
        }
    }

    /// URL for one API method, with the key as a `?key=` query parameter.
    fn endpoint_url(&self, model: &str, method: &str) -> String {
        format!(
            "{}/models/{}:{}?key={}",
            self.base_url, model, method, self.api_key
        )
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    /// Perform a full completion via the Gemini API.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let body = self.build_request_body(&request);
        let url = self.endpoint_url(model, "generateContent");

        debug!(
            model,
            messages = request.messages.len(),
            "sending Gemini completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        timeout_secs: REQUEST_TIMEOUT_SECS,
                    }
                } else {
                    LlmError::ApiRequest {
                        message: format!("Gemini request failed: {e}"),
                    }
                }
            })?;

        let status = response.status();
        let body_text = response.text().await.map_err(|e| LlmError::ResponseParse {
            message: format!("failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &body_text));
        }

        let response_json: Value =
            serde_json::from_str(&body_text).map_err(|e| LlmError::ResponseParse {
                message: format!("response body is not valid JSON: {e}"),
            })?;

        Self::parse_response(&response_json)
    }

    fn estimate_tokens(&self, messages: &[Message]) -> usize {
        self.token_counter.count_messages(messages)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(api_key_env: &str) -> LlmConfig {
        LlmConfig {
            provider: "gemini".to_string(),
            model: "gemini-2.5-flash".to_string(),
            api_key_env: api_key_env.to_string(),
            base_url: None,
            max_tokens: 4096,
            temperature: 0.7,
        }
    }

    #[test]
    fn test_new_reads_env() {
        let env_var = "RAGLINE_TEST_GEMINI_KEY";
        // SAFETY: test-scoped env mutation
        unsafe { std::env::set_var(env_var, "test-key-abc123") };
        let provider = GeminiProvider::new(&test_config(env_var)).unwrap();
        assert_eq!(provider.api_key, "test-key-abc123");
        assert_eq!(provider.model, "gemini-2.5-flash");
        assert_eq!(provider.base_url, DEFAULT_BASE_URL);
        // SAFETY: test-scoped env mutation
        unsafe { std::env::remove_var(env_var) };
    }

    #[test]
    fn test_new_missing_env_returns_auth_failed() {
        // SAFETY: test-scoped env mutation
        unsafe { std::env::remove_var("RAGLINE_TEST_ABSENT_KEY") };
        let err = GeminiProvider::new(&test_config("RAGLINE_TEST_ABSENT_KEY")).unwrap_err();
        let LlmError::AuthFailed { provider } = err else {
            panic!("wrong variant: {err:?}");
        };
        assert!(provider.contains("RAGLINE_TEST_ABSENT_KEY"));
    }

    #[test]
    fn test_new_custom_base_url() {
        let env_var = "RAGLINE_TEST_PROXY_KEY";
        // SAFETY: test-scoped env mutation
        unsafe { std::env::set_var(env_var, "proxy-key") };
        let mut config = test_config(env_var);
        config.base_url = Some("https://llm-proxy.internal/v1beta".to_string());
        let provider = GeminiProvider::new(&config).unwrap();
        assert_eq!(provider.base_url, "https://llm-proxy.internal/v1beta");
        // SAFETY: test-scoped env mutation
        unsafe { std::env::remove_var(env_var) };
    }

    #[test]
    fn test_new_with_key_skips_env() {
        let config = test_config("RAGLINE_TEST_NEVER_READ");
        let provider =
            GeminiProvider::new_with_key(&config, "key-from-caller".to_string()).unwrap();
        assert_eq!(provider.api_key, "key-from-caller");
    }

    #[test]
    fn test_split_system_instruction() {
        let messages = vec![
            Message::system("Only translate the question, do not answer it."),
            Message::user("Làm sao để tạo quy trình?"),
            Message::assistant("Bạn có thể dùng trình lập lịch."),
        ];

        let (system_text, chat) = GeminiProvider::split_system_instruction(&messages);

        assert_eq!(
            system_text.as_deref(),
            Some("Only translate the question, do not answer it.")
        );
        assert_eq!(chat.len(), 2);
        assert_eq!(chat[0].role, Role::User);
        assert_eq!(chat[1].role, Role::Assistant);
    }

    #[test]
    fn test_split_system_instruction_joins_multiple() {
        let messages = vec![
            Message::system("Identify the language of the question."),
            Message::system("Respond with the language name only."),
            Message::user("¿Cómo se programa una tarea?"),
        ];

        let (system_text, chat) = GeminiProvider::split_system_instruction(&messages);

        assert_eq!(
            system_text.as_deref(),
            Some("Identify the language of the question.\n\nRespond with the language name only.")
        );
        assert_eq!(chat.len(), 1);
    }

    #[test]
    fn test_split_system_instruction_none() {
        let messages = vec![
            Message::user("What is a workflow?"),
            Message::assistant("A sequence of automated steps."),
        ];

        let (system_text, chat) = GeminiProvider::split_system_instruction(&messages);

        assert!(system_text.is_none());
        assert_eq!(chat.len(), 2);
    }

    #[test]
    fn test_message_json_user() {
        let json = GeminiProvider::message_json(&Message::user("What is an automation node?"));

        assert_eq!(json["role"], "user");
        let parts = json["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0]["text"], "What is an automation node?");
    }

    #[test]
    fn test_message_json_assistant_maps_to_model() {
        let json =
            GeminiProvider::message_json(&Message::assistant("A node is one step of a workflow."));

        assert_eq!(json["role"], "model");
        assert_eq!(json["parts"][0]["text"], "A node is one step of a workflow.");
    }

    #[test]
    fn test_coalesce_turns_merges_consecutive_roles() {
        let contents = vec![
            serde_json::json!({"role": "user", "parts": [{"text": "first question"}]}),
            serde_json::json!({"role": "user", "parts": [{"text": "a clarification"}]}),
            serde_json::json!({"role": "model", "parts": [{"text": "the answer"}]}),
        ];
        let fixed = GeminiProvider::coalesce_turns(contents);
        assert_eq!(fixed.len(), 2);
        assert_eq!(fixed[0]["parts"].as_array().unwrap().len(), 2);
        assert_eq!(fixed[0]["parts"][1]["text"], "a clarification");
        assert_eq!(fixed[1]["role"], "model");
    }

    #[test]
    fn test_coalesce_turns_inserts_leading_user() {
        let contents = vec![serde_json::json!({
            "role": "model", "parts": [{"text": "orphan reply"}]
        })];
        let fixed = GeminiProvider::coalesce_turns(contents);
        assert_eq!(fixed.len(), 2);
        assert_eq!(fixed[0]["role"], "user");
        assert_eq!(fixed[1]["role"], "model");
    }

    #[test]
    fn test_build_request_body() {
        let provider =
            GeminiProvider::new_with_key(&test_config("UNUSED"), "key".to_string()).unwrap();
        let request = CompletionRequest {
            messages: vec![
                Message::system("Only translate the question."),
                Message::user("Xin chào"),
            ],
            temperature: 0.2,
            max_tokens: Some(256),
            model: None,
        };

        let body = provider.build_request_body(&request);
        assert_eq!(
            body["system_instruction"]["parts"][0]["text"],
            "Only translate the question."
        );
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
        assert_eq!(body["contents"][0]["role"], "user");
    }

    #[test]
    fn test_parse_text_response() {
        let response_json = serde_json::json!({
            "candidates": [{
                "content": {
                    "parts": [{"text": "The scheduler runs workflows on a timer."}],
                    "role": "model"
                },
                "finishReason": "STOP"
            }],
            "usageMetadata": {
                "promptTokenCount": 18,
                "candidatesTokenCount": 9,
                "totalTokenCount": 27
            },
            "modelVersion": "gemini-2.5-flash"
        });

        let result = GeminiProvider::parse_response(&response_json).unwrap();
        assert_eq!(
            result.message.content,
            "The scheduler runs workflows on a timer."
        );
        assert_eq!(result.message.role, Role::Assistant);
        assert_eq!(result.model, "gemini-2.5-flash");
        assert_eq!(result.usage.input_tokens, 18);
        assert_eq!(result.usage.output_tokens, 9);
        assert_eq!(result.finish_reason, Some("STOP".to_string()));
    }

    #[test]
    fn test_parse_concatenates_text_parts() {
        let response_json = serde_json::json!({
            "candidates": [{
                "content": {
                    "parts": [{"text": "One. "}, {"text": "Two."}],
                    "role": "model"
                }
            }],
            "usageMetadata": {}
        });

        let result = GeminiProvider::parse_response(&response_json).unwrap();
        assert_eq!(result.message.content, "One. Two.");
        assert_eq!(result.model, "gemini");
    }

    #[test]
    fn test_parse_empty_candidates() {
        let response_json = serde_json::json!({
            "candidates": [],
            "usageMetadata": {}
        });

        let err = GeminiProvider::parse_response(&response_json).unwrap_err();
        let LlmError::ResponseParse { message } = err else {
            panic!("wrong variant: {err:?}");
        };
        assert!(message.contains("empty"));
    }

    #[test]
    fn test_parse_missing_candidates() {
        let response_json = serde_json::json!({"error": "bad request"});

        let err = GeminiProvider::parse_response(&response_json).unwrap_err();
        let LlmError::ResponseParse { message } = err else {
            panic!("wrong variant: {err:?}");
        };
        assert!(message.contains("candidates"));
    }

    #[test]
    fn test_map_http_error() {
        let err = GeminiProvider::map_http_error(reqwest::StatusCode::UNAUTHORIZED, "denied");
        assert!(matches!(err, LlmError::AuthFailed { .. }));

        let err = GeminiProvider::map_http_error(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow");
        assert!(matches!(
            err,
            LlmError::RateLimited {
                retry_after_secs: 30
            }
        ));

        let err =
            GeminiProvider::map_http_error(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "boom");
        let LlmError::ApiRequest { message } = err else {
            panic!("wrong variant: {err:?}");
        };
        assert!(message.contains("500"));
    }

    #[test]
    fn test_endpoint_url() {
        let provider =
            GeminiProvider::new_with_key(&test_config("UNUSED"), "k-123".to_string()).unwrap();
        let url = provider.endpoint_url("gemini-2.5-flash", "generateContent");
        assert_eq!(
            url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent?key=k-123"
        );
    }
}
