//! Conversational retrieval-augmented answer pipeline.
//!
//! Four stages run in a fixed order over a shared state record: the
//! question is rewritten into standalone form using the conversation
//! history, normalized into English, matched against the retriever, and
//! answered from the retrieved context. When the question arrived in
//! another language the answer is translated back before it is returned.
//!
//! Each stage is a `(state) -> state` transformation; the driver threads
//! the state through them and charges one step per stage against a budget
//! so a future topology change cannot loop unbounded.

use crate::config::RagConfig;
use crate::error::ChainError;
use crate::llm::LlmProvider;
use crate::retriever::Retriever;
use crate::types::{CompletionRequest, Document, Message};
use std::sync::Arc;
use tracing::{debug, warn};

/// Answer returned when the pipeline fails or produces nothing.
pub const FALLBACK_ANSWER: &str = "Không có câu trả lời được tạo ra.";

const REWRITE_INSTRUCTION: &str = "Given a chat history and the latest user question \
     which might reference context in the chat history, formulate a standalone question \
     which can be understood without the chat history. Do NOT answer the question, \
     just reformulate it if needed and otherwise return it as is.";

const TRANSLATE_INSTRUCTION: &str = "You are a helpful assistant that translates \
     questions into English. Only translate the question, do not answer it.";

const IDENTIFY_LANGUAGE_INSTRUCTION: &str = "You are a helpful assistant that identifies \
     the language of the question. Only respond with the name of the language, do not \
     answer the question.";

const BACK_TRANSLATE_INSTRUCTION: &str = "You are a helpful assistant that translates \
     answers into the original language. If the answer is in the original language, \
     return the answer as is. Only translate the answer, do not answer the question.";

/// Prior turns with roles, then the current question as the final turn.
fn rewrite_request(conversation: &[Message], question: &str) -> Vec<Message> {
    let mut messages = Vec::with_capacity(conversation.len() + 2);
    messages.push(Message::system(REWRITE_INSTRUCTION));
    messages.extend(conversation.iter().cloned());
    messages.push(Message::user(question));
    messages
}

fn translate_request(question: &str) -> Vec<Message> {
    vec![
        Message::system(TRANSLATE_INSTRUCTION),
        Message::user(question),
    ]
}

fn identify_language_request(question: &str) -> Vec<Message> {
    vec![
        Message::system(IDENTIFY_LANGUAGE_INSTRUCTION),
        Message::user(question),
    ]
}

/// One flat prompt carrying transcript, question, and context together.
fn answer_request(chat_history: &str, question: &str, context: &str) -> Vec<Message> {
    vec![Message::user(format!(
        "You are an assistant for question-answering tasks. Use the following pieces of \
         retrieved context and the chat history to answer the question. If you don't know \
         the answer, just say that you don't know. Use three sentences maximum and keep \
         the answer concise.\n\
         Chat History: {chat_history}\n\
         Question: {question}\n\
         Context: {context}\n\
         Answer:"
    ))]
}

fn back_translate_request(original_language: &str, answer: &str) -> Vec<Message> {
    vec![
        Message::system(BACK_TRANSLATE_INSTRUCTION),
        Message::user(format!(
            "Original language:{original_language} Answer: {answer}"
        )),
    ]
}

/// Mutable state threaded through one pipeline run.
///
/// A fresh instance is created per `ask` call and discarded once the
/// answer is extracted; nothing persists between runs except the
/// caller-owned conversation history.
#[derive(Debug, Clone)]
pub struct ChainState {
    /// The question in its current form. The rewrite and normalize stages
    /// replace it in place; later stages read the result.
    pub question: String,
    /// Caller-supplied history snapshot. Read-only inside the pipeline.
    pub conversation: Vec<Message>,
    /// Language name detected by the normalize stage. "English" (in any
    /// case) means no back-translation is needed.
    pub original_language: Option<String>,
    /// Context chunks fetched by the retrieve stage.
    pub documents: Vec<Document>,
    /// Final answer, set by the generate stage.
    pub answer: Option<String>,
}

impl ChainState {
    pub fn new(question: impl Into<String>, conversation: Vec<Message>) -> Self {
        Self {
            question: question.into(),
            conversation,
            original_language: None,
            documents: Vec::new(),
            answer: None,
        }
    }
}

/// The four-stage retrieval-augmented answer chain.
///
/// Stage order is fixed: rewrite, normalize, retrieve, generate. Stages
/// short-circuit internally (empty history skips the rewrite call, an
/// all-ASCII question skips both normalize calls, a missing retriever
/// yields no documents) but the order itself never branches.
pub struct RagChain {
    provider: Arc<dyn LlmProvider>,
    retriever: Option<Arc<dyn Retriever>>,
    top_k: usize,
    step_budget: usize,
    temperature: f32,
    max_tokens: Option<usize>,
    fallback_answer: String,
}

impl RagChain {
    /// Create a chain with default settings and no retriever.
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            retriever: None,
            top_k: 5,
            step_budget: 5,
            temperature: 0.7,
            max_tokens: None,
            fallback_answer: FALLBACK_ANSWER.to_string(),
        }
    }

    /// Create a chain configured from the `[chain]` and `[llm]` sections.
    pub fn with_config(provider: Arc<dyn LlmProvider>, config: &RagConfig) -> Self {
        Self {
            provider,
            retriever: None,
            top_k: config.chain.top_k,
            step_budget: config.chain.step_budget,
            temperature: config.llm.temperature,
            max_tokens: Some(config.llm.max_tokens),
            fallback_answer: config.chain.fallback_answer.clone(),
        }
    }

    /// Attach a retriever. Without one the pipeline runs generation-only.
    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Run the four stages over `state` and return the terminal state.
    ///
    /// The first stage failure aborts the run; nothing is retried here.
    pub async fn run(&self, state: ChainState) -> Result<ChainState, ChainError> {
        let mut steps = 0;

        self.charge_step(&mut steps)?;
        let state = self.rewrite_question(state).await?;

        self.charge_step(&mut steps)?;
        let state = self.normalize_language(state).await?;

        self.charge_step(&mut steps)?;
        let state = self.retrieve(state).await?;

        self.charge_step(&mut steps)?;
        let state = self.generate(state).await?;

        if state.answer.is_none() {
            return Err(ChainError::MalformedState {
                message: "pipeline finished without an answer".to_string(),
            });
        }
        Ok(state)
    }

    /// Answer `question` against the supplied conversation snapshot.
    ///
    /// Never fails: any pipeline error is logged and replaced by the
    /// configured fallback answer, so a degraded reply always beats a
    /// crashed conversation.
    pub async fn ask(&self, question: impl Into<String>, conversation: Vec<Message>) -> String {
        let state = ChainState::new(question, conversation);
        match self.run(state).await {
            Ok(state) => state
                .answer
                .unwrap_or_else(|| self.fallback_answer.clone()),
            Err(e) => {
                warn!(error = %e, "pipeline failed, returning fallback answer");
                self.fallback_answer.clone()
            }
        }
    }

    fn charge_step(&self, steps: &mut usize) -> Result<(), ChainError> {
        *steps += 1;
        if *steps > self.step_budget {
            return Err(ChainError::BudgetExceeded {
                limit: self.step_budget,
            });
        }
        Ok(())
    }

    /// Rewrite the question into a form that stands alone without the
    /// conversation. With no history there is nothing to resolve and the
    /// stage returns the state untouched, without a model call.
    async fn rewrite_question(&self, mut state: ChainState) -> Result<ChainState, ChainError> {
        if state.conversation.is_empty() {
            return Ok(state);
        }
        let rewritten = self
            .complete_text(
                "rewrite",
                rewrite_request(&state.conversation, &state.question),
            )
            .await?;
        debug!(original = %state.question, rewritten = %rewritten, "rewrote question");
        state.question = rewritten;
        Ok(state)
    }

    /// Translate the question into English and record its language.
    ///
    /// Questions made only of basic ASCII characters are assumed to be
    /// English already and skip both model calls. Romanized non-English
    /// text slips through this check; the misclassification is accepted.
    async fn normalize_language(&self, mut state: ChainState) -> Result<ChainState, ChainError> {
        if state.question.chars().all(|c| c <= '\u{007F}') {
            state.original_language = Some("English".to_string());
            return Ok(state);
        }

        // Both calls take the original, untranslated question.
        let translate = self.complete_text("translate", translate_request(&state.question));
        let identify = self.complete_text(
            "identify-language",
            identify_language_request(&state.question),
        );
        let (translated, language) = futures::try_join!(translate, identify)?;

        debug!(
            original = %state.question,
            translated = %translated,
            language = %language,
            "normalized question"
        );
        state.question = translated;
        state.original_language = Some(language);
        Ok(state)
    }

    /// Fetch the top-k context chunks for the normalized question. With no
    /// retriever configured the documents stay empty and the pipeline runs
    /// generation-only.
    async fn retrieve(&self, mut state: ChainState) -> Result<ChainState, ChainError> {
        let Some(retriever) = &self.retriever else {
            debug!("no retriever configured, skipping retrieval");
            state.documents = Vec::new();
            return Ok(state);
        };
        let documents = retriever.search(&state.question, self.top_k).await?;
        debug!(query = %state.question, documents = documents.len(), "retrieved context");
        state.documents = documents;
        Ok(state)
    }

    /// Produce the grounded answer and restore the original language.
    ///
    /// A failed back-translation keeps the English answer instead of
    /// failing the whole run.
    async fn generate(&self, mut state: ChainState) -> Result<ChainState, ChainError> {
        let chat_history = state
            .conversation
            .iter()
            .map(Message::transcript_line)
            .collect::<Vec<_>>()
            .join("\n");
        let context = state
            .documents
            .iter()
            .map(|doc| doc.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let answer = self
            .complete_text(
                "generate",
                answer_request(&chat_history, &state.question, &context),
            )
            .await?;

        let answer = match &state.original_language {
            Some(language) if !language.is_empty() && language.to_lowercase() != "english" => {
                match self
                    .complete_text("back-translate", back_translate_request(language, &answer))
                    .await
                {
                    Ok(translated) => translated,
                    Err(e) => {
                        warn!(
                            language = %language,
                            error = %e,
                            "back-translation failed, keeping English answer"
                        );
                        answer
                    }
                }
            }
            _ => answer,
        };

        state.answer = Some(answer);
        Ok(state)
    }

    async fn complete_text(
        &self,
        stage: &str,
        messages: Vec<Message>,
    ) -> Result<String, ChainError> {
        let request = CompletionRequest {
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            model: None,
        };
        debug!(
            stage,
            prompt_tokens = self.provider.estimate_tokens(&request.messages),
            "requesting completion"
        );
        let response = self
            .provider
            .complete(request)
            .await
            .map_err(|source| ChainError::Completion {
                stage: stage.to_string(),
                source,
            })?;
        debug!(stage, tokens = response.usage.total(), "completion received");
        Ok(response.message.content)
    }
}
