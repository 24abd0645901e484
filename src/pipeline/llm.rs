//! Text generation: the provider capability and the task dispatcher.
//!
//! The dispatcher never talks to a concrete provider. It renders the task's
//! prompt, hands it to a [`TextGenerator`] and normalises whatever text
//! comes back, so callers see one result shape regardless of which provider
//! is configured. All prompt wording lives in [`crate::prompts`].
//!
//! ## No retries here
//!
//! Every generation call is attempted exactly once. A failure aborts the
//! current run and the session keeps its previous artifact; the error tells
//! the user whether retrying is worthwhile.

use crate::config::PipelineConfig;
use crate::error::{GenerationFailure, NoteCraftError};
use crate::output::{ChatTurn, GenerationResult};
use crate::prompts::{self, Prompt, TaskKind, TaskParams};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::{debug, info};

/// Anything that turns a prompt into text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn invoke(&self, prompt: &Prompt) -> Result<String, GenerationFailure>;
}

/// [`TextGenerator`] backed by an edgequake-llm provider.
pub struct LlmGenerator {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    timeout_secs: u64,
}

impl LlmGenerator {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
            timeout_secs: config.api_timeout_secs,
        }
    }
}

#[async_trait]
impl TextGenerator for LlmGenerator {
    async fn invoke(&self, prompt: &Prompt) -> Result<String, GenerationFailure> {
        let messages = chat_messages(prompt);
        let call = self.provider.chat(&messages, Some(&self.options));
        match timeout(Duration::from_secs(self.timeout_secs), call).await {
            Err(_) => Err(GenerationFailure::Timeout(self.timeout_secs)),
            Ok(Err(e)) => Err(GenerationFailure::classify(e.to_string())),
            Ok(Ok(response)) => {
                debug!(
                    "{} input tokens, {} output tokens",
                    response.prompt_tokens, response.completion_tokens
                );
                Ok(response.content)
            }
        }
    }
}

/// System message, earlier turns as user/assistant pairs, then the new user turn.
fn chat_messages(prompt: &Prompt) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(2 + 2 * prompt.history.len());
    messages.push(ChatMessage::system(prompt.system.as_str()));
    for turn in &prompt.history {
        messages.push(ChatMessage::user(turn.question.as_str()));
        messages.push(ChatMessage::assistant(turn.answer.as_str()));
    }
    messages.push(ChatMessage::user(prompt.user.as_str()));
    messages
}

/// Build `CompletionOptions` from the pipeline config.
fn build_options(config: &PipelineConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

const DEFAULT_MODEL: &str = "gpt-4o-mini";

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, NoteCraftError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        NoteCraftError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`); the factory reads
///    the matching API key from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **Auto-detection**: OpenAI when `OPENAI_API_KEY` is set, otherwise
///    [`ProviderFactory::from_env`].
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, NoteCraftError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| NoteCraftError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No provider could be auto-detected from the environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY or GEMINI_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

/// One generation task with its parameters and input text.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub kind: TaskKind,
    pub params: TaskParams,
    pub input: String,
    /// `input` is the ordered chunk summaries of a map-reduce run.
    pub over_summaries: bool,
    /// Earlier exchanges of a conversation.
    pub history: Vec<ChatTurn>,
}

impl GenerationRequest {
    pub fn new(kind: TaskKind, params: TaskParams, input: impl Into<String>) -> Self {
        Self {
            kind,
            params,
            input: input.into(),
            over_summaries: false,
            history: Vec::new(),
        }
    }

    /// The combine step of map-reduce: `summaries` stand in for the document.
    pub fn over_summaries(kind: TaskKind, params: TaskParams, summaries: impl Into<String>) -> Self {
        Self {
            over_summaries: true,
            ..Self::new(kind, params, summaries)
        }
    }

    pub fn with_history(mut self, history: Vec<ChatTurn>) -> Self {
        self.history = history;
        self
    }
}

/// Map a capability failure onto the fatal error for the current run.
pub fn failure_to_error(kind: TaskKind, failure: GenerationFailure, during_map_reduce: bool) -> NoteCraftError {
    match failure {
        GenerationFailure::QuotaExhausted(detail) => NoteCraftError::QuotaExhausted {
            during_map_reduce,
            detail,
        },
        GenerationFailure::Timeout(secs) => NoteCraftError::ProviderFailed {
            task: kind.to_string(),
            detail: format!("no reply within {secs}s"),
        },
        GenerationFailure::Other(detail) => NoteCraftError::ProviderFailed {
            task: kind.to_string(),
            detail,
        },
    }
}

/// Selects the template, makes exactly one call, normalises the reply.
#[derive(Clone)]
pub struct GenerationDispatcher {
    generator: Arc<dyn TextGenerator>,
}

impl GenerationDispatcher {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Dispatch and keep the capability-level failure, for callers that
    /// need to add context before mapping it.
    pub async fn try_dispatch(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResult, GenerationFailure> {
        let mut prompt = if request.over_summaries {
            prompts::render_over_summaries(request.kind, &request.params, &request.input)
        } else {
            prompts::render(request.kind, &request.params, &request.input)
        };
        prompt.history = request.history.clone();
        let start = Instant::now();
        let raw = self.generator.invoke(&prompt).await?;
        let text = normalize_reply(&raw);
        info!(
            "{}: {} chars in, {} chars out, {:?}",
            request.kind,
            request.input.len(),
            text.len(),
            start.elapsed()
        );
        Ok(GenerationResult {
            kind: request.kind,
            text,
        })
    }

    pub async fn dispatch(&self, request: &GenerationRequest) -> Result<GenerationResult, NoteCraftError> {
        self.try_dispatch(request)
            .await
            .map_err(|f| failure_to_error(request.kind, f, false))
    }
}

/// Plain text with `\n` line endings and no surrounding whitespace.
fn normalize_reply(raw: &str) -> String {
    raw.replace("\r\n", "\n").replace('\r', "\n").trim().to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use edgequake_llm::ChatRole;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned replies and records every prompt it receives.
    #[derive(Default)]
    pub(crate) struct ScriptedGenerator {
        pub replies: Mutex<VecDeque<Result<String, GenerationFailure>>>,
        pub prompts: Mutex<Vec<Prompt>>,
    }

    impl ScriptedGenerator {
        pub(crate) fn new(replies: Vec<Result<String, GenerationFailure>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn invoke(&self, prompt: &Prompt) -> Result<String, GenerationFailure> {
            self.prompts.lock().unwrap().push(prompt.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(format!("echo: {}", prompt.user)))
        }
    }

    #[test]
    fn build_options_defaults() {
        let config = PipelineConfig::default();
        let opts = build_options(&config);
        assert_eq!(opts.temperature, Some(0.3));
        assert_eq!(opts.max_tokens, Some(8192));
    }

    #[tokio::test]
    async fn dispatch_makes_one_call_and_normalizes() {
        let fake = ScriptedGenerator::new(vec![Ok("\r\n# Note\r\nbody\r\n\r\n".into())]);
        let dispatcher = GenerationDispatcher::new(fake.clone());
        let req = GenerationRequest::new(TaskKind::Note, TaskParams::default(), "transcript");
        let result = dispatcher.dispatch(&req).await.unwrap();
        assert_eq!(result.kind, TaskKind::Note);
        assert_eq!(result.text, "# Note\nbody");
        assert_eq!(fake.calls(), 1);
        assert_eq!(fake.prompts.lock().unwrap()[0].user, "transcript");
    }

    #[test]
    fn history_sits_between_system_and_question() {
        let prompt = Prompt {
            system: "sys".into(),
            history: vec![ChatTurn {
                question: "q1".into(),
                answer: "a1".into(),
            }],
            user: "q2".into(),
        };
        let messages = chat_messages(&prompt);
        let roles: Vec<_> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![ChatRole::System, ChatRole::User, ChatRole::Assistant, ChatRole::User]
        );
        assert_eq!(messages[2].content, "a1");
        assert_eq!(messages[3].content, "q2");
    }

    #[tokio::test]
    async fn request_history_reaches_the_generator() {
        let fake = ScriptedGenerator::new(vec![Ok("Because of gravity.".into())]);
        let dispatcher = GenerationDispatcher::new(fake.clone());
        let turn = ChatTurn {
            question: "Why do apples fall?".into(),
            answer: "Gravity.".into(),
        };
        let req = GenerationRequest::new(
            TaskKind::Ask,
            TaskParams {
                instruction: Some("And the moon?".into()),
                ..Default::default()
            },
            "Newton's notes",
        )
        .with_history(vec![turn.clone()]);
        dispatcher.dispatch(&req).await.unwrap();
        let prompt = &fake.prompts.lock().unwrap()[0];
        assert_eq!(prompt.history, vec![turn]);
        assert_eq!(prompt.user, "And the moon?");
    }

    #[tokio::test]
    async fn quota_failure_maps_to_quota_error() {
        let fake = ScriptedGenerator::new(vec![Err(GenerationFailure::QuotaExhausted("429".into()))]);
        let dispatcher = GenerationDispatcher::new(fake);
        let req = GenerationRequest::new(TaskKind::Cheatsheet, TaskParams::default(), "x");
        let err = dispatcher.dispatch(&req).await.unwrap_err();
        assert!(matches!(
            err,
            NoteCraftError::QuotaExhausted {
                during_map_reduce: false,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn other_failure_names_the_task() {
        let fake = ScriptedGenerator::new(vec![Err(GenerationFailure::Timeout(30))]);
        let dispatcher = GenerationDispatcher::new(fake);
        let req = GenerationRequest::new(TaskKind::EditNote, TaskParams::default(), "x");
        match dispatcher.dispatch(&req).await.unwrap_err() {
            NoteCraftError::ProviderFailed { task, detail } => {
                assert_eq!(task, "edit-note");
                assert!(detail.contains("30s"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
