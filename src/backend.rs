//! The inference boundary: one trait every pipeline stage calls through.
//!
//! Classification, extraction and follow-up chat all reduce to the same
//! shape: an instruction, zero or more page images, optional prior turns,
//! and a text answer. [`VisionBackend`] captures exactly that, which keeps
//! the stages testable with an in-process fake and lets the production
//! implementation, [`LlmBackend`], stay a thin adapter over `edgequake-llm`.
//!
//! No retries happen here or anywhere above: a failed call is reported once
//! and the calling stage decides whether it is fatal.

use crate::config::PipelineConfig;
use crate::error::SchematicError;
use crate::model::PageImage;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Model used when a provider is named but no model is.
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// What a request is for. Backends may route on it; fakes in tests do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Classify,
    Extract,
    Chat,
}

/// Speaker of one conversational turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One prior turn of a follow-up conversation. The caller owns the history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub text: String,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            text: text.into(),
        }
    }
}

/// A single request to the vision backend.
#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub kind: RequestKind,
    /// System instruction.
    pub instruction: String,
    /// Images attached to the final user turn, in order.
    pub images: Vec<PageImage>,
    /// Prior turns, oldest first.
    pub history: Vec<ChatTurn>,
    /// Text of the final user turn; may be empty when the images say it all.
    pub message: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// Text answer plus token accounting.
#[derive(Debug, Clone, Default)]
pub struct VisionResponse {
    pub content: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// Anything that can answer a [`VisionRequest`].
#[async_trait]
pub trait VisionBackend: Send + Sync {
    /// Short name for logs, e.g. the provider name.
    fn name(&self) -> &str;

    /// Send one request and wait for the full answer.
    async fn generate(&self, request: VisionRequest) -> Result<VisionResponse, SchematicError>;
}

/// [`VisionBackend`] over any `edgequake-llm` provider.
pub struct LlmBackend {
    provider: Arc<dyn LLMProvider>,
    name: String,
}

impl LlmBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, name: impl Into<String>) -> Self {
        Self {
            provider,
            name: name.into(),
        }
    }
}

#[async_trait]
impl VisionBackend for LlmBackend {
    fn name(&self) -> &str {
        &self.name
    }

    /// ## Message Layout
    ///
    /// 1. **System message** — the stage instruction
    /// 2. **History** — prior user/assistant turns (chat only)
    /// 3. **User message** — the request text with every page image attached
    async fn generate(&self, request: VisionRequest) -> Result<VisionResponse, SchematicError> {
        let start = Instant::now();
        let mut messages = vec![ChatMessage::system(request.instruction.as_str())];

        for turn in &request.history {
            messages.push(match turn.role {
                ChatRole::User => ChatMessage::user(turn.text.as_str()),
                ChatRole::Assistant => ChatMessage::assistant(turn.text.as_str()),
            });
        }

        if request.images.is_empty() {
            messages.push(ChatMessage::user(request.message.as_str()));
        } else {
            let images = request.images.iter().map(to_image_data).collect();
            messages.push(ChatMessage::user_with_images(
                request.message.as_str(),
                images,
            ));
        }

        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| SchematicError::LlmApiError {
                message: format!("{}", e),
            })?;

        debug!(
            "{:?} request: {} image(s), {} input tokens, {} output tokens, {:?}",
            request.kind,
            request.images.len(),
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        Ok(VisionResponse {
            content: response.content,
            input_tokens: response.prompt_tokens as usize,
            output_tokens: response.completion_tokens as usize,
        })
    }
}

/// `detail: "high"` keeps fine print such as pin numbers and values legible.
fn to_image_data(image: &PageImage) -> ImageData {
    ImageData::new(image.data.clone(), image.mime_type.as_str()).with_detail("high")
}

/// Resolve the backend, from most-specific to least-specific.
///
/// 1. **Pre-built backend** (`config.backend`) — used as-is (tests, custom middleware).
/// 2. **Named provider + model** (`config.provider_name`).
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI key present** (`OPENAI_API_KEY`) — OpenAI with the configured model.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_backend(config: &PipelineConfig) -> Result<Arc<dyn VisionBackend>, SchematicError> {
    if let Some(ref backend) = config.backend {
        return Ok(Arc::clone(backend));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_backend(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_backend(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_backend("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| SchematicError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or GEMINI_API_KEY.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(Arc::new(LlmBackend::new(llm_provider, "auto")))
}

fn create_backend(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn VisionBackend>, SchematicError> {
    let provider = ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        SchematicError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })?;
    Ok(Arc::new(LlmBackend::new(
        provider,
        format!("{provider_name}/{model}"),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoBackend;

    #[async_trait]
    impl VisionBackend for EchoBackend {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(&self, request: VisionRequest) -> Result<VisionResponse, SchematicError> {
            Ok(VisionResponse {
                content: request.message,
                ..Default::default()
            })
        }
    }

    #[test]
    fn explicit_backend_wins() {
        let config = PipelineConfig::builder()
            .backend(Arc::new(EchoBackend))
            .provider_name("openai")
            .build()
            .unwrap();
        let backend = resolve_backend(&config).unwrap();
        assert_eq!(backend.name(), "echo");
    }

    #[test]
    fn image_data_keeps_mime_type() {
        let image = PageImage {
            index: 0,
            mime_type: "image/jpeg".into(),
            data: "AAAA".into(),
        };
        let data = to_image_data(&image);
        assert_eq!(data.mime_type, "image/jpeg");
        assert_eq!(data.data, "AAAA");
    }

    #[test]
    fn chat_turn_roles_serialise_lowercase() {
        let v = serde_json::to_value(ChatTurn::assistant("hi")).unwrap();
        assert_eq!(v["role"], "assistant");
    }
}
