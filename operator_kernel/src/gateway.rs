//! Provider-agnostic completion gateway.
//!
//! Requests go to the named provider, or to the default one when no name is
//! given. Anything that names no registered provider gets the built-in
//! deterministic mock. A failing provider is never replaced by the mock: its
//! error reaches the caller as-is.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::error::{KernelError, KernelResult};

/// Provider name reported for mock completions.
pub const MOCK_PROVIDER: &str = "mock";

const MOCK_PREVIEW_CHARS: usize = 80;

/// Free-form options forwarded to the provider.
pub type CompletionOptions = Map<String, Value>;

/// A completion backend.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String>;
}

/// Adapts a synchronous closure into a [`CompletionProvider`].
pub struct FnProvider<F>(F);

impl<F> FnProvider<F>
where
    F: Fn(&str, &CompletionOptions) -> Result<String> + Send + Sync + 'static,
{
    pub fn new(handler: F) -> Self {
        Self(handler)
    }

    /// Wrap `handler` ready for [`ModelGateway::register_provider`].
    pub fn shared(handler: F) -> Arc<dyn CompletionProvider> {
        Arc::new(Self(handler))
    }
}

#[async_trait]
impl<F> CompletionProvider for FnProvider<F>
where
    F: Fn(&str, &CompletionOptions) -> Result<String> + Send + Sync,
{
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String> {
        (self.0)(prompt, options)
    }
}

/// Result of a completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub response: String,
    pub provider: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

/// Provider chosen for a request.
#[derive(Clone)]
pub enum ResolvedProvider {
    Registered {
        name: String,
        handler: Arc<dyn CompletionProvider>,
    },
    Mock,
}

impl ResolvedProvider {
    pub fn name(&self) -> &str {
        match self {
            ResolvedProvider::Registered { name, .. } => name,
            ResolvedProvider::Mock => MOCK_PROVIDER,
        }
    }
}

#[derive(Default)]
struct Registry {
    order: Vec<String>,
    handlers: HashMap<String, Arc<dyn CompletionProvider>>,
    default: Option<String>,
}

/// Routes completion requests to registered providers.
#[derive(Default)]
pub struct ModelGateway {
    registry: RwLock<Registry>,
}

impl std::fmt::Debug for ModelGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.read();
        f.debug_struct("ModelGateway")
            .field("providers", &registry.order)
            .field("default", &registry.default)
            .finish()
    }
}

/// Whitespace word count. Not a real tokenizer.
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

fn mock_response(prompt: &str) -> String {
    let preview: String = prompt.chars().take(MOCK_PREVIEW_CHARS).collect();
    let ellipsis = if prompt.chars().count() > MOCK_PREVIEW_CHARS { "..." } else { "" };
    format!("[mock response to: {}{}]", preview, ellipsis)
}

impl ModelGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a provider.
    ///
    /// The first provider becomes the default; later ones only when
    /// `set_default` is true.
    pub fn register_provider(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn CompletionProvider>,
        set_default: bool,
    ) {
        let name = name.into();
        let mut registry = self.registry.write();
        if registry.handlers.insert(name.clone(), handler).is_none() {
            registry.order.push(name.clone());
        }
        if set_default || registry.default.is_none() {
            registry.default = Some(name.clone());
        }
        info!("Registered completion provider '{}'", name);
    }

    /// Registered provider names, in registration order.
    pub fn available_providers(&self) -> Vec<String> {
        self.registry.read().order.clone()
    }

    pub fn default_provider(&self) -> Option<String> {
        self.registry.read().default.clone()
    }

    /// The requested provider, or the default when none is requested.
    ///
    /// A name that is not registered resolves to the mock, never to some
    /// other real backend.
    pub fn resolve(&self, requested: Option<&str>) -> ResolvedProvider {
        let registry = self.registry.read();
        requested
            .or(registry.default.as_deref())
            .and_then(|name| {
                registry.handlers.get(name).map(|handler| ResolvedProvider::Registered {
                    name: name.to_string(),
                    handler: handler.clone(),
                })
            })
            .unwrap_or(ResolvedProvider::Mock)
    }

    /// Complete `prompt`. No retries and no timeout.
    pub async fn complete(
        &self,
        prompt: &str,
        provider: Option<&str>,
        options: &CompletionOptions,
    ) -> KernelResult<Completion> {
        self.complete_cancellable(prompt, provider, options, &CancellationToken::new())
            .await
    }

    /// Complete `prompt`, aborting with [`KernelError::Cancelled`] if `cancel`
    /// fires before the provider answers.
    #[instrument(skip(self, prompt, options, cancel))]
    pub async fn complete_cancellable(
        &self,
        prompt: &str,
        provider: Option<&str>,
        options: &CompletionOptions,
        cancel: &CancellationToken,
    ) -> KernelResult<Completion> {
        let resolved = self.resolve(provider);
        let provider_name = resolved.name().to_string();

        let response = match resolved {
            ResolvedProvider::Registered { name, handler } => {
                debug!("Dispatching completion to provider '{}'", name);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(KernelError::Cancelled { provider: name });
                    }
                    result = handler.complete(prompt, options) => result.map_err(|e| {
                        error!("Provider '{}' failed: {}", name, e);
                        KernelError::Provider(e)
                    })?,
                }
            }
            ResolvedProvider::Mock => mock_response(prompt),
        };

        Ok(Completion {
            prompt_tokens: count_tokens(prompt),
            completion_tokens: count_tokens(&response),
            response,
            provider: provider_name,
        })
    }
}
