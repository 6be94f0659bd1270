//! Agents: caller-defined units of domain logic that run through the kernel.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::access::tools;
use crate::error::KernelResult;
use crate::gateway::CompletionOptions;
use crate::kernel::Kernel;

/// Agent trait. Implementations get the whole kernel so they can use memory,
/// the gateway and the data tier under their assigned role.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    /// Tool checked against the agent's role before every run.
    fn required_tool(&self) -> &str {
        tools::LLM_COMPLETE
    }

    async fn handle(&self, kernel: &Kernel, request: &AgentRequest) -> KernelResult<AgentReply>;
}

/// One turn handed to an agent.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub prompt: String,
    pub options: CompletionOptions,
    pub session_id: String,
    /// Fires when the worker running this turn is shutting down.
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReply {
    pub agent: String,
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

impl AgentReply {
    pub fn new(agent: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            response: response.into(),
            provider: None,
            data: Map::new(),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

/// Structured RBAC denial. The matching audit entry is already recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessDenied {
    pub principal: String,
    pub tool: String,
    pub role: Option<String>,
}

/// Result of a kernel-mediated run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed(AgentReply),
    Denied(AccessDenied),
}

impl RunOutcome {
    pub fn reply(&self) -> Option<&AgentReply> {
        match self {
            RunOutcome::Completed(reply) => Some(reply),
            RunOutcome::Denied(_) => None,
        }
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, RunOutcome::Denied(_))
    }
}

/// Request counters kept by [`CompletionAgent`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AgentStats {
    pub total_requests: u64,
    pub error_count: u64,
}

// --- Built-in Agents ---

/// Forwards each prompt to the model gateway.
///
/// An `options["provider"]` string overrides the agent's configured
/// provider; the remaining options are passed to the provider untouched.
pub struct CompletionAgent {
    name: String,
    provider: Option<String>,
    request_count: AtomicU64,
    error_count: AtomicU64,
}

impl CompletionAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider: None,
            request_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn shared(name: impl Into<String>) -> Arc<dyn Agent> {
        Arc::new(Self::new(name))
    }

    pub fn stats(&self) -> AgentStats {
        AgentStats {
            total_requests: self.request_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl Agent for CompletionAgent {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, kernel, request), fields(agent = %self.name))]
    async fn handle(&self, kernel: &Kernel, request: &AgentRequest) -> KernelResult<AgentReply> {
        self.request_count.fetch_add(1, Ordering::Relaxed);

        let mut options = request.options.clone();
        let requested = match options.remove("provider") {
            Some(Value::String(provider)) => Some(provider),
            _ => self.provider.clone(),
        };

        let completion = kernel
            .gateway()
            .complete_cancellable(&request.prompt, requested.as_deref(), &options, &request.cancel)
            .await
            .inspect_err(|_| {
                self.error_count.fetch_add(1, Ordering::Relaxed);
            })?;

        info!("Agent '{}' completed via '{}'", self.name, completion.provider);
        Ok(AgentReply::new(&self.name, completion.response)
            .with_provider(completion.provider)
            .with_data("prompt_tokens", completion.prompt_tokens.into())
            .with_data("completion_tokens", completion.completion_tokens.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::FnProvider;
    use crate::kernel::KernelConfig;
    use serde_json::json;

    fn request(prompt: &str, options: CompletionOptions) -> AgentRequest {
        AgentRequest {
            prompt: prompt.to_string(),
            options,
            session_id: "session".to_string(),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_completion_agent_uses_mock_without_providers() {
        let kernel = Kernel::new(KernelConfig::default()).unwrap();
        let agent = CompletionAgent::new("assistant");

        let reply = agent.handle(&kernel, &request("hello", Map::new())).await.unwrap();
        assert_eq!(reply.agent, "assistant");
        assert_eq!(reply.response, "[mock response to: hello]");
        assert_eq!(reply.provider.as_deref(), Some("mock"));
        assert_eq!(reply.data["prompt_tokens"], json!(1));
        assert_eq!(agent.stats().total_requests, 1);
    }

    #[tokio::test]
    async fn test_provider_option_overrides_configured_provider() {
        let kernel = Kernel::new(KernelConfig::default()).unwrap();
        kernel
            .gateway()
            .register_provider("upper", FnProvider::shared(|p, _| Ok(p.to_uppercase())), false);
        kernel.gateway().register_provider(
            "keys",
            FnProvider::shared(|_, options| {
                Ok(options.keys().cloned().collect::<Vec<_>>().join(","))
            }),
            false,
        );
        let agent = CompletionAgent::new("assistant").with_provider("upper");

        let reply = agent.handle(&kernel, &request("abc", Map::new())).await.unwrap();
        assert_eq!(reply.response, "ABC");

        let mut options = Map::new();
        options.insert("provider".into(), json!("keys"));
        options.insert("temperature".into(), json!(0.1));
        let reply = agent.handle(&kernel, &request("abc", options)).await.unwrap();
        assert_eq!(reply.response, "temperature");
        assert_eq!(reply.provider.as_deref(), Some("keys"));
    }

    #[tokio::test]
    async fn test_failures_are_counted() {
        let kernel = Kernel::new(KernelConfig::default()).unwrap();
        kernel.gateway().register_provider(
            "broken",
            FnProvider::shared(|_, _| Err(anyhow::anyhow!("down"))),
            false,
        );
        let agent = CompletionAgent::new("assistant");

        assert!(agent.handle(&kernel, &request("x", Map::new())).await.is_err());
        assert_eq!(
            agent.stats(),
            AgentStats {
                total_requests: 1,
                error_count: 1
            }
        );
    }

    #[test]
    fn test_outcome_is_tagged() {
        let denied = RunOutcome::Denied(AccessDenied {
            principal: "p".into(),
            tool: "llm_complete".into(),
            role: None,
        });
        let json = serde_json::to_value(&denied).unwrap();
        assert_eq!(json["status"], "denied");
        assert!(denied.is_denied());
        assert!(denied.reply().is_none());

        let done = RunOutcome::Completed(AgentReply::new("a", "r"));
        assert_eq!(serde_json::to_value(&done).unwrap()["status"], "completed");
    }
}
