//! The kernel facade: one owned instance of every core service.
//!
//! Nothing here is process-global. Roles, providers and agents live inside a
//! `Kernel`, so several kernels can coexist (tests build one per case).

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::access::{builtin_roles, AccessController};
use crate::agent::Agent;
use crate::context::ContextManager;
use crate::dispatch::DispatchState;
use crate::error::{KernelError, KernelResult};
use crate::evaluation::{Aggregate, EvaluationEngine};
use crate::gateway::{CompletionProvider, ModelGateway};
use crate::memory::MemoryManager;
use crate::scheduler::{Scheduler, SchedulerPolicy};
use crate::storage::{ComputeResources, DataLayer, DeploymentMode};

pub const DEFAULT_CONTEXT_WINDOW: usize = 20;
pub const DEFAULT_WORKERS: usize = 4;

/// Construction parameters for a [`Kernel`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub deployment_mode: DeploymentMode,
    pub scheduler_policy: SchedulerPolicy,
    pub context_window: usize,
    /// Worker tasks started by the server. The kernel itself never spawns.
    pub workers: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            deployment_mode: DeploymentMode::Local,
            scheduler_policy: SchedulerPolicy::Fifo,
            context_window: DEFAULT_CONTEXT_WINDOW,
            workers: DEFAULT_WORKERS,
        }
    }
}

impl KernelConfig {
    /// Build a config from raw names, failing fast on anything unknown.
    pub fn parse(
        deployment_mode: &str,
        scheduler_policy: &str,
        context_window: usize,
    ) -> KernelResult<Self> {
        let config = Self {
            deployment_mode: deployment_mode.parse()?,
            scheduler_policy: scheduler_policy.parse()?,
            context_window,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_policy(mut self, policy: SchedulerPolicy) -> Self {
        self.scheduler_policy = policy;
        self
    }

    pub fn with_context_window(mut self, window: usize) -> Self {
        self.context_window = window;
        self
    }

    pub fn with_deployment_mode(mut self, mode: DeploymentMode) -> Self {
        self.deployment_mode = mode;
        self
    }

    pub fn validate(&self) -> KernelResult<()> {
        if self.context_window == 0 {
            return Err(KernelError::Configuration(
                "context window must be a positive integer".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(KernelError::Configuration(
                "worker count must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }
}

/// An agent known to the kernel, with the session its turns are recorded in.
#[derive(Clone)]
pub struct RegisteredAgent {
    pub agent: Arc<dyn Agent>,
    pub session_id: String,
}

impl std::fmt::Debug for RegisteredAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredAgent")
            .field("name", &self.agent.name())
            .field("session_id", &self.session_id)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub policy: SchedulerPolicy,
    pub queued_tasks: usize,
    pub completed_tasks: usize,
}

/// High-level snapshot served by `GET /status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelStatus {
    pub deployment_mode: DeploymentMode,
    pub compute_resources: ComputeResources,
    pub scheduler: SchedulerStatus,
    pub context_window: usize,
    pub agents: Vec<String>,
    pub llm_providers: Vec<String>,
    pub default_provider: Option<String>,
    pub active_sessions: Vec<String>,
    pub active_workers: usize,
    pub evaluation: BTreeMap<String, Aggregate>,
}

/// Composes scheduling, context, memory, the model gateway, access control
/// and evaluation over one data tier.
pub struct Kernel {
    config: KernelConfig,
    data: Arc<DataLayer>,
    scheduler: Scheduler,
    context: ContextManager,
    memory: MemoryManager,
    gateway: ModelGateway,
    access: AccessController,
    evaluation: EvaluationEngine,
    agents: RwLock<Vec<RegisteredAgent>>,
    pub(crate) dispatch: DispatchState,
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("config", &self.config)
            .field("agents", &self.agent_names())
            .field("gateway", &self.gateway)
            .finish_non_exhaustive()
    }
}

impl Kernel {
    /// Build a kernel. Configuration is validated before any component exists.
    pub fn new(config: KernelConfig) -> KernelResult<Self> {
        config.validate()?;

        let data = Arc::new(DataLayer::new(config.deployment_mode));
        let access = AccessController::new();
        for (role, tools) in builtin_roles() {
            access.define_role(role, tools);
        }

        info!(
            "Kernel ready: mode={}, policy={}, context window={}",
            config.deployment_mode, config.scheduler_policy, config.context_window
        );

        Ok(Self {
            scheduler: Scheduler::new(config.scheduler_policy),
            context: ContextManager::new(config.context_window),
            memory: MemoryManager::new(data.clone()),
            gateway: ModelGateway::new(),
            evaluation: EvaluationEngine::new(),
            agents: RwLock::new(Vec::new()),
            dispatch: DispatchState::new(),
            access,
            data,
            config,
        })
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn data(&self) -> &Arc<DataLayer> {
        &self.data
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn context(&self) -> &ContextManager {
        &self.context
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    pub fn gateway(&self) -> &ModelGateway {
        &self.gateway
    }

    pub fn access(&self) -> &AccessController {
        &self.access
    }

    pub fn evaluation(&self) -> &EvaluationEngine {
        &self.evaluation
    }

    /// Register an agent under `role` and open its session.
    ///
    /// Registering a name again replaces the agent but keeps its session.
    pub fn register_agent(&self, agent: Arc<dyn Agent>, role: &str) -> String {
        let name = agent.name().to_string();
        self.access.assign_role(&name, role);

        let mut agents = self.agents.write();
        if let Some(existing) = agents.iter_mut().find(|r| r.agent.name() == name) {
            existing.agent = agent;
            debug!("Replaced agent '{}'", name);
            return existing.session_id.clone();
        }

        let session_id = Uuid::new_v4().to_string();
        agents.push(RegisteredAgent {
            agent,
            session_id: session_id.clone(),
        });
        info!("Registered agent '{}' with role '{}'", name, role);
        session_id
    }

    /// Registered agent names, in registration order.
    pub fn agent_names(&self) -> Vec<String> {
        self.agents
            .read()
            .iter()
            .map(|r| r.agent.name().to_string())
            .collect()
    }

    pub fn agent(&self, name: &str) -> Option<RegisteredAgent> {
        self.agents.read().iter().find(|r| r.agent.name() == name).cloned()
    }

    pub fn has_agent(&self, name: &str) -> bool {
        self.agents.read().iter().any(|r| r.agent.name() == name)
    }

    pub fn session_of(&self, agent: &str) -> Option<String> {
        self.agent(agent).map(|r| r.session_id)
    }

    /// Shorthand for [`ModelGateway::register_provider`].
    pub fn register_provider(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn CompletionProvider>,
        set_default: bool,
    ) {
        self.gateway.register_provider(name, handler, set_default);
    }

    pub fn evaluation_report(&self) -> BTreeMap<String, Aggregate> {
        self.evaluation.report()
    }

    pub fn status(&self) -> KernelStatus {
        KernelStatus {
            deployment_mode: self.data.deployment_mode(),
            compute_resources: self.data.compute_resources(),
            scheduler: SchedulerStatus {
                policy: self.scheduler.policy(),
                queued_tasks: self.scheduler.queue_length(),
                completed_tasks: self.scheduler.completed_count(),
            },
            context_window: self.context.window_size(),
            agents: self.agent_names(),
            llm_providers: self.gateway.available_providers(),
            default_provider: self.gateway.default_provider(),
            active_sessions: self.context.active_sessions(),
            active_workers: self.dispatch.active_workers(),
            evaluation: self.evaluation_report(),
        }
    }
}
