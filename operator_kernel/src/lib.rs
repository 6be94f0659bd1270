//! Operator Kernel - Core Library
//!
//! An orchestration kernel that mediates between pluggable agents and shared
//! services: task scheduling, per-session context, two-tier memory, a
//! provider-agnostic model gateway, role-based tool access and continuous
//! evaluation.

pub mod access;
pub mod agent;
pub mod cli;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod evaluation;
pub mod gateway;
pub mod kernel;
pub mod memory;
pub mod middleware;
pub mod scheduler;
pub mod server;
pub mod settings;
pub mod storage;
pub mod telemetry;
pub mod workflow;

pub use agent::{Agent, AgentReply, AgentRequest, CompletionAgent, RunOutcome};
pub use dispatch::WorkerPool;
pub use error::{KernelError, KernelResult};
pub use gateway::{CompletionProvider, FnProvider, ModelGateway};
pub use kernel::{Kernel, KernelConfig};
