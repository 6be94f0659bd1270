//! Named multi-step workflows persisted in long-term memory.
//!
//! Scheduling a workflow expands each step's `{variable}` placeholders and
//! submits the steps as tasks, earlier steps with higher priority.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::scheduler::Task;

/// Long-term memory namespace holding workflow definitions.
pub const WORKFLOW_NAMESPACE: &str = "workflows";

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub agent: String,
    /// Prompt template; `{name}` is replaced by the `name` variable.
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl WorkflowStep {
    pub fn new(agent: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            prompt: prompt.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    pub steps: Vec<WorkflowStep>,
    pub created_at: DateTime<Utc>,
}

/// Substitute `{name}` placeholders from `variables`.
///
/// String values are inserted verbatim, other JSON values in their compact
/// JSON form. `{{` and `}}` are literal braces.
pub fn render_template(template: &str, variables: &Map<String, Value>) -> KernelResult<String> {
    const OPEN: &str = "\u{0}open\u{0}";
    const CLOSE: &str = "\u{0}close\u{0}";
    let escaped = template.replace("{{", OPEN).replace("}}", CLOSE);

    let mut missing = None;
    let rendered = PLACEHOLDER.replace_all(&escaped, |caps: &Captures| {
        let name = &caps[1];
        match variables.get(name) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    if let Some(name) = missing {
        return Err(KernelError::Template(format!("missing variable '{}'", name)));
    }
    Ok(rendered.replace(OPEN, "{").replace(CLOSE, "}"))
}

impl Kernel {
    /// Persist a workflow definition, replacing any with the same name.
    pub fn define_workflow(&self, name: &str, steps: Vec<WorkflowStep>) -> KernelResult<Workflow> {
        let workflow = Workflow {
            name: name.to_string(),
            steps,
            created_at: Utc::now(),
        };
        self.memory()
            .remember_long(WORKFLOW_NAMESPACE, name, serde_json::to_value(&workflow)?);
        info!("Defined workflow '{}' with {} steps", name, workflow.steps.len());
        Ok(workflow)
    }

    pub fn get_workflow(&self, name: &str) -> Option<Workflow> {
        let value = self.memory().recall_long(WORKFLOW_NAMESPACE, name, Value::Null);
        if value.is_null() {
            return None;
        }
        serde_json::from_value(value)
            .map_err(|e| warn!("Stored workflow '{}' is unreadable: {}", name, e))
            .ok()
    }

    /// Names of every defined workflow, sorted.
    pub fn workflow_names(&self) -> Vec<String> {
        self.memory().list_long(WORKFLOW_NAMESPACE)
    }

    /// Expand a workflow and queue all of its steps.
    ///
    /// Fails with `NotFound` for an unknown workflow and with `Template` if a
    /// step references a missing variable; in both cases nothing is queued.
    #[instrument(skip(self, variables))]
    pub fn schedule_workflow(
        &self,
        name: &str,
        variables: &Map<String, Value>,
    ) -> KernelResult<Vec<Task>> {
        let workflow = self
            .get_workflow(name)
            .ok_or_else(|| KernelError::not_found("workflow", name))?;

        let prompts = workflow
            .steps
            .iter()
            .map(|step| render_template(&step.prompt, variables))
            .collect::<KernelResult<Vec<_>>>()?;

        let total = workflow.steps.len();
        let tasks: Vec<Task> = workflow
            .steps
            .iter()
            .zip(prompts)
            .enumerate()
            .map(|(i, (step, prompt))| {
                let suffix = Uuid::new_v4().simple().to_string();
                let id = format!("{}::step{}::{}", name, i, &suffix[..8]);
                let payload = json!({ "prompt": prompt, "step": i });
                self.submit_task_with_id(id, &step.agent, payload, (total - i) as i64)
            })
            .collect();

        info!("Scheduled workflow '{}' ({} tasks)", name, tasks.len());
        Ok(tasks)
    }
}
