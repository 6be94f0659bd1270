//! Task scheduling with fifo, priority and round-robin selection.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::error::KernelError;

/// Selection policy, fixed for the scheduler's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPolicy {
    #[default]
    Fifo,
    Priority,
    RoundRobin,
}

impl SchedulerPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerPolicy::Fifo => "fifo",
            SchedulerPolicy::Priority => "priority",
            SchedulerPolicy::RoundRobin => "round_robin",
        }
    }
}

impl fmt::Display for SchedulerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchedulerPolicy {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fifo" => Ok(SchedulerPolicy::Fifo),
            "priority" => Ok(SchedulerPolicy::Priority),
            "round_robin" => Ok(SchedulerPolicy::RoundRobin),
            other => Err(KernelError::Configuration(format!(
                "unknown scheduling policy '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Completed,
}

/// A unit of work submitted by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub agent: String,
    pub payload: Value,
    pub priority: i64,
    pub submitted_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
}

/// Heap entry: highest priority first, then earliest submission.
#[derive(Debug)]
struct Prioritized {
    priority: i64,
    seq: Reverse<u64>,
    task: Task,
}

impl PartialEq for Prioritized {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Prioritized {}

impl PartialOrd for Prioritized {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Prioritized {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

#[derive(Debug)]
enum TaskQueue {
    Fifo(VecDeque<Task>),
    Priority(BinaryHeap<Prioritized>),
    /// Per-agent FIFO sub-queues and the rotation of agents with pending work.
    RoundRobin {
        queues: HashMap<String, VecDeque<Task>>,
        rotation: VecDeque<String>,
    },
}

impl TaskQueue {
    fn new(policy: SchedulerPolicy) -> Self {
        match policy {
            SchedulerPolicy::Fifo => TaskQueue::Fifo(VecDeque::new()),
            SchedulerPolicy::Priority => TaskQueue::Priority(BinaryHeap::new()),
            SchedulerPolicy::RoundRobin => TaskQueue::RoundRobin {
                queues: HashMap::new(),
                rotation: VecDeque::new(),
            },
        }
    }

    fn push(&mut self, seq: u64, task: Task) {
        match self {
            TaskQueue::Fifo(queue) => queue.push_back(task),
            TaskQueue::Priority(heap) => heap.push(Prioritized {
                priority: task.priority,
                seq: Reverse(seq),
                task,
            }),
            TaskQueue::RoundRobin { queues, rotation } => {
                let queue = queues.entry(task.agent.clone()).or_default();
                if queue.is_empty() {
                    rotation.push_back(task.agent.clone());
                }
                queue.push_back(task);
            }
        }
    }

    fn pop(&mut self) -> Option<Task> {
        match self {
            TaskQueue::Fifo(queue) => queue.pop_front(),
            TaskQueue::Priority(heap) => heap.pop().map(|entry| entry.task),
            TaskQueue::RoundRobin { queues, rotation } => {
                let agent = rotation.pop_front()?;
                let queue = queues.get_mut(&agent)?;
                let task = queue.pop_front();
                if queue.is_empty() {
                    queues.remove(&agent);
                } else {
                    rotation.push_back(agent);
                }
                task
            }
        }
    }

    fn len(&self) -> usize {
        match self {
            TaskQueue::Fifo(queue) => queue.len(),
            TaskQueue::Priority(heap) => heap.len(),
            TaskQueue::RoundRobin { queues, .. } => queues.values().map(VecDeque::len).sum(),
        }
    }
}

#[derive(Debug)]
struct QueueState {
    next_seq: u64,
    queue: TaskQueue,
}

/// Orders and dispatches tasks; keeps an audit log of completed tasks.
///
/// Round-robin rotates dispatch across agents: each agent has its own FIFO
/// sub-queue, and agents take turns in order of arrival. An agent whose
/// sub-queue drains leaves the rotation and rejoins at the back.
#[derive(Debug)]
pub struct Scheduler {
    policy: SchedulerPolicy,
    state: Mutex<QueueState>,
    completed: RwLock<Vec<Task>>,
}

impl Scheduler {
    pub fn new(policy: SchedulerPolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(QueueState {
                next_seq: 0,
                queue: TaskQueue::new(policy),
            }),
            completed: RwLock::new(Vec::new()),
        }
    }

    pub fn policy(&self) -> SchedulerPolicy {
        self.policy
    }

    /// Enqueue a task. Id uniqueness is the caller's responsibility.
    pub fn submit(
        &self,
        id: impl Into<String>,
        agent: impl Into<String>,
        payload: Value,
        priority: i64,
    ) -> Task {
        let task = Task {
            id: id.into(),
            agent: agent.into(),
            payload,
            priority,
            submitted_at: Utc::now(),
            status: TaskStatus::Queued,
            completed_at: None,
            result: None,
        };

        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.queue.push(seq, task.clone());
        debug!(
            "Queued task {} for agent {} (queue length {})",
            task.id,
            task.agent,
            state.queue.len()
        );
        task
    }

    /// Remove and return the next task under the scheduler's policy.
    pub fn next(&self) -> Option<Task> {
        self.state.lock().queue.pop()
    }

    /// Complete a dispatched task and append it to the completed log.
    ///
    /// Must be called once per dispatched task; a second call logs a duplicate.
    pub fn mark_done(&self, mut task: Task, result: Value) -> Task {
        task.status = TaskStatus::Completed;
        task.completed_at = Some(Utc::now());
        task.result = Some(result);
        self.completed.write().push(task.clone());
        debug!("Completed task {}", task.id);
        task
    }

    pub fn queue_length(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Snapshot of the completed-task log, in completion order.
    pub fn completed_tasks(&self) -> Vec<Task> {
        self.completed.read().clone()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn drain_ids(scheduler: &Scheduler) -> Vec<String> {
        std::iter::from_fn(|| scheduler.next()).map(|t| t.id).collect()
    }

    #[test]
    fn test_fifo_ignores_priority() {
        let scheduler = Scheduler::new(SchedulerPolicy::Fifo);
        scheduler.submit("t1", "a", json!(null), 1);
        scheduler.submit("t2", "a", json!(null), 100);

        assert_eq!(scheduler.next().unwrap().id, "t1");
        assert_eq!(scheduler.next().unwrap().id, "t2");
        assert!(scheduler.next().is_none());
    }

    #[test]
    fn test_priority_highest_first_with_stable_ties() {
        let scheduler = Scheduler::new(SchedulerPolicy::Priority);
        scheduler.submit("p1", "a", json!(null), 1);
        scheduler.submit("p10", "a", json!(null), 10);
        scheduler.submit("p5", "a", json!(null), 5);
        scheduler.submit("p5b", "a", json!(null), 5);
        scheduler.submit("neg", "a", json!(null), -3);

        assert_eq!(drain_ids(&scheduler), vec!["p10", "p5", "p5b", "p1", "neg"]);
    }

    #[test]
    fn test_round_robin_rotates_agents() {
        let scheduler = Scheduler::new(SchedulerPolicy::RoundRobin);
        scheduler.submit("a1", "alpha", json!(null), 0);
        scheduler.submit("a2", "alpha", json!(null), 0);
        scheduler.submit("a3", "alpha", json!(null), 0);
        scheduler.submit("b1", "beta", json!(null), 0);
        scheduler.submit("c1", "gamma", json!(null), 0);
        scheduler.submit("b2", "beta", json!(null), 0);

        assert_eq!(scheduler.queue_length(), 6);
        assert_eq!(drain_ids(&scheduler), vec!["a1", "b1", "c1", "a2", "b2", "a3"]);
    }

    #[test]
    fn test_round_robin_drained_agent_rejoins_at_back() {
        let scheduler = Scheduler::new(SchedulerPolicy::RoundRobin);
        scheduler.submit("a1", "alpha", json!(null), 0);
        scheduler.submit("b1", "beta", json!(null), 0);
        assert_eq!(scheduler.next().unwrap().id, "a1");

        scheduler.submit("a2", "alpha", json!(null), 0);
        scheduler.submit("b2", "beta", json!(null), 0);
        assert_eq!(drain_ids(&scheduler), vec!["b1", "a2", "b2"]);
    }

    #[test]
    fn test_mark_done_records_completion() {
        let scheduler = Scheduler::new(SchedulerPolicy::Fifo);
        let submitted = scheduler.submit("t1", "a", json!({"prompt": "hi"}), 0);
        assert_eq!(submitted.status, TaskStatus::Queued);
        assert_eq!(scheduler.queue_length(), 1);

        let task = scheduler.next().unwrap();
        assert_eq!(scheduler.queue_length(), 0);

        let done = scheduler.mark_done(task, json!("ok"));
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.completed_at.is_some());
        assert_eq!(done.result, Some(json!("ok")));

        let log = scheduler.completed_tasks();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].payload, json!({"prompt": "hi"}));
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("round_robin".parse::<SchedulerPolicy>().unwrap(), SchedulerPolicy::RoundRobin);
        assert!(matches!(
            "lifo".parse::<SchedulerPolicy>(),
            Err(KernelError::Configuration(_))
        ));
    }

    #[test]
    fn test_concurrent_dispatch_hands_out_each_task_once() {
        let scheduler = Arc::new(Scheduler::new(SchedulerPolicy::Priority));
        for i in 0..200 {
            scheduler.submit(format!("t{}", i), format!("agent{}", i % 4), json!(i), i % 7);
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let scheduler = scheduler.clone();
                std::thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(task) = scheduler.next() {
                        seen.push(task.id.clone());
                        scheduler.mark_done(task, json!(null));
                    }
                    seen
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(all.insert(id), "task dispatched twice");
            }
        }
        assert_eq!(all.len(), 200);
        assert_eq!(scheduler.completed_count(), 200);
    }
}
