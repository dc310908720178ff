//! Backlog & Result Store
//!
//! The two root-owned collections of a run. Only the root process ever holds
//! or mutates them; workers see tasks and results only as messages.
//!
//! ## Responsibilities
//! - **Backlog**: Pending tasks, dequeued FIFO or, under the priority policy,
//!   highest priority first with FIFO among equals.
//! - **ResultStore**: One `TaskResult` per task id; a run is complete once it
//!   holds a result for every submitted task.

use super::types::*;
use crate::config::BacklogPolicy;
use crate::error::{Error, Result};

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};

#[derive(Debug)]
pub struct Backlog {
    policy: BacklogPolicy,
    fifo: VecDeque<Task>,
    ranked: BinaryHeap<Ranked>,
    /// Insertion counter, breaks priority ties in submission order.
    sequence: u64,
}

#[derive(Debug)]
struct Ranked {
    priority: i32,
    sequence: u64,
    task: Task,
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl Backlog {
    pub fn new(policy: BacklogPolicy) -> Self {
        Self {
            policy,
            fifo: VecDeque::new(),
            ranked: BinaryHeap::new(),
            sequence: 0,
        }
    }

    pub fn policy(&self) -> BacklogPolicy {
        self.policy
    }

    pub fn push(&mut self, task: Task) {
        match self.policy {
            BacklogPolicy::Fifo => self.fifo.push_back(task),
            BacklogPolicy::Priority => {
                self.ranked.push(Ranked {
                    priority: task.priority,
                    sequence: self.sequence,
                    task,
                });
                self.sequence += 1;
            }
        }
    }

    pub fn pop(&mut self) -> Option<Task> {
        match self.policy {
            BacklogPolicy::Fifo => self.fifo.pop_front(),
            BacklogPolicy::Priority => self.ranked.pop().map(|ranked| ranked.task),
        }
    }

    pub fn len(&self) -> usize {
        self.fifo.len() + self.ranked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Completed results of one run, keyed by task id.
#[derive(Debug, Clone, Default)]
pub struct ResultStore {
    results: HashMap<TaskId, TaskResult>,
    /// Task ids in the order their results were recorded.
    order: Vec<TaskId>,
    expected: usize,
}

impl ResultStore {
    /// A store that is complete once it holds `expected` results.
    pub fn new(expected: usize) -> Self {
        Self {
            results: HashMap::with_capacity(expected),
            order: Vec::with_capacity(expected),
            expected,
        }
    }

    /// Stores `result`; a second result for the same task is rejected.
    pub fn record(&mut self, result: TaskResult) -> Result<()> {
        if self.results.contains_key(&result.task_id) {
            return Err(Error::DuplicateResult(result.task_id.to_string()));
        }

        self.order.push(result.task_id.clone());
        self.results.insert(result.task_id.clone(), result);
        Ok(())
    }

    pub fn get(&self, task_id: &TaskId) -> Option<&TaskResult> {
        self.results.get(task_id)
    }

    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.results.contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn is_complete(&self) -> bool {
        self.results.len() == self.expected
    }

    /// Results in the order they were recorded.
    pub fn iter(&self) -> impl Iterator<Item = &TaskResult> {
        self.order.iter().filter_map(|task_id| self.results.get(task_id))
    }

    pub fn completion_order(&self) -> &[TaskId] {
        &self.order
    }

    pub fn failures(&self) -> Vec<&TaskResult> {
        self.iter().filter(|result| !result.is_success()).collect()
    }
}
