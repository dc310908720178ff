//! Task Handler Registry
//!
//! A dynamic registry that maps task kinds (e.g., "square") to executable
//! Rust code. A task's `execute` capability is whatever handler is registered
//! under its `kind`, which keeps the queue generic and free of task-specific
//! logic. Every rank must register the same kinds.

use super::types::*;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Type alias for a thread-safe, asynchronous task handler function.
/// It takes a `Task` object and resolves to the task's result value.
pub type TaskHandlerFn = Arc<
    dyn Fn(Task) -> Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>> + Send + Sync,
>;

/// The execute capability of a task kind, for handlers that carry state.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, task: &Task) -> Result<serde_json::Value>;
}

/// Registry holding the mapping between task kinds and their implementation.
pub struct TaskHandlerRegistry {
    handlers: DashMap<String, TaskHandlerFn>,
}

impl TaskHandlerRegistry {
    /// Creates a new, empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a handler closure under a task kind, replacing any previous one.
    pub fn register<F, Fut>(&self, kind: &str, handler: F)
    where
        F: Fn(Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        // Type-erase the future so different async functions share one map.
        let handler_fn: TaskHandlerFn = Arc::new(move |task: Task| {
            Box::pin(handler(task))
                as Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>>
        });

        self.handlers.insert(kind.to_string(), handler_fn);

        tracing::info!("Registered task handler: {}", kind);
    }

    /// Registers a `TaskHandler` implementation under a task kind.
    pub fn register_handler<H>(&self, kind: &str, handler: H)
    where
        H: TaskHandler + 'static,
    {
        let handler = Arc::new(handler);
        self.register(kind, move |task| {
            let handler = handler.clone();
            async move { handler.execute(&task).await }
        });
    }

    /// Looks up the handler for `task.kind` and runs it.
    ///
    /// # Returns
    /// * `Ok(value)` if the handler executed successfully.
    /// * `Err` if the handler failed, panicked, or if no handler exists for the kind.
    pub async fn execute(&self, task: &Task) -> Result<serde_json::Value> {
        // Clone out of the map so no shard lock is held across the await.
        let handler_fn = self
            .handlers
            .get(&task.kind)
            .map(|entry| entry.value().clone());

        match handler_fn {
            Some(handler_fn) => {
                tracing::debug!(
                    "Executing task {} with handler '{}'",
                    task.task_id,
                    task.kind
                );
                // Own task so a panicking handler surfaces as an error
                match tokio::spawn(handler_fn(task.clone())).await {
                    Ok(result) => result,
                    Err(e) if e.is_panic() => Err(anyhow::anyhow!(
                        "Handler '{}' panicked: {}",
                        task.kind,
                        panic_message(e.into_panic())
                    )),
                    Err(e) => Err(anyhow::anyhow!("Handler '{}' was cancelled: {}", task.kind, e)),
                }
            }
            None => {
                let error = format!("Unknown task handler: {}", task.kind);
                tracing::error!("{}", error);
                Err(anyhow::anyhow!(error))
            }
        }
    }

    /// Returns a list of all registered task kinds.
    pub fn list_handlers(&self) -> Vec<String> {
        self.handlers
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn has_handler(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl Default for TaskHandlerRegistry {
    fn default() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => message.to_string(),
            Err(_) => "non-string panic payload".to_string(),
        },
    }
}
