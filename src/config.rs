//! Run Configuration
//!
//! Policies that every rank of a run must agree on. Values come from code
//! (builder setters) or from `TASKQUEUE_*` environment variables.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const ENV_FAILURE_POLICY: &str = "TASKQUEUE_FAILURE_POLICY";
pub const ENV_BACKLOG_POLICY: &str = "TASKQUEUE_BACKLOG_POLICY";
pub const ENV_SHUTDOWN_ACK: &str = "TASKQUEUE_SHUTDOWN_ACK";
pub const ENV_MAX_RETRIES: &str = "TASKQUEUE_MAX_RETRIES";

/// What happens when a task's `execute()` fails after all retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Tear down the whole run.
    #[default]
    Abort,
    /// Record a failed `TaskResult` and keep dispatching.
    ContinueOnFailure,
}

impl FromStr for FailurePolicy {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(FailurePolicy::Abort),
            "continue" | "continue-on-failure" | "continue_on_failure" => {
                Ok(FailurePolicy::ContinueOnFailure)
            }
            other => Err(Error::Config(format!(
                "invalid failure policy '{}', expected 'abort' or 'continue-on-failure'",
                other
            ))),
        }
    }
}

/// Order in which the root dequeues pending tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BacklogPolicy {
    #[default]
    Fifo,
    /// Highest `Task::priority` first, FIFO among equal priorities.
    Priority,
}

impl FromStr for BacklogPolicy {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(BacklogPolicy::Fifo),
            "priority" => Ok(BacklogPolicy::Priority),
            other => Err(Error::Config(format!(
                "invalid backlog policy '{}', expected 'fifo' or 'priority'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub failure_policy: FailurePolicy,
    pub backlog_policy: BacklogPolicy,
    /// Workers answer `EndTask` with `Terminated` and the root waits for every ack.
    pub require_shutdown_ack: bool,
    /// Extra attempts a worker makes before a task counts as failed.
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::Abort,
            backlog_policy: BacklogPolicy::Fifo,
            require_shutdown_ack: true,
            max_retries: 0,
        }
    }
}

impl QueueConfig {
    /// Builds a configuration from `TASKQUEUE_*` variables, defaulting anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_FAILURE_POLICY) {
            config.failure_policy = value.parse()?;
        }
        if let Some(value) = lookup(ENV_BACKLOG_POLICY) {
            config.backlog_policy = value.parse()?;
        }
        if let Some(value) = lookup(ENV_SHUTDOWN_ACK) {
            config.require_shutdown_ack = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(Error::Config(format!(
                        "invalid {} value '{}'",
                        ENV_SHUTDOWN_ACK, other
                    )));
                }
            };
        }
        if let Some(value) = lookup(ENV_MAX_RETRIES) {
            config.max_retries = value.trim().parse().map_err(|_| {
                Error::Config(format!("invalid {} value '{}'", ENV_MAX_RETRIES, value))
            })?;
        }

        Ok(config)
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_backlog_policy(mut self, policy: BacklogPolicy) -> Self {
        self.backlog_policy = policy;
        self
    }

    pub fn with_shutdown_ack(mut self, required: bool) -> Self {
        self.require_shutdown_ack = required;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_abort_fifo_with_ack() {
        let config = QueueConfig::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config, QueueConfig::default());
        assert_eq!(config.failure_policy, FailurePolicy::Abort);
        assert_eq!(config.backlog_policy, BacklogPolicy::Fifo);
        assert!(config.require_shutdown_ack);
        assert_eq!(config.max_retries, 0);
    }

    #[test]
    fn test_env_overrides() {
        let config = QueueConfig::from_lookup(lookup_from(&[
            (ENV_FAILURE_POLICY, "Continue-On-Failure"),
            (ENV_BACKLOG_POLICY, "priority"),
            (ENV_SHUTDOWN_ACK, "off"),
            (ENV_MAX_RETRIES, "3"),
        ]))
        .unwrap();

        assert_eq!(config.failure_policy, FailurePolicy::ContinueOnFailure);
        assert_eq!(config.backlog_policy, BacklogPolicy::Priority);
        assert!(!config.require_shutdown_ack);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        let bad_policy = QueueConfig::from_lookup(lookup_from(&[(ENV_FAILURE_POLICY, "ignore")]));
        assert!(matches!(bad_policy, Err(Error::Config(_))));

        let bad_retries = QueueConfig::from_lookup(lookup_from(&[(ENV_MAX_RETRIES, "-1")]));
        assert!(matches!(bad_retries, Err(Error::Config(_))));
    }
}
