//! Connection configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a [`Connection`](super::Connection).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Upper bound on jobs the service runs at once for this session.
    #[serde(default = "default_max_parallel_jobs")]
    pub max_parallel_jobs: usize,

    /// Execution profile the fetch jobs run on.
    #[serde(default = "default_core_type")]
    pub core_type: String,

    /// Sleep between poll iterations (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Evaluate the completion predicate every this many iterations.
    #[serde(default = "default_info_check_every")]
    pub info_check_every: u64,

    /// Stop waiting for a batch after this long and return what arrived.
    /// Unset waits until the batch completes.
    #[serde(default)]
    pub send_timeout_ms: Option<u64>,
}

fn default_max_parallel_jobs() -> usize {
    10
}

fn default_core_type() -> String {
    "s1".to_string()
}

fn default_poll_interval() -> u64 {
    50
}

fn default_info_check_every() -> u64 {
    10
}

impl ConnectionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn send_timeout(&self) -> Option<Duration> {
        self.send_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_parallel_jobs: default_max_parallel_jobs(),
            core_type: default_core_type(),
            poll_interval_ms: default_poll_interval(),
            info_check_every: default_info_check_every(),
            send_timeout_ms: None,
        }
    }
}
