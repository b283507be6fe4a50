//! HTTP client configuration.

use serde::{Deserialize, Serialize};

/// Settings for the reqwest client used by workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout in seconds, unless a request overrides it.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// User-Agent header sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Follow redirects unless a request overrides it.
    #[serde(default = "default_follow_redirects")]
    pub follow_redirects: bool,

    /// Maximum redirect hops when following.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

fn default_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("fetchfleet/{}", env!("CARGO_PKG_VERSION"))
}

fn default_follow_redirects() -> bool {
    true
}

fn default_max_redirects() -> usize {
    10
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            user_agent: default_user_agent(),
            follow_redirects: default_follow_redirects(),
            max_redirects: default_max_redirects(),
        }
    }
}
