//! Explicit configuration objects.
//!
//! Nothing in the core reads the process environment. The CLI sources
//! these once at startup and threads them through.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default web host: trigger endpoint and public build pages.
pub const DEFAULT_APP_URL: &str = "https://app.bitrise.io";

/// Default REST API root (status and abort endpoints).
pub const DEFAULT_API_URL: &str = "https://api.bitrise.io/v0.1";

/// Fixed backoff between two status fetches of the same build.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Git metadata of the invoking pipeline, forwarded into every trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitContext {
    pub commit_hash: String,
    pub commit_message: String,
    pub tag: String,
    pub branch: String,
    pub branch_repo_owner: String,
    pub branch_dest: String,
    pub branch_dest_repo_owner: String,
    pub pull_request_id: i64,
    pub pull_request_repository_url: String,
    pub pull_request_merge_branch: String,
    pub pull_request_head_branch: String,
}

/// Connection settings for the build platform.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Web host, e.g. `https://app.bitrise.io`.
    pub app_url: String,
    /// API root, e.g. `https://api.bitrise.io/v0.1`.
    pub api_url: String,
    /// Personal access token for status/abort calls.
    pub api_token: String,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            app_url: DEFAULT_APP_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            api_token: String::new(),
            user_agent: format!("matrix-trigger/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ClientConfig {
    /// Create a config for the public platform with the given API token.
    pub fn new(api_token: &str) -> Self {
        ClientConfig {
            api_token: api_token.to_string(),
            ..Self::default()
        }
    }

    /// Point the client at different hosts (self-hosted proxy, tests).
    pub fn with_urls(mut self, app_url: &str, api_url: &str) -> Self {
        self.app_url = app_url.trim_end_matches('/').to_string();
        self.api_url = api_url.trim_end_matches('/').to_string();
        self
    }

    /// Public page of a build.
    pub fn build_url(&self, build_slug: &str) -> String {
        build_url(&self.app_url, build_slug)
    }
}

/// Public page of a build under the given web host.
pub fn build_url(app_url: &str, build_slug: &str) -> String {
    format!("{}/build/{}", app_url.trim_end_matches('/'), build_slug)
}

/// Poll loop tuning.
///
/// There is no attempt cap: a build that never leaves `in-progress` is
/// polled until the process is stopped, unless `max_wait` is set.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Sleep between fetches, also used after a failed fetch.
    pub interval: Duration,
    /// Hard stop for a single poll loop. `None` polls forever.
    pub max_wait: Option<Duration>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        PollerConfig {
            interval: DEFAULT_POLL_INTERVAL,
            max_wait: None,
        }
    }
}

impl PollerConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }
}

/// What to do when a build outlives its wall-clock timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HangPolicy {
    /// Measured from the start of the build's poll loop.
    pub timeout: Duration,
    /// Abort the remote build once the hang is reported.
    pub abort: bool,
    /// Chat channel for the notification.
    pub channel: String,
}

impl HangPolicy {
    pub fn new(timeout: Duration, channel: &str) -> Self {
        HangPolicy {
            timeout,
            abort: false,
            channel: channel.to_string(),
        }
    }

    pub fn aborting(mut self) -> Self {
        self.abort = true;
        self
    }
}

/// Everything the aggregator needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub app_slug: String,
    pub trigger_token: String,
    pub git: GitContext,
    /// Web host used to render public build URLs.
    pub app_url: String,
    pub poller: PollerConfig,
    pub hang: Option<HangPolicy>,
    /// Keep following the other builds after one has failed.
    pub wait_all: bool,
}

impl BatchConfig {
    pub fn new(app_slug: &str, trigger_token: &str) -> Self {
        BatchConfig {
            app_slug: app_slug.to_string(),
            trigger_token: trigger_token.to_string(),
            git: GitContext::default(),
            app_url: DEFAULT_APP_URL.to_string(),
            poller: PollerConfig::default(),
            hang: None,
            wait_all: false,
        }
    }

    pub fn with_git(mut self, git: GitContext) -> Self {
        self.git = git;
        self
    }

    pub fn with_app_url(mut self, app_url: &str) -> Self {
        self.app_url = app_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_poller(mut self, poller: PollerConfig) -> Self {
        self.poller = poller;
        self
    }

    pub fn with_hang_policy(mut self, hang: HangPolicy) -> Self {
        self.hang = Some(hang);
        self
    }

    pub fn wait_all(mut self, wait_all: bool) -> Self {
        self.wait_all = wait_all;
        self
    }
}

/// Mask a secret for logging, keeping only its length visible.
pub fn redact(secret: &str) -> String {
    if secret.is_empty() {
        String::new()
    } else {
        "*".repeat(secret.chars().count().min(8))
    }
}
