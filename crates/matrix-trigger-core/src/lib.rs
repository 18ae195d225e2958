//! Matrix Trigger Core Library
//!
//! Triggers one Bitrise build per row of an environment matrix, follows
//! every build to a terminal state and aggregates the results.

pub mod api;
pub mod config;
pub mod error;
pub mod fakes;
pub mod matrix;
pub mod notify;
pub mod orchestrator;
pub mod poll;
pub mod report;
pub mod status;
pub mod telemetry;

pub use api::{
    AbortAck, AbortRequest, BitriseClient, BuildApi, RemoteBuildSnapshot, TriggerParams,
    TriggeredBuild,
};
pub use config::{
    build_url, redact, BatchConfig, ClientConfig, GitContext, HangPolicy, PollerConfig,
    DEFAULT_API_URL, DEFAULT_APP_URL, DEFAULT_POLL_INTERVAL,
};
pub use error::{ApiError, BatchError, BatchResult, MatrixError, NotifyError, PollError};
pub use matrix::{build_id, build_keys, parse_env_matrix, BuildRequestKey, EnvRow, SharedParams};
pub use notify::{ChatMessage, Notifier, SlackNotifier};
pub use orchestrator::{Orchestrator, StartedBuild};
pub use poll::{HangEvent, PollTarget, Poller};
pub use report::{render_table, BuildOutcome, ConsoleReporter, Reporter};
pub use status::{classify, compute_duration, format_elapsed, BuildStatus, Phase, TerminalState};
pub use telemetry::{init_tracing, level_for_verbosity};
