//! matrix-trigger - fan a build matrix out to Bitrise
//!
//! Triggers one build of `--workflow` per line of `--env-matrix`, follows
//! every build until it finishes and prints a summary table. Exits with 1
//! when any build does not succeed.
//!
//! Every option can also be given through the environment variable named
//! next to it, which is how CI step inputs reach the binary.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args, Parser};
use tracing::{error, info, warn};

use matrix_trigger_core::{
    build_keys, init_tracing, level_for_verbosity, parse_env_matrix, redact, BatchConfig,
    BitriseClient, ClientConfig, ConsoleReporter, GitContext, HangPolicy, Notifier, Orchestrator,
    PollerConfig, SharedParams, SlackNotifier, DEFAULT_API_URL, DEFAULT_APP_URL,
};

#[derive(Parser, Debug)]
#[command(name = "matrix-trigger")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Trigger a Bitrise workflow for every row of an environment matrix", long_about = None)]
struct Cli {
    /// Build trigger token of the app
    #[arg(long, env = "trigger_token", hide_env_values = true)]
    trigger_token: String,

    /// Personal access token for status and abort calls
    #[arg(long, env = "api_token", hide_env_values = true)]
    api_token: String,

    /// Slug of the app to build
    #[arg(long, env = "app_slug")]
    app_slug: String,

    /// Stack to run on (empty keeps the app default)
    #[arg(long, env = "stack_id", default_value = "")]
    stack_id: String,

    /// Machine type to run on (empty keeps the app default)
    #[arg(long, env = "machine_type", default_value = "")]
    machine_type: String,

    /// Workflow to trigger
    #[arg(long, env = "workflow")]
    workflow: String,

    /// One `KEY=value,KEY2=value2` line per build
    #[arg(long, env = "env_matrix", default_value = "")]
    env_matrix: String,

    /// Override the repository owner of the triggered builds
    #[arg(long, env = "repo_owner")]
    repo_owner: Option<String>,

    /// Seconds before a running build counts as hung (0 disables)
    #[arg(long, env = "hang_timeout", default_value_t = 0)]
    hang_timeout: u64,

    /// Abort builds once they count as hung
    #[arg(long, env = "abort_on_hang", action = ArgAction::SetTrue, value_parser = BoolishValueParser::new())]
    abort_on_hang: bool,

    /// Chat webhook for hang notifications
    #[arg(long, env = "webhook_url", hide_env_values = true)]
    webhook_url: Option<String>,

    /// Chat channel for hang notifications
    #[arg(long, env = "slack_channel", default_value = "")]
    slack_channel: String,

    /// Chat API token, used when no webhook is set
    #[arg(long = "slack-token", env = "slack_api_token", hide_env_values = true)]
    slack_api_token: Option<String>,

    /// Seconds between two status requests for the same build
    #[arg(long, env = "poll_interval", default_value_t = 10)]
    poll_interval: u64,

    /// Keep following the other builds after one has failed
    #[arg(long, env = "wait_all", action = ArgAction::SetTrue, value_parser = BoolishValueParser::new())]
    wait_all: bool,

    /// Web host used for triggers and build links
    #[arg(long, env = "BITRISE_APP_URL", default_value = DEFAULT_APP_URL)]
    app_url: String,

    /// REST API root used for status and abort calls
    #[arg(long, env = "BITRISE_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    #[command(flatten)]
    git: GitArgs,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

/// Git metadata of the calling pipeline, forwarded into every trigger.
#[derive(Args, Debug, Default)]
struct GitArgs {
    #[arg(long, env = "BITRISE_GIT_COMMIT", default_value = "", hide = true)]
    git_commit: String,

    #[arg(long, env = "BITRISE_GIT_MESSAGE", default_value = "", hide = true)]
    git_message: String,

    #[arg(long, env = "BITRISE_GIT_TAG", default_value = "", hide = true)]
    git_tag: String,

    #[arg(long, env = "BITRISE_GIT_BRANCH", default_value = "", hide = true)]
    git_branch: String,

    #[arg(long, env = "BITRISEIO_GIT_REPOSITORY_OWNER", default_value = "", hide = true)]
    git_repository_owner: String,

    #[arg(long, env = "BITRISEIO_GIT_BRANCH_DEST", default_value = "", hide = true)]
    git_branch_dest: String,

    #[arg(long, env = "PULL_REQUEST_ID", default_value = "", hide = true)]
    pull_request_id: String,

    #[arg(long, env = "BITRISEIO_PULL_REQUEST_REPOSITORY_URL", default_value = "", hide = true)]
    pull_request_repository_url: String,

    #[arg(long, env = "BITRISEIO_PULL_REQUEST_MERGE_BRANCH", default_value = "", hide = true)]
    pull_request_merge_branch: String,

    #[arg(long, env = "BITRISEIO_PULL_REQUEST_HEAD_BRANCH", default_value = "", hide = true)]
    pull_request_head_branch: String,
}

impl GitArgs {
    fn into_context(self) -> GitContext {
        let pull_request_id = match self.pull_request_id.trim() {
            "" => 0,
            raw => raw.parse().unwrap_or_else(|_| {
                warn!(value = raw, "PULL_REQUEST_ID is not a number, using 0");
                0
            }),
        };

        GitContext {
            commit_hash: self.git_commit,
            commit_message: self.git_message,
            tag: self.git_tag,
            branch: self.git_branch,
            branch_repo_owner: self.git_repository_owner.clone(),
            branch_dest: self.git_branch_dest,
            branch_dest_repo_owner: self.git_repository_owner,
            pull_request_id,
            pull_request_repository_url: self.pull_request_repository_url,
            pull_request_merge_branch: self.pull_request_merge_branch,
            pull_request_head_branch: self.pull_request_head_branch,
        }
    }
}

impl Cli {
    fn hang_policy(&self) -> Option<HangPolicy> {
        if self.hang_timeout == 0 {
            return None;
        }
        let policy = HangPolicy::new(Duration::from_secs(self.hang_timeout), &self.slack_channel);
        Some(if self.abort_on_hang {
            policy.aborting()
        } else {
            policy
        })
    }

    fn notifier(&self) -> Option<Arc<dyn Notifier>> {
        let has_endpoint = [&self.webhook_url, &self.slack_api_token]
            .iter()
            .any(|value| value.as_deref().is_some_and(|v| !v.trim().is_empty()));
        if !has_endpoint {
            return None;
        }
        Some(Arc::new(SlackNotifier::new(
            self.webhook_url.as_deref(),
            self.slack_api_token.as_deref(),
        )))
    }

    fn log_config(&self) {
        info!(
            app_slug = %self.app_slug,
            workflow = %self.workflow,
            stack_id = %self.stack_id,
            machine_type = %self.machine_type,
            repo_owner = self.repo_owner.as_deref().unwrap_or(""),
            trigger_token = %redact(&self.trigger_token),
            api_token = %redact(&self.api_token),
            hang_timeout = self.hang_timeout,
            abort_on_hang = self.abort_on_hang,
            slack_channel = %self.slack_channel,
            webhook_url = %redact(self.webhook_url.as_deref().unwrap_or("")),
            slack_api_token = %redact(self.slack_api_token.as_deref().unwrap_or("")),
            poll_interval = self.poll_interval,
            wait_all = self.wait_all,
            app_url = %self.app_url,
            api_url = %self.api_url,
            "configuration"
        );
    }
}

async fn run(cli: Cli) -> Result<()> {
    cli.log_config();

    let rows = parse_env_matrix(&cli.env_matrix).context("Failed to parse env matrix")?;
    let mut shared = SharedParams::new(&cli.stack_id, &cli.machine_type, &cli.workflow);
    if let Some(owner) = &cli.repo_owner {
        shared = shared.with_repo_owner(owner);
    }
    let keys = build_keys(&rows, &shared);
    info!(builds = keys.len(), "env matrix parsed");

    let client = BitriseClient::new(
        ClientConfig::new(&cli.api_token).with_urls(&cli.app_url, &cli.api_url),
    )
    .context("Failed to create HTTP client")?;

    let hang = cli.hang_policy();
    let notifier = cli.notifier();
    if hang.is_some() && notifier.is_none() {
        warn!("hang detection enabled without webhook_url or slack_api_token, notifications are skipped");
    }

    let mut config = BatchConfig::new(&cli.app_slug, &cli.trigger_token)
        .with_app_url(&cli.app_url)
        .with_poller(PollerConfig::default().with_interval(Duration::from_secs(cli.poll_interval)))
        .wait_all(cli.wait_all);
    if let Some(policy) = hang {
        config = config.with_hang_policy(policy);
    }

    let Cli { git, .. } = cli;
    config = config.with_git(git.into_context());

    let mut orchestrator =
        Orchestrator::new(Arc::new(client), Arc::new(ConsoleReporter), config);
    if let Some(notifier) = notifier {
        orchestrator = orchestrator.with_notifier(notifier);
    }

    orchestrator
        .execute_workflows(&keys)
        .await
        .context("Build matrix failed")?;

    info!("all builds succeeded");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json, level_for_verbosity(cli.verbose));

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
