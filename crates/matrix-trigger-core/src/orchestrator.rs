//! Batch orchestrator: trigger every matrix row, follow every build,
//! aggregate the verdict.
//!
//! Phase 1 triggers sequentially and stops at the first failure. Phase 2
//! spawns one poll task per triggered build; the orchestrator alone owns
//! the outcome map and handles hang events as they arrive.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::api::{AbortRequest, BuildApi, TriggeredBuild};
use crate::config::{build_url, BatchConfig, HangPolicy};
use crate::error::{BatchError, BatchResult, PollError};
use crate::matrix::BuildRequestKey;
use crate::notify::{ChatMessage, Notifier};
use crate::poll::{HangEvent, PollTarget, Poller};
use crate::report::{BuildOutcome, Reporter};
use crate::status::format_elapsed;

const NOTIFY_USERNAME: &str = "matrix-trigger";
const NOTIFY_ICON: &str = ":hourglass_flowing_sand:";

fn human(duration: Duration) -> String {
    format_elapsed(TimeDelta::from_std(duration).unwrap_or_else(|_| TimeDelta::zero()))
}

/// A key paired with the trigger response it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedBuild {
    pub key: BuildRequestKey,
    pub triggered: TriggeredBuild,
}

impl StartedBuild {
    fn poll_target(&self, fallback_app_slug: &str) -> PollTarget {
        let app_slug = if self.triggered.slug.is_empty() {
            fallback_app_slug
        } else {
            &self.triggered.slug
        };
        PollTarget {
            id: self.key.id.clone(),
            app_slug: app_slug.to_string(),
            build_slug: self.triggered.build_slug.clone(),
        }
    }
}

/// Runs a batch of builds against the platform.
pub struct Orchestrator {
    api: Arc<dyn BuildApi>,
    reporter: Arc<dyn Reporter>,
    notifier: Option<Arc<dyn Notifier>>,
    config: BatchConfig,
}

impl Orchestrator {
    pub fn new(api: Arc<dyn BuildApi>, reporter: Arc<dyn Reporter>, config: BatchConfig) -> Self {
        Orchestrator {
            api,
            reporter,
            notifier: None,
            config,
        }
    }

    /// Post hang notifications through `notifier`.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Trigger and follow every key; return outcomes keyed by identifier.
    ///
    /// Outcomes are reported through the `Reporter` before any build
    /// failure is returned. Duplicate identifiers keep the later row.
    pub async fn execute_workflows(
        &self,
        keys: &[BuildRequestKey],
    ) -> BatchResult<BTreeMap<String, BuildOutcome>> {
        let batch_id = Uuid::new_v4();
        let span = tracing::info_span!("matrix.batch", batch_id = %batch_id, builds = keys.len());

        async move {
            if keys.is_empty() {
                warn!("env matrix is empty, nothing to trigger");
            }

            info!("triggering workflows");
            let started = self.trigger_all(keys).await?;

            info!("monitoring workflows");
            let (outcomes, failure) = self.monitor(&started).await;

            self.reporter.summary(&outcomes);

            match failure {
                Some(err) => Err(err),
                None => Ok(outcomes),
            }
        }
        .instrument(span)
        .await
    }

    /// Trigger every key in order, stopping at the first failure.
    pub async fn trigger_all(&self, keys: &[BuildRequestKey]) -> BatchResult<Vec<StartedBuild>> {
        let mut started = Vec::with_capacity(keys.len());

        for key in keys {
            info!(id = %key.id, "starting build");
            let params = key.trigger_params(&self.config.git, &self.config.trigger_token);

            match self.api.trigger_build(&self.config.app_slug, &params).await {
                Ok(triggered) => {
                    info!(
                        id = %key.id,
                        build_slug = %triggered.build_slug,
                        url = %build_url(&self.config.app_url, &triggered.build_slug),
                        "build triggered"
                    );
                    started.push(StartedBuild {
                        key: key.clone(),
                        triggered,
                    });
                }
                Err(source) => {
                    error!(id = %key.id, error = %source, "trigger failed");
                    self.log_orphans(&started);
                    return Err(BatchError::Trigger {
                        id: key.id.clone(),
                        source,
                    });
                }
            }
        }

        Ok(started)
    }

    fn log_orphans(&self, started: &[StartedBuild]) {
        for build in started {
            warn!(
                id = %build.key.id,
                url = %build_url(&self.config.app_url, &build.triggered.build_slug),
                "build keeps running without being monitored"
            );
        }
    }

    fn poller(&self) -> Poller {
        let poller = Poller::new(
            Arc::clone(&self.api),
            Arc::clone(&self.reporter),
            self.config.poller.clone(),
            &self.config.app_url,
        );
        match &self.config.hang {
            Some(policy) => poller.with_hang_timeout(policy.timeout),
            None => poller,
        }
    }

    /// Poll every started build concurrently.
    ///
    /// Returns the outcomes collected and the first failure, if any. The
    /// wait ends at the first failure unless `wait_all` is set; builds still
    /// running then are detached and missing from the outcomes.
    async fn monitor(
        &self,
        started: &[StartedBuild],
    ) -> (BTreeMap<String, BuildOutcome>, Option<BatchError>) {
        let poller = self.poller();
        let (hang_tx, mut hang_rx) = mpsc::unbounded_channel::<HangEvent>();
        let mut tokens: HashMap<String, CancellationToken> = HashMap::new();
        let mut tasks = JoinSet::new();

        for (index, build) in started.iter().enumerate() {
            let target = build.poll_target(&self.config.app_slug);
            let token = CancellationToken::new();
            tokens.insert(target.build_slug.clone(), token.clone());

            let poller = poller.clone();
            let hangs = self.config.hang.as_ref().map(|_| hang_tx.clone());
            tasks.spawn(async move {
                let result = poller.poll_build(&target, &token, hangs.as_ref()).await;
                (index, result)
            });
        }
        drop(hang_tx);

        let mut slots: Vec<Option<BuildOutcome>> = vec![None; started.len()];
        let mut failure: Option<BatchError> = None;

        loop {
            tokio::select! {
                Some(event) = hang_rx.recv() => {
                    self.handle_hang(event, &tokens).await;
                }
                joined = tasks.join_next() => {
                    let Some(joined) = joined else {
                        break;
                    };
                    match joined {
                        Ok((index, Ok(outcome))) => slots[index] = Some(outcome),
                        Ok((index, Err(PollError::BuildFailed { outcome }))) => {
                            // A poll can observe `aborted` before the abort call returns;
                            // the token is checked again here, after `handle_hang` finished.
                            let aborted_on_hang = tokens
                                .get(&started[index].triggered.build_slug)
                                .is_some_and(CancellationToken::is_cancelled);
                            if aborted_on_hang {
                                info!(id = %outcome.id, status = %outcome.status, "hung build stopped after abort");
                            } else {
                                error!(id = %outcome.id, status = %outcome.status, "build failed");
                                failure.get_or_insert_with(|| BatchError::BuildFailed {
                                    id: outcome.id.clone(),
                                    status: outcome.status.clone(),
                                });
                            }
                            slots[index] = Some(*outcome);
                        }
                        Ok((_, Err(err))) => {
                            error!(error = %err, "poll ended without a result");
                            failure.get_or_insert(BatchError::Poll(err));
                        }
                        Err(join_err) => {
                            error!(error = %join_err, "poll task failed");
                            failure.get_or_insert(BatchError::Join(join_err.to_string()));
                        }
                    }

                    if failure.is_some() && !self.config.wait_all {
                        if !tasks.is_empty() {
                            warn!(remaining = tasks.len(), "batch failed, no longer waiting for remaining builds");
                        }
                        tasks.detach_all();
                        break;
                    }
                }
            }
        }

        let mut outcomes = BTreeMap::new();
        for outcome in slots.into_iter().flatten() {
            outcomes.insert(outcome.id.clone(), outcome);
        }
        (outcomes, failure)
    }

    /// Notify about a hung build and, if the policy says so, abort it.
    async fn handle_hang(&self, event: HangEvent, tokens: &HashMap<String, CancellationToken>) {
        let Some(policy) = &self.config.hang else {
            return;
        };

        let mut lines = vec![format!(
            "[{}] build is still running after {} (timeout {}): {}",
            event.id,
            human(event.elapsed),
            human(policy.timeout),
            event.build_url
        )];

        if policy.abort {
            lines.push(self.abort_hung_build(&event, policy, tokens).await);
        }

        let Some(notifier) = &self.notifier else {
            return;
        };
        let message = ChatMessage::new(&policy.channel, &lines.join("\n"))
            .with_username(NOTIFY_USERNAME)
            .with_icon_emoji(NOTIFY_ICON)
            .linking_names();
        match notifier.post(&message).await {
            Ok(()) => info!(id = %event.id, channel = %policy.channel, "hang notification sent"),
            Err(err) => error!(id = %event.id, error = %err, "failed to send hang notification"),
        }
    }

    async fn abort_hung_build(
        &self,
        event: &HangEvent,
        policy: &HangPolicy,
        tokens: &HashMap<String, CancellationToken>,
    ) -> String {
        warn!(
            id = %event.id,
            build_slug = %event.build_slug,
            timeout = %human(policy.timeout),
            "aborting hung build"
        );

        match self
            .api
            .abort_build(&event.app_slug, &event.build_slug, &AbortRequest::default())
            .await
        {
            Ok(_) => {
                if let Some(token) = tokens.get(&event.build_slug) {
                    token.cancel();
                }
                info!(id = %event.id, build_slug = %event.build_slug, "hung build aborted");
                format!("[{}] Build aborted", event.id)
            }
            Err(err) => {
                error!(id = %event.id, error = %err, "failed to abort hung build");
                format!("[{}] Failed to abort build: {}", event.id, err.to_string().trim())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::fakes::{triggered, MemoryBuildApi, RecordingReporter};
    use crate::matrix::SharedParams;

    fn key(envs: &[(&str, &str)]) -> BuildRequestKey {
        BuildRequestKey::new(
            &SharedParams::new("stack", "m", "ci"),
            envs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        )
    }

    #[tokio::test]
    async fn test_trigger_all_stops_at_first_failure() {
        let api = Arc::new(MemoryBuildApi::new());
        api.script_trigger(Ok(triggered("app", "b1")));
        api.script_trigger(Err(ApiError::UnexpectedStatus {
            status: "403 Forbidden".to_string(),
            body: "{\"message\":\"invalid token\"}".to_string(),
        }));
        let orchestrator = Orchestrator::new(
            api.clone(),
            Arc::new(RecordingReporter::default()),
            BatchConfig::new("app", "token"),
        );

        let keys = vec![key(&[("A", "1")]), key(&[("A", "2")]), key(&[("A", "3")])];
        let err = orchestrator.trigger_all(&keys).await.unwrap_err();

        match err {
            BatchError::Trigger { id, source } => {
                assert_eq!(id, keys[1].id);
                assert!(source.to_string().contains("invalid token"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(api.triggers().len(), 2, "third key must not be triggered");
    }

    #[test]
    fn test_poll_target_falls_back_to_configured_app_slug() {
        let build = StartedBuild {
            key: key(&[]),
            triggered: TriggeredBuild {
                status: "ok".to_string(),
                slug: String::new(),
                build_slug: "b1".to_string(),
            },
        };
        assert_eq!(build.poll_target("configured").app_slug, "configured");
    }
}
