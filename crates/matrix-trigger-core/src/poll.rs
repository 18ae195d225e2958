//! Poll/state-machine engine.
//!
//! One [`Poller::poll_build`] call drives a single build from its trigger to
//! a terminal state:
//! - `on-hold` / `in-progress`: sleep the backoff and fetch again
//! - fetch failure: log, sleep the same backoff, fetch again
//! - terminal: build the [`BuildOutcome`]; anything but `success` is an
//!   error unless the build's cancellation token was cancelled
//!
//! Attempts are unbounded. The hang timeout only reports; it never stops
//! the loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::BuildApi;
use crate::config::{build_url, PollerConfig};
use crate::error::PollError;
use crate::report::{BuildOutcome, Reporter};
use crate::status::{compute_duration, BuildStatus, Phase};

/// A triggered build to follow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTarget {
    /// Matrix row identifier.
    pub id: String,
    pub app_slug: String,
    pub build_slug: String,
}

/// Raised once per build when its poll outlives the hang timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HangEvent {
    pub id: String,
    pub app_slug: String,
    pub build_slug: String,
    pub build_url: String,
    pub elapsed: Duration,
}

/// Follows builds until they finish.
#[derive(Clone)]
pub struct Poller {
    api: Arc<dyn BuildApi>,
    reporter: Arc<dyn Reporter>,
    config: PollerConfig,
    hang_timeout: Option<Duration>,
    app_url: String,
}

impl Poller {
    pub fn new(
        api: Arc<dyn BuildApi>,
        reporter: Arc<dyn Reporter>,
        config: PollerConfig,
        app_url: &str,
    ) -> Self {
        Poller {
            api,
            reporter,
            config,
            hang_timeout: None,
            app_url: app_url.to_string(),
        }
    }

    /// Report builds still pending after `timeout`.
    pub fn with_hang_timeout(mut self, timeout: Duration) -> Self {
        self.hang_timeout = Some(timeout);
        self
    }

    /// Poll `target` until it reaches a terminal state.
    ///
    /// `cancel` suppresses the error for non-success terminal states; the
    /// outcome is returned either way. Hang events go to `hangs` when given.
    pub async fn poll_build(
        &self,
        target: &PollTarget,
        cancel: &CancellationToken,
        hangs: Option<&UnboundedSender<HangEvent>>,
    ) -> Result<BuildOutcome, PollError> {
        let started = Instant::now();
        let url = build_url(&self.app_url, &target.build_slug);
        let mut hang_reported = false;
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;

            if let Some(max_wait) = self.config.max_wait {
                if started.elapsed() >= max_wait {
                    warn!(id = %target.id, attempt, "poll deadline exceeded");
                    return Err(PollError::DeadlineExceeded {
                        id: target.id.clone(),
                        waited: started.elapsed(),
                    });
                }
            }

            match self
                .api
                .build_status(&target.app_slug, &target.build_slug)
                .await
            {
                Err(err) => {
                    warn!(id = %target.id, attempt, error = %err, "failed to get build");
                }
                Ok(snapshot) => {
                    let status = BuildStatus::parse(&snapshot.status_text);
                    self.reporter.progress(&target.id, status);

                    match status.phase() {
                        Phase::Pending => {
                            debug!(id = %target.id, attempt, status = %status, "build pending");
                        }
                        Phase::Terminal(state) => {
                            let outcome = BuildOutcome::new(
                                &target.id,
                                &snapshot.status_text,
                                state,
                                url.clone(),
                                compute_duration(&snapshot),
                            );
                            info!(
                                id = %target.id,
                                build_slug = %target.build_slug,
                                status = %outcome.status,
                                duration = %outcome.duration,
                                "build finished"
                            );

                            if state.is_success() {
                                return Ok(outcome);
                            }
                            if cancel.is_cancelled() {
                                debug!(id = %target.id, "build cancelled, not failing on {}", outcome.status);
                                return Ok(outcome);
                            }
                            return Err(PollError::BuildFailed {
                                outcome: Box::new(outcome),
                            });
                        }
                    }
                }
            }

            if let (Some(timeout), Some(hangs)) = (self.hang_timeout, hangs) {
                let elapsed = started.elapsed();
                if !hang_reported && elapsed >= timeout {
                    hang_reported = true;
                    warn!(id = %target.id, elapsed = ?elapsed, "build exceeded hang timeout");
                    let _ = hangs.send(HangEvent {
                        id: target.id.clone(),
                        app_slug: target.app_slug.clone(),
                        build_slug: target.build_slug.clone(),
                        build_url: url.clone(),
                        elapsed,
                    });
                }
            }

            tokio::time::sleep(self.config.interval).await;
        }
    }
}
