//! In-memory fakes for the collaborator traits (testing only)
//!
//! Provides `MemoryBuildApi`, `MemoryNotifier` and `RecordingReporter`,
//! which satisfy the trait contracts without touching the network or
//! the console.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::api::{
    AbortAck, AbortRequest, BuildApi, RemoteBuildSnapshot, TriggerParams, TriggeredBuild,
    TRIGGER_OK,
};
use crate::error::{ApiError, ApiResult, NotifyError};
use crate::notify::{ChatMessage, Notifier};
use crate::report::{BuildOutcome, Reporter};
use crate::status::{classify, BuildStatus, Phase};

/// Snapshot with the given status text.
///
/// Terminal statuses get a ten minute run time.
pub fn snapshot(status_text: &str) -> RemoteBuildSnapshot {
    let finished = matches!(classify(status_text), Phase::Terminal(_));
    RemoteBuildSnapshot {
        status_text: status_text.to_string(),
        is_on_hold: status_text == "on-hold",
        started_on_worker_at: finished.then(|| "2023-01-01T00:00:00Z".to_string()),
        finished_at: finished.then(|| "2023-01-01T00:10:00Z".to_string()),
        ..RemoteBuildSnapshot::default()
    }
}

/// Accepted trigger response for `build_slug`.
pub fn triggered(app_slug: &str, build_slug: &str) -> TriggeredBuild {
    TriggeredBuild {
        status: TRIGGER_OK.to_string(),
        slug: app_slug.to_string(),
        build_slug: build_slug.to_string(),
    }
}

// ---------------------------------------------------------------------------
// MemoryBuildApi
// ---------------------------------------------------------------------------

/// Scripted build platform.
///
/// Triggers pop scripted responses, or succeed with `build-{n}` slugs once
/// the script is empty. Status scripts are consumed in order and the last
/// entry repeats. A successful abort makes the build report `aborted`,
/// optionally before the abort call itself returns.
#[derive(Debug, Default)]
pub struct MemoryBuildApi {
    trigger_script: Mutex<VecDeque<ApiResult<TriggeredBuild>>>,
    triggers: Mutex<Vec<(String, TriggerParams)>>,
    statuses: Mutex<HashMap<String, VecDeque<ApiResult<RemoteBuildSnapshot>>>>,
    status_calls: Mutex<HashMap<String, usize>>,
    abort_error: Mutex<Option<ApiError>>,
    abort_delay: Mutex<Option<Duration>>,
    aborts: Mutex<Vec<(String, AbortRequest)>>,
}

impl MemoryBuildApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_trigger(&self, response: ApiResult<TriggeredBuild>) {
        self.trigger_script.lock().unwrap().push_back(response);
    }

    pub fn script_status(&self, build_slug: &str, script: Vec<ApiResult<RemoteBuildSnapshot>>) {
        self.statuses
            .lock()
            .unwrap()
            .insert(build_slug.to_string(), script.into());
    }

    pub fn fail_aborts(&self, error: ApiError) {
        *self.abort_error.lock().unwrap() = Some(error);
    }

    /// Successful aborts take effect remotely at once but only return after
    /// `delay`.
    pub fn delay_aborts(&self, delay: Duration) {
        *self.abort_delay.lock().unwrap() = Some(delay);
    }

    /// Trigger calls received, in order.
    pub fn triggers(&self) -> Vec<(String, TriggerParams)> {
        self.triggers.lock().unwrap().clone()
    }

    pub fn status_calls(&self, build_slug: &str) -> usize {
        self.status_calls
            .lock()
            .unwrap()
            .get(build_slug)
            .copied()
            .unwrap_or(0)
    }

    /// Build slugs an abort was requested for.
    pub fn aborted(&self) -> Vec<String> {
        self.aborts
            .lock()
            .unwrap()
            .iter()
            .map(|(slug, _)| slug.clone())
            .collect()
    }

    pub fn abort_requests(&self) -> Vec<AbortRequest> {
        self.aborts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }
}

#[async_trait]
impl BuildApi for MemoryBuildApi {
    async fn trigger_build(
        &self,
        app_slug: &str,
        params: &TriggerParams,
    ) -> ApiResult<TriggeredBuild> {
        let mut triggers = self.triggers.lock().unwrap();
        triggers.push((app_slug.to_string(), params.clone()));
        let scripted = self.trigger_script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(triggered(app_slug, &format!("build-{}", triggers.len()))))
    }

    async fn build_status(
        &self,
        _app_slug: &str,
        build_slug: &str,
    ) -> ApiResult<RemoteBuildSnapshot> {
        *self
            .status_calls
            .lock()
            .unwrap()
            .entry(build_slug.to_string())
            .or_default() += 1;

        let mut statuses = self.statuses.lock().unwrap();
        let Some(script) = statuses.get_mut(build_slug) else {
            return Err(ApiError::UnexpectedStatus {
                status: "404 Not Found".to_string(),
                body: format!("{{\"message\":\"build {build_slug} not found\"}}"),
            });
        };

        if script.len() > 1 {
            script.pop_front().unwrap_or_else(|| Ok(snapshot("unknown")))
        } else {
            script.front().cloned().unwrap_or_else(|| Ok(snapshot("unknown")))
        }
    }

    async fn abort_build(
        &self,
        _app_slug: &str,
        build_slug: &str,
        request: &AbortRequest,
    ) -> ApiResult<AbortAck> {
        self.aborts
            .lock()
            .unwrap()
            .push((build_slug.to_string(), request.clone()));

        if let Some(err) = self.abort_error.lock().unwrap().clone() {
            return Err(err);
        }

        self.script_status(build_slug, vec![Ok(snapshot("aborted"))]);

        let delay = *self.abort_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(AbortAck {
            status: TRIGGER_OK.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryNotifier
// ---------------------------------------------------------------------------

/// Notifier that keeps every message, optionally failing each post.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    messages: Mutex<Vec<ChatMessage>>,
    reject: bool,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose every post is rejected (after being recorded).
    pub fn rejecting() -> Self {
        MemoryNotifier {
            messages: Mutex::default(),
            reject: true,
        }
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn post(&self, message: &ChatMessage) -> Result<(), NotifyError> {
        self.messages.lock().unwrap().push(message.clone());
        if self.reject {
            return Err(NotifyError::Rejected {
                status: "500 Internal Server Error".to_string(),
                body: "channel_not_found".to_string(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingReporter
// ---------------------------------------------------------------------------

/// Reporter that records progress ticks and summaries instead of printing.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    progress: Mutex<Vec<(String, BuildStatus)>>,
    summaries: Mutex<Vec<BTreeMap<String, BuildOutcome>>>,
}

impl RecordingReporter {
    pub fn progress_count(&self) -> usize {
        self.progress.lock().unwrap().len()
    }

    pub fn ticks(&self) -> Vec<(String, BuildStatus)> {
        self.progress.lock().unwrap().clone()
    }

    /// The last summary, if the batch reached the reporting step.
    pub fn last_summary(&self) -> Option<BTreeMap<String, BuildOutcome>> {
        self.summaries.lock().unwrap().last().cloned()
    }
}

impl Reporter for RecordingReporter {
    fn progress(&self, id: &str, status: BuildStatus) {
        self.progress.lock().unwrap().push((id.to_string(), status));
    }

    fn summary(&self, outcomes: &BTreeMap<String, BuildOutcome>) {
        self.summaries.lock().unwrap().push(outcomes.clone());
    }
}
