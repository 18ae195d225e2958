//! Build status classification and duration.
//!
//! Pure functions only; decoration lives in `report`.

use chrono::{DateTime, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::api::RemoteBuildSnapshot;

/// Duration text when it cannot be computed.
pub const UNKNOWN_DURATION: &str = "unknown";

/// Textual build status reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildStatus {
    OnHold,
    InProgress,
    Success,
    Error,
    Aborted,
    AbortedWithSuccess,
    Unknown,
}

impl BuildStatus {
    /// Parse `status_text`. Unrecognised text is `Unknown`.
    pub fn parse(text: &str) -> Self {
        match text {
            "on-hold" => BuildStatus::OnHold,
            "in-progress" => BuildStatus::InProgress,
            "success" => BuildStatus::Success,
            "error" => BuildStatus::Error,
            "aborted" => BuildStatus::Aborted,
            "aborted-with-success" => BuildStatus::AbortedWithSuccess,
            _ => BuildStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::OnHold => "on-hold",
            BuildStatus::InProgress => "in-progress",
            BuildStatus::Success => "success",
            BuildStatus::Error => "error",
            BuildStatus::Aborted => "aborted",
            BuildStatus::AbortedWithSuccess => "aborted-with-success",
            BuildStatus::Unknown => "unknown",
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            BuildStatus::OnHold | BuildStatus::InProgress => Phase::Pending,
            BuildStatus::Success => Phase::Terminal(TerminalState::Succeeded),
            BuildStatus::Error => Phase::Terminal(TerminalState::FailedError),
            BuildStatus::Aborted => Phase::Terminal(TerminalState::Aborted),
            BuildStatus::AbortedWithSuccess => Phase::Terminal(TerminalState::AbortedWithSuccess),
            BuildStatus::Unknown => Phase::Terminal(TerminalState::Unknown),
        }
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final state of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Succeeded,
    FailedError,
    Aborted,
    AbortedWithSuccess,
    Unknown,
}

impl TerminalState {
    pub fn is_success(&self) -> bool {
        matches!(self, TerminalState::Succeeded)
    }
}

/// Where a build sits in the local state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// On hold or in progress: poll again.
    Pending,
    Terminal(TerminalState),
}

/// Classify a snapshot's `status_text`.
pub fn classify(status_text: &str) -> Phase {
    BuildStatus::parse(status_text).phase()
}

/// Run time of a finished build.
///
/// Starts at `started_on_worker_at`, falling back to `triggered_at`, and
/// ends at `finished_at`. Missing or unparseable timestamps give
/// [`UNKNOWN_DURATION`].
pub fn compute_duration(snapshot: &RemoteBuildSnapshot) -> String {
    let start = snapshot
        .started_on_worker_at
        .as_deref()
        .or(snapshot.triggered_at.as_deref());

    let (Some(start), Some(end)) = (start, snapshot.finished_at.as_deref()) else {
        return UNKNOWN_DURATION.to_string();
    };

    match (
        DateTime::parse_from_rfc3339(start),
        DateTime::parse_from_rfc3339(end),
    ) {
        (Ok(start), Ok(end)) => format_elapsed(end.signed_duration_since(start)),
        _ => UNKNOWN_DURATION.to_string(),
    }
}

/// Render a duration as `1h2m3s`, `10m0s`, `4.5s` or `250ms`.
pub fn format_elapsed(delta: TimeDelta) -> String {
    let Some(nanos) = delta.num_nanoseconds() else {
        return UNKNOWN_DURATION.to_string();
    };
    let sign = if nanos < 0 { "-" } else { "" };
    let nanos = nanos.unsigned_abs();

    let body = if nanos == 0 {
        "0s".to_string()
    } else if nanos < 1_000 {
        format!("{nanos}ns")
    } else if nanos < 1_000_000 {
        format!("{}µs", decimal(nanos, 1_000))
    } else if nanos < 1_000_000_000 {
        format!("{}ms", decimal(nanos, 1_000_000))
    } else {
        let total_secs = nanos / 1_000_000_000;
        let hours = total_secs / 3600;
        let minutes = (total_secs % 3600) / 60;
        let seconds = nanos % 60_000_000_000;

        let mut out = String::new();
        if hours > 0 {
            out.push_str(&format!("{hours}h"));
        }
        if hours > 0 || minutes > 0 {
            out.push_str(&format!("{minutes}m"));
        }
        out.push_str(&format!("{}s", decimal(seconds, 1_000_000_000)));
        out
    };

    format!("{sign}{body}")
}

/// `value / unit` with the fractional part trimmed of trailing zeros.
fn decimal(value: u64, unit: u64) -> String {
    let whole = value / unit;
    let rest = value % unit;
    if rest == 0 {
        return whole.to_string();
    }
    let width = unit.ilog10() as usize;
    let fraction = format!("{rest:0width$}");
    format!("{whole}.{}", fraction.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(started: Option<&str>, triggered: Option<&str>, finished: Option<&str>) -> RemoteBuildSnapshot {
        RemoteBuildSnapshot {
            started_on_worker_at: started.map(str::to_string),
            triggered_at: triggered.map(str::to_string),
            finished_at: finished.map(str::to_string),
            ..RemoteBuildSnapshot::default()
        }
    }

    #[test]
    fn test_pending_statuses_do_not_terminate() {
        assert_eq!(classify("on-hold"), Phase::Pending);
        assert_eq!(classify("in-progress"), Phase::Pending);
    }

    #[test]
    fn test_terminal_statuses() {
        assert_eq!(classify("success"), Phase::Terminal(TerminalState::Succeeded));
        assert_eq!(classify("error"), Phase::Terminal(TerminalState::FailedError));
        assert_eq!(classify("aborted"), Phase::Terminal(TerminalState::Aborted));
        assert_eq!(
            classify("aborted-with-success"),
            Phase::Terminal(TerminalState::AbortedWithSuccess)
        );
        assert_eq!(classify("unknown"), Phase::Terminal(TerminalState::Unknown));
    }

    #[test]
    fn test_unrecognised_status_is_unknown_terminal() {
        assert_eq!(classify("exploded"), Phase::Terminal(TerminalState::Unknown));
        assert_eq!(classify(""), Phase::Terminal(TerminalState::Unknown));
    }

    #[test]
    fn test_only_success_is_success() {
        assert!(TerminalState::Succeeded.is_success());
        assert!(!TerminalState::AbortedWithSuccess.is_success());
        assert!(!TerminalState::Unknown.is_success());
    }

    #[test]
    fn test_status_text_round_trip() {
        for text in ["on-hold", "in-progress", "success", "error", "aborted", "aborted-with-success", "unknown"] {
            assert_eq!(BuildStatus::parse(text).as_str(), text);
        }
    }

    #[test]
    fn test_duration_from_worker_start() {
        let snap = snapshot(Some("2023-01-01T00:00:00Z"), None, Some("2023-01-01T00:10:00Z"));
        assert_eq!(compute_duration(&snap), "10m0s");
    }

    #[test]
    fn test_duration_prefers_worker_start_over_trigger_time() {
        let snap = snapshot(
            Some("2023-01-01T00:05:00Z"),
            Some("2023-01-01T00:00:00Z"),
            Some("2023-01-01T00:10:00Z"),
        );
        assert_eq!(compute_duration(&snap), "5m0s");
    }

    #[test]
    fn test_duration_falls_back_to_trigger_time() {
        let snap = snapshot(None, Some("2023-01-01T00:00:00Z"), Some("2023-01-01T01:02:03Z"));
        assert_eq!(compute_duration(&snap), "1h2m3s");
    }

    #[test]
    fn test_duration_unknown_without_timestamps() {
        assert_eq!(compute_duration(&snapshot(None, None, Some("2023-01-01T00:10:00Z"))), "unknown");
        assert_eq!(compute_duration(&snapshot(Some("2023-01-01T00:00:00Z"), None, None)), "unknown");
        assert_eq!(
            compute_duration(&snapshot(Some("yesterday"), None, Some("2023-01-01T00:10:00Z"))),
            "unknown"
        );
    }

    #[test]
    fn test_format_elapsed_layouts() {
        assert_eq!(format_elapsed(TimeDelta::zero()), "0s");
        assert_eq!(format_elapsed(TimeDelta::seconds(45)), "45s");
        assert_eq!(format_elapsed(TimeDelta::seconds(3600)), "1h0m0s");
        assert_eq!(format_elapsed(TimeDelta::milliseconds(1500)), "1.5s");
        assert_eq!(format_elapsed(TimeDelta::milliseconds(250)), "250ms");
        assert_eq!(format_elapsed(TimeDelta::microseconds(1500)), "1.5ms");
        assert_eq!(format_elapsed(TimeDelta::seconds(-90)), "-1m30s");
    }
}
