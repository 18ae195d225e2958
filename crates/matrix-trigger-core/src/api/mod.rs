//! Remote build client.
//!
//! Three stateless operations against the build platform:
//! - `trigger_build`: start a build for one matrix row
//! - `build_status`: fetch one snapshot of a running build
//! - `abort_build`: stop a build
//!
//! The [`BuildApi`] trait is the seam the poller and aggregator depend on;
//! [`BitriseClient`] is the HTTP implementation and `crate::fakes` holds an
//! in-memory one for tests.

pub mod client;
pub mod types;

use async_trait::async_trait;

use crate::error::ApiResult;

pub use client::BitriseClient;
pub use types::{
    AbortAck, AbortRequest, BuildParams, EnvironmentParam, HookInfo, OriginalBuildParams,
    RemoteBuildSnapshot, TriggerParams, TriggeredBuild, WorkerParams, HOOK_TYPE, TRIGGER_OK,
};

/// Operations of the remote build platform.
///
/// Implementations must not retry internally; retry policy belongs to the
/// poller.
#[async_trait]
pub trait BuildApi: Send + Sync {
    /// Start a build. Succeeds only on HTTP 201 with status `"ok"`.
    async fn trigger_build(&self, app_slug: &str, params: &TriggerParams)
        -> ApiResult<TriggeredBuild>;

    /// Fetch the current state of a build. Requires HTTP 200.
    async fn build_status(&self, app_slug: &str, build_slug: &str)
        -> ApiResult<RemoteBuildSnapshot>;

    /// Abort a build. Requires HTTP 200.
    async fn abort_build(
        &self,
        app_slug: &str,
        build_slug: &str,
        request: &AbortRequest,
    ) -> ApiResult<AbortAck>;
}
