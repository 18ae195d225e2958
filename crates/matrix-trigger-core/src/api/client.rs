//! reqwest-backed client for the Bitrise REST API.

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, info};

use super::types::{
    AbortAck, AbortRequest, RemoteBuildSnapshot, SnapshotEnvelope, TriggerParams, TriggeredBuild,
};
use super::BuildApi;
use crate::config::ClientConfig;
use crate::error::{ApiError, ApiResult};

/// HTTP client for trigger, status and abort calls.
#[derive(Debug, Clone)]
pub struct BitriseClient {
    config: ClientConfig,
    http: reqwest::Client,
}

impl BitriseClient {
    /// Create a new client.
    pub fn new(config: ClientConfig) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(BitriseClient { config, http })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn trigger_url(&self, app_slug: &str) -> String {
        format!("{}/app/{}/build/start.json", self.config.app_url, app_slug)
    }

    fn build_api_url(&self, app_slug: &str, build_slug: &str) -> String {
        format!("{}/apps/{}/builds/{}", self.config.api_url, app_slug, build_slug)
    }

    fn auth_header(&self) -> String {
        format!("token {}", self.config.api_token)
    }
}

#[async_trait]
impl BuildApi for BitriseClient {
    async fn trigger_build(
        &self,
        app_slug: &str,
        params: &TriggerParams,
    ) -> ApiResult<TriggeredBuild> {
        let url = self.trigger_url(app_slug);
        debug!(url = %url, params = %params.redacted_json(), "sending trigger request");

        let response = self.http.post(&url).json(params).send().await?;
        let (status, body) = read_body(response, StatusCode::CREATED).await?;

        let triggered = interpret_trigger(status, &body)?;
        info!(
            app_slug = %triggered.slug,
            build_slug = %triggered.build_slug,
            "trigger accepted"
        );
        Ok(triggered)
    }

    async fn build_status(
        &self,
        app_slug: &str,
        build_slug: &str,
    ) -> ApiResult<RemoteBuildSnapshot> {
        let url = self.build_api_url(app_slug, build_slug);

        let response = self
            .http
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, self.auth_header())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await?;
        let (status, body) = read_body(response, StatusCode::OK).await?;

        expect_ok(status, &body)?;
        let envelope: SnapshotEnvelope = decode(&body)?;
        Ok(envelope.data)
    }

    async fn abort_build(
        &self,
        app_slug: &str,
        build_slug: &str,
        request: &AbortRequest,
    ) -> ApiResult<AbortAck> {
        let url = format!("{}/abort", self.build_api_url(app_slug, build_slug));

        let response = self
            .http
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, self.auth_header())
            .json(request)
            .send()
            .await?;
        let (status, body) = read_body(response, StatusCode::OK).await?;

        expect_ok(status, &body)?;
        decode(&body)
    }
}

/// Classify a trigger response: 201 and `"ok"` or an error with the raw body.
pub(crate) fn interpret_trigger(status: StatusCode, body: &str) -> ApiResult<TriggeredBuild> {
    if status != StatusCode::CREATED {
        return Err(ApiError::UnexpectedStatus {
            status: status.to_string(),
            body: body.to_string(),
        });
    }

    let triggered: TriggeredBuild = decode(body)?;
    if !triggered.is_ok() {
        return Err(ApiError::TriggerRejected {
            status: triggered.status,
            body: body.to_string(),
        });
    }

    Ok(triggered)
}

/// Status and body of a response.
///
/// When the code is not `expected`, a body read failure is folded into the
/// body text so the caller still reports the status line.
async fn read_body(
    response: reqwest::Response,
    expected: StatusCode,
) -> ApiResult<(StatusCode, String)> {
    let status = response.status();
    match response.text().await {
        Ok(body) => Ok((status, body)),
        Err(err) if status != expected => {
            Ok((status, format!("failed to read response body: {err}")))
        }
        Err(err) => Err(err.into()),
    }
}

fn expect_ok(status: StatusCode, body: &str) -> ApiResult<()> {
    if status != StatusCode::OK {
        return Err(ApiError::UnexpectedStatus {
            status: status.to_string(),
            body: body.to_string(),
        });
    }
    Ok(())
}

fn decode<T: serde::de::DeserializeOwned>(body: &str) -> ApiResult<T> {
    serde_json::from_str(body).map_err(|err| ApiError::Decode {
        detail: err.to_string(),
        body: body.to_string(),
    })
}
