//! HTTP implementations of the collaborator traits.
//!
//! Both clients send `Authorization: Bearer <token>` when a token is
//! configured. Non-2xx responses are turned into [`ApiError::Http`] carrying
//! the server's `message` field, or a per-call fallback text.

use crate::clients::base::{ApiError, ByteStream, JobTrigger, RunTracker};
use async_trait::async_trait;
use bytes::Bytes;
use er_protocol::api_models::{
    ApiEnvelope, ApiErrorBody, CompleteRunRequest, ExecutionDetails, StartRunRequest,
    StartRunResponse, StepLogBatch, StepLogEntry, StepStatusUpdate,
};
use er_protocol::config_models::ApiSettings;
use er_protocol::stage_models::{StageId, StageStatus};
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tokio_stream::StreamExt;

fn map_reqwest_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        return ApiError::Transport(format!("request timed out: {err}"));
    }
    ApiError::Transport(err.to_string())
}

fn trim_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Turns a non-2xx response into an error, preferring the server's message.
async fn error_from_response(response: reqwest::Response, fallback: &str) -> ApiError {
    let status = response.status().as_u16();
    let message = response
        .bytes()
        .await
        .ok()
        .and_then(|body| serde_json::from_slice::<ApiErrorBody>(&body).ok())
        .and_then(|body| body.message)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string());
    ApiError::Http { status, message }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice::<ApiEnvelope<T>>(body)
        .map(ApiEnvelope::into_inner)
        .map_err(|err| ApiError::Decode(err.to_string()))
}

/// Run Tracking Service over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpRunTracker {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRunTracker {
    pub fn new(settings: &ApiSettings) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(map_reqwest_error)?;

        Ok(Self {
            client,
            base_url: trim_base_url(&settings.base_url),
            token: settings.token.clone(),
        })
    }

    async fn send<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        fallback: &str,
    ) -> Result<Bytes, ApiError> {
        let url = format!("{}{path}", self.base_url);
        let mut request = self.client.request(method.clone(), &url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            let json = serde_json::to_vec(body).map_err(|err| ApiError::Decode(err.to_string()))?;
            request = request.header(CONTENT_TYPE, "application/json").body(json);
        }

        tracing::debug!(%method, %url, "run tracking request");
        let response = request.send().await.map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            return Err(error_from_response(response, fallback).await);
        }
        response.bytes().await.map_err(map_reqwest_error)
    }
}

#[async_trait]
impl RunTracker for HttpRunTracker {
    async fn start_run(&self, request: &StartRunRequest) -> Result<String, ApiError> {
        let body = self
            .send(Method::POST, "/runs/start", Some(request), "Failed to start run")
            .await?;
        let response: StartRunResponse = decode(&body)?;
        if response.run_id.trim().is_empty() {
            return Err(ApiError::InvalidResponse("empty run id".to_string()));
        }
        Ok(response.run_id)
    }

    async fn execution_details(&self, run_id: &str) -> Result<ExecutionDetails, ApiError> {
        let body = self
            .send::<()>(
                Method::GET,
                &format!("/runs/{run_id}/execution"),
                None,
                "Failed to fetch execution details",
            )
            .await?;
        decode(&body)
    }

    async fn update_step_status(
        &self,
        run_id: &str,
        step_id: StageId,
        status: StageStatus,
    ) -> Result<(), ApiError> {
        self.send(
            Method::PUT,
            &format!("/runs/{run_id}/steps/{step_id}"),
            Some(&StepStatusUpdate { status }),
            "Failed to update step status",
        )
        .await?;
        Ok(())
    }

    async fn save_logs(
        &self,
        run_id: &str,
        step_id: StageId,
        logs: &[StepLogEntry],
    ) -> Result<(), ApiError> {
        let batch = StepLogBatch {
            logs: logs.to_vec(),
        };
        self.send(
            Method::POST,
            &format!("/runs/{run_id}/steps/{step_id}/logs"),
            Some(&batch),
            "Failed to save logs",
        )
        .await?;
        Ok(())
    }

    async fn retry_step(&self, run_id: &str, step_id: StageId) -> Result<(), ApiError> {
        self.send::<()>(
            Method::POST,
            &format!("/runs/{run_id}/steps/{step_id}/retry"),
            None,
            "Failed to retry step",
        )
        .await?;
        Ok(())
    }

    async fn complete_run(&self, run_id: &str, request: &CompleteRunRequest) -> Result<(), ApiError> {
        self.send(
            Method::PUT,
            &format!("/runs/{run_id}/complete"),
            Some(request),
            "Failed to complete pipeline",
        )
        .await?;
        Ok(())
    }
}

/// Job Trigger Service over HTTP with a streamed response body.
///
/// Only the connect timeout applies; silence on an open stream is bounded
/// by the stage runner's idle timeout.
#[derive(Debug, Clone)]
pub struct HttpJobTrigger {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpJobTrigger {
    pub fn new(settings: &ApiSettings) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .build()
            .map_err(map_reqwest_error)?;

        Ok(Self {
            client,
            base_url: trim_base_url(&settings.base_url),
            token: settings.token.clone(),
        })
    }
}

#[async_trait]
impl JobTrigger for HttpJobTrigger {
    async fn trigger(&self, job_id: &str) -> Result<ByteStream, ApiError> {
        let url = format!("{}/dags/run/{job_id}", self.base_url);
        let mut request = self.client.post(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        tracing::debug!(%url, "triggering job");
        let response = request.send().await.map_err(map_reqwest_error)?;
        if !response.status().is_success() {
            return Err(error_from_response(response, "Failed to trigger DAG").await);
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(map_reqwest_error));
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_accepts_both_shapes() {
        let bare: StartRunResponse = decode(br#"{"run_id":"RUN-1"}"#).unwrap();
        assert_eq!(bare.run_id, "RUN-1");

        let wrapped: StartRunResponse = decode(br#"{"data":{"run_exe_id":"RUN-2"}}"#).unwrap();
        assert_eq!(wrapped.run_id, "RUN-2");

        let err = decode::<StartRunResponse>(b"<html>").unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let settings = ApiSettings {
            base_url: "http://localhost:5000/api/v1/".to_string(),
            ..ApiSettings::default()
        };
        let tracker = HttpRunTracker::new(&settings).unwrap();
        assert_eq!(tracker.base_url, "http://localhost:5000/api/v1");
    }
}
