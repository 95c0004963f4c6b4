use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{ProviderError, ProviderTaskStatus, VideoProvider};
use crate::utils::auth::create_provider_token;

const PROVIDER: &str = "KLING";
const MODEL_NAME: &str = "kling-v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Every KLING response is wrapped in `{code, message, data}`
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct SubmitData {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct TaskData {
    task_status: Option<String>,
    task_status_msg: Option<String>,
    // Sent as a number or a numeric string, and not by every API version
    task_progress: Option<serde_json::Value>,
    task_result: Option<TaskResult>,
    // Older payloads list outputs under `works`
    #[serde(default)]
    works: Vec<VideoAsset>,
}

#[derive(Debug, Deserialize)]
struct TaskResult {
    #[serde(default)]
    videos: Vec<VideoAsset>,
}

#[derive(Debug, Deserialize)]
struct VideoAsset {
    url: Option<String>,
}

/// Client for the KLING image-to-video task API
pub struct KlingClient {
    client: Client,
    access_key: String,
    secret_key: String,
    base_url: String,
}

impl KlingClient {
    pub fn new(client: Client, access_key: String, secret_key: String, base_url: String) -> Self {
        Self {
            client,
            access_key,
            secret_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Attach a freshly minted bearer token; tokens are never cached
    fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, ProviderError> {
        let token = create_provider_token(&self.access_key, &self.secret_key, Utc::now())
            .map_err(|source| ProviderError::Token {
                provider: PROVIDER,
                source,
            })?;

        Ok(request.bearer_auth(token))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ProviderError> {
        let response = self
            .authorize(request)?
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|source| ProviderError::Request {
                provider: PROVIDER,
                source,
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|source| ProviderError::Request {
                provider: PROVIDER,
                source,
            })?;

        if !status.is_success() {
            log::error!("{} API HTTP error: status {}, body: {}", PROVIDER, status, text);
            return Err(ProviderError::Http {
                provider: PROVIDER,
                status: status.as_u16(),
                body: text,
            });
        }

        let envelope: Envelope<T> =
            serde_json::from_str(&text).map_err(|e| ProviderError::Malformed {
                provider: PROVIDER,
                detail: e.to_string(),
            })?;

        open_envelope(envelope)
    }
}

#[async_trait]
impl VideoProvider for KlingClient {
    async fn submit(
        &self,
        source_image_url: &str,
        motion_prompt: &str,
        duration: i32,
    ) -> Result<String, ProviderError> {
        let request = self
            .client
            .post(format!("{}/videos/image2video", self.base_url))
            .json(&json!({
                "model": MODEL_NAME,
                "image": image_payload(source_image_url),
                "prompt": motion_prompt,
                "duration": duration.to_string(),
                "aspect_ratio": "16:9",
                "cfg_scale": 0.5,
                "mode": "std",
            }));

        let data: SubmitData = self.send(request).await?;
        log::info!("{} accepted video task {}", PROVIDER, data.task_id);

        Ok(data.task_id)
    }

    async fn status(&self, task_id: &str) -> Result<ProviderTaskStatus, ProviderError> {
        let request = self
            .client
            .get(format!("{}/videos/image2video/{}", self.base_url, task_id));

        let data: TaskData = self.send(request).await?;

        Ok(task_status_from(task_id, data))
    }
}

fn open_envelope<T>(envelope: Envelope<T>) -> Result<T, ProviderError> {
    if envelope.code != 0 {
        return Err(ProviderError::Rejected {
            provider: PROVIDER,
            code: envelope.code,
            message: envelope
                .message
                .unwrap_or_else(|| "Unknown error".to_string()),
        });
    }

    envelope.data.ok_or_else(|| ProviderError::Malformed {
        provider: PROVIDER,
        detail: "Response has no data".to_string(),
    })
}

fn task_status_from(task_id: &str, data: TaskData) -> ProviderTaskStatus {
    let video_url = data
        .task_result
        .into_iter()
        .flat_map(|result| result.videos)
        .chain(data.works)
        .find_map(|asset| asset.url);

    ProviderTaskStatus {
        task_id: task_id.to_string(),
        // A missing status is treated as still running
        status: data.task_status.unwrap_or_else(|| "processing".to_string()),
        status_message: data.task_status_msg,
        progress: data.task_progress.as_ref().and_then(progress_percent),
        video_url,
    }
}

fn progress_percent(value: &serde_json::Value) -> Option<i32> {
    let percent = match value {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().trim_end_matches('%').parse().ok()?,
        _ => return None,
    };
    Some(percent.clamp(0.0, 100.0).round() as i32)
}

/// Data URLs are sent as their bare base64 payload; anything else is passed through
fn image_payload(image_url: &str) -> &str {
    if image_url.starts_with("data:") {
        image_url
            .split_once(',')
            .map(|(_, payload)| payload)
            .unwrap_or(image_url)
    } else {
        image_url
    }
}
