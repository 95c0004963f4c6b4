pub mod kling;
pub mod openai;

pub use kling::KlingClient;
pub use openai::OpenAiClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Errors raised by the generation provider clients
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout)
    #[error("{provider} request failed: {source}")]
    Request {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The provider answered with a non-2xx status
    #[error("{provider} API error ({status}): {body}")]
    Http {
        provider: &'static str,
        status: u16,
        body: String,
    },

    /// The provider answered 2xx but reported a non-zero business code
    #[error("{provider} API error: {message}")]
    Rejected {
        provider: &'static str,
        code: i64,
        message: String,
    },

    /// The payload did not have the expected shape
    #[error("Malformed {provider} response: {detail}")]
    Malformed {
        provider: &'static str,
        detail: String,
    },

    #[error("Failed to sign {provider} request token: {source}")]
    Token {
        provider: &'static str,
        #[source]
        source: jsonwebtoken::errors::Error,
    },
}

/// Structured description of an analysed image
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageAnalysis {
    pub yaml: String,
    pub preview: ScenePreview,
}

/// Short summary derived from a YAML scene description
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenePreview {
    pub description: String,
    pub main_subjects: Vec<String>,
    pub mood: String,
}

/// Raw state of a task on the video provider, in the provider's own vocabulary
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderTaskStatus {
    pub task_id: String,
    pub status: String,
    pub status_message: Option<String>,
    /// Percentage reported by the provider, when it reports one
    pub progress: Option<i32>,
    pub video_url: Option<String>,
}

/// Single-shot image generation, vision analysis and prompt rewriting
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Generate one image and return its URL (or a data URL)
    async fn generate(&self, prompt: &str, size: &str) -> Result<String, ProviderError>;

    /// Describe an image as a YAML scene plus a short preview
    async fn analyze(&self, image_url: &str) -> Result<ImageAnalysis, ProviderError>;

    /// Turn a YAML scene description into a natural-language prompt
    async fn to_prompt(&self, yaml: &str) -> Result<String, ProviderError>;
}

/// Asynchronous video generation on the provider's own infrastructure
#[async_trait]
pub trait VideoProvider: Send + Sync {
    /// Submit a generation task and return the provider's task id
    async fn submit(
        &self,
        source_image_url: &str,
        motion_prompt: &str,
        duration: i32,
    ) -> Result<String, ProviderError>;

    /// Query the current state of a submitted task
    async fn status(&self, task_id: &str) -> Result<ProviderTaskStatus, ProviderError>;
}
