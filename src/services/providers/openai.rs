use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{ImageAnalysis, ImageProvider, ProviderError, ScenePreview};

const PROVIDER: &str = "OpenAI";

const IMAGE_MODEL: &str = "gpt-image-1";
const VISION_MODEL: &str = "gpt-4-vision-preview";
const PROMPT_MODEL: &str = "gpt-3.5-turbo";

const ANALYZE_SYSTEM_PROMPT: &str = r#"You are an expert image analyst. Analyze the provided image and generate a structured YAML description following this exact format:

scene:
  description:
  mood:
  time_of_day:
  weather:

subjects:
  - type:
    description:
    position:
    attributes:
      -

environment:
  setting:
  foreground:
  background:
  lighting:

visual_style:
  art_style:
  color_palette:
  composition:

technical:
  camera_angle:
  focal_length:
  depth_of_field:

Important guidelines:
1. Fill in ALL fields with specific, detailed descriptions in English
2. Use concrete, descriptive terms (avoid vague words)
3. For subjects, list all main elements in the image
4. Be accurate about technical aspects like camera angle and composition
5. Ensure the YAML is valid and properly formatted
6. Do not add any extra fields or explanations outside the YAML"#;

const PROMPT_SYSTEM_PROMPT: &str = "Convert the following YAML description into a natural, flowing image generation prompt. \
The prompt should be detailed but concise, incorporating all the important elements from the YAML. \
Focus on visual elements, style, and composition. Output only the prompt text, nothing else.";

#[derive(Debug, Deserialize)]
struct ImageGenerationResponse {
    #[serde(default)]
    data: Vec<GeneratedImage>,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    url: Option<String>,
    b64_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Client for the image generation, vision and text endpoints
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(client: Client, api_key: String, base_url: String) -> Self {
        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
        timeout: Duration,
    ) -> Result<T, ProviderError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(timeout)
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
            log::error!("{} API error on {}: status {}, body: {}", PROVIDER, path, status, text);
            return Err(ProviderError::Http {
                provider: PROVIDER,
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| ProviderError::Malformed {
            provider: PROVIDER,
            detail: e.to_string(),
        })
    }
}

#[async_trait]
impl ImageProvider for OpenAiClient {
    async fn generate(&self, prompt: &str, size: &str) -> Result<String, ProviderError> {
        log::info!("Requesting image generation ({}, {})", IMAGE_MODEL, size);

        let response: ImageGenerationResponse = self
            .post(
                "/images/generations",
                json!({
                    "model": IMAGE_MODEL,
                    "prompt": prompt,
                    "n": 1,
                    "size": size,
                }),
                Duration::from_secs(60),
            )
            .await?;

        image_url_from_response(response)
    }

    async fn analyze(&self, image_url: &str) -> Result<ImageAnalysis, ProviderError> {
        let response: ChatCompletionResponse = self
            .post(
                "/chat/completions",
                json!({
                    "model": VISION_MODEL,
                    "messages": [
                        { "role": "system", "content": ANALYZE_SYSTEM_PROMPT },
                        {
                            "role": "user",
                            "content": [
                                { "type": "text", "text": "Analyze this image and generate the YAML description:" },
                                { "type": "image_url", "image_url": { "url": image_url, "detail": "high" } }
                            ]
                        }
                    ],
                    "max_tokens": 1000,
                    "temperature": 0.3,
                }),
                Duration::from_secs(60),
            )
            .await?;

        let yaml = first_message(response)?;
        let preview = extract_preview(&yaml);

        Ok(ImageAnalysis { yaml, preview })
    }

    async fn to_prompt(&self, yaml: &str) -> Result<String, ProviderError> {
        let response: ChatCompletionResponse = self
            .post(
                "/chat/completions",
                json!({
                    "model": PROMPT_MODEL,
                    "messages": [
                        { "role": "system", "content": PROMPT_SYSTEM_PROMPT },
                        { "role": "user", "content": yaml }
                    ],
                    "max_tokens": 300,
                    "temperature": 0.7,
                }),
                Duration::from_secs(30),
            )
            .await?;

        first_message(response)
    }
}

/// Prefer a hosted URL; inline base64 payloads become a PNG data URL
fn image_url_from_response(response: ImageGenerationResponse) -> Result<String, ProviderError> {
    let image = response
        .data
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Malformed {
            provider: PROVIDER,
            detail: "No image data in response".to_string(),
        })?;

    match (image.url, image.b64_json) {
        (Some(url), _) => Ok(url),
        (None, Some(b64)) => Ok(format!("data:image/png;base64,{}", b64)),
        (None, None) => Err(ProviderError::Malformed {
            provider: PROVIDER,
            detail: "Image entry has neither url nor b64_json".to_string(),
        }),
    }
}

fn first_message(response: ChatCompletionResponse) -> Result<String, ProviderError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| ProviderError::Malformed {
            provider: PROVIDER,
            detail: "No message content in response".to_string(),
        })
}

/// Pull a preview out of the YAML scene description without a full YAML parse
pub fn extract_preview(yaml: &str) -> ScenePreview {
    let mut description = String::new();
    let mut mood = String::new();
    let mut main_subjects = Vec::new();

    for line in yaml.lines() {
        if description.is_empty() {
            if let Some((_, value)) = line.split_once("description:") {
                description = value.trim().to_string();
            }
        }
        if mood.is_empty() {
            if let Some((_, value)) = line.split_once("mood:") {
                mood = value.trim().to_string();
            }
        }
        if line.trim_start().starts_with('-') {
            if let Some((_, value)) = line.split_once("type:") {
                let subject = value.trim();
                if !subject.is_empty() {
                    main_subjects.push(subject.to_string());
                }
            }
        }
    }

    if description.is_empty() {
        description = "Image analysis completed".to_string();
    }
    if mood.is_empty() {
        mood = "neutral".to_string();
    }
    if main_subjects.is_empty() {
        main_subjects.push("No specific subjects identified".to_string());
    }

    ScenePreview {
        description,
        main_subjects,
        mood,
    }
}
