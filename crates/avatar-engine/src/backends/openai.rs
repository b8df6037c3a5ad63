use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use avatar_contracts::pricing::TokenUsage;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};

use super::http::{api_base_from_env, first_non_empty_env, response_json_or_error, value_as_u64};
use super::media::{image_data_url, prepare_upload_image, UPLOAD_MAX_DIM};
use super::{Backend, GenerateRequest, GeneratedImage};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub api_key: Option<String>,
    pub api_base: String,
    pub image_model: String,
    pub text_model: String,
    pub size: String,
    pub timeout: Duration,
    pub max_reference_images: usize,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            image_model: "gpt-image-1".to_string(),
            text_model: "gpt-4o-mini".to_string(),
            size: "1024x1024".to_string(),
            timeout: Duration::from_secs(180),
            max_reference_images: 10,
        }
    }
}

impl OpenAiSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: first_non_empty_env(&["OPENAI_API_KEY", "OPENAI_API_KEY_BACKUP"]),
            api_base: api_base_from_env(&["OPENAI_API_BASE", "OPENAI_BASE_URL"], DEFAULT_API_BASE),
            image_model: first_non_empty_env(&["AVATAR_OPENAI_IMAGE_MODEL"])
                .unwrap_or(defaults.image_model),
            text_model: first_non_empty_env(&["AVATAR_OPENAI_TEXT_MODEL"])
                .unwrap_or(defaults.text_model),
            ..defaults
        }
    }
}

pub struct OpenAiBackend {
    settings: OpenAiSettings,
    http: HttpClient,
}

impl OpenAiBackend {
    pub fn new(settings: OpenAiSettings) -> Self {
        Self {
            settings,
            http: HttpClient::new(),
        }
    }

    fn api_key(&self) -> Result<&str> {
        self.settings
            .api_key
            .as_deref()
            .context("OPENAI_API_KEY not set")
    }

    fn generate_images(&self, request: &GenerateRequest) -> Result<(u16, Value)> {
        let api_key = self.api_key()?;
        let endpoint = format!("{}/images/generations", self.settings.api_base);
        let payload = json!({
            "model": self.settings.image_model,
            "prompt": request.prompt,
            "n": 1,
            "size": self.settings.size,
        });
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .timeout(self.settings.timeout)
            .json(&payload)
            .send()
            .with_context(|| format!("OpenAI request failed ({endpoint})"))?;
        response_json_or_error("OpenAI", response)
    }

    /// Reference-conditioned generation goes through the edits endpoint.
    fn edit_images(&self, request: &GenerateRequest) -> Result<(u16, Value)> {
        let api_key = self.api_key()?;
        let endpoint = format!("{}/images/edits", self.settings.api_base);
        let mut form = MultipartForm::new()
            .text("model", self.settings.image_model.clone())
            .text("prompt", request.prompt.clone())
            .text("n", "1")
            .text("size", self.settings.size.clone());
        for (idx, path) in request.reference_images.iter().enumerate() {
            let (bytes, mime) = prepare_upload_image(path, UPLOAD_MAX_DIM)?;
            let ext = if mime == "image/jpeg" { "jpg" } else { "png" };
            let part = MultipartPart::bytes(bytes)
                .file_name(format!("reference-{idx:02}.{ext}"))
                .mime_str(&mime)
                .context("invalid reference image mime type")?;
            form = form.part("image[]", part);
        }
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .timeout(self.settings.timeout)
            .multipart(form)
            .send()
            .with_context(|| format!("OpenAI request failed ({endpoint})"))?;
        response_json_or_error("OpenAI", response)
    }

    fn responses_call(&self, content: Vec<Value>, max_output_tokens: u64) -> Result<String> {
        let api_key = self.api_key()?;
        let endpoint = format!("{}/responses", self.settings.api_base);
        let payload = json!({
            "model": self.settings.text_model,
            "input": [{ "role": "user", "content": content }],
            "max_output_tokens": max_output_tokens,
        });
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .timeout(self.settings.timeout)
            .json(&payload)
            .send()
            .with_context(|| format!("OpenAI request failed ({endpoint})"))?;
        let (_, parsed) = response_json_or_error("OpenAI", response)?;
        let text = extract_output_text(&parsed);
        if text.trim().is_empty() {
            bail!("OpenAI returned no text");
        }
        Ok(text)
    }
}

impl Backend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    fn max_reference_images(&self) -> usize {
        self.settings.max_reference_images
    }

    fn generate(&self, request: &GenerateRequest) -> Result<GeneratedImage> {
        let (status_code, response) = if request.reference_images.is_empty() {
            self.generate_images(request)?
        } else {
            self.edit_images(request)?
        };

        let encoded = response
            .get("data")
            .and_then(Value::as_array)
            .and_then(|rows| {
                rows.iter()
                    .filter_map(|row| row.get("b64_json").and_then(Value::as_str))
                    .find(|data| !data.is_empty())
            })
            .context("OpenAI response returned no images")?;
        let bytes = BASE64
            .decode(encoded.as_bytes())
            .context("OpenAI image base64 decode failed")?;

        let mut metadata = Map::new();
        metadata.insert("status_code".to_string(), json!(status_code));
        metadata.insert("model".to_string(), json!(self.settings.image_model));
        for key in ["created", "usage", "output_format", "quality", "size"] {
            if let Some(value) = response.get(key) {
                metadata.insert(key.to_string(), value.clone());
            }
        }
        let mime_type = response
            .get("output_format")
            .and_then(Value::as_str)
            .map(|format| format!("image/{}", format.trim().to_ascii_lowercase()));

        Ok(GeneratedImage {
            bytes,
            mime_type,
            usage: extract_usage(&response),
            response: metadata,
        })
    }

    fn analyze(&self, instruction: &str, images: &[PathBuf]) -> Result<String> {
        let mut content = vec![json!({ "type": "input_text", "text": instruction })];
        for path in images {
            content.push(json!({ "type": "input_image", "image_url": image_data_url(path)? }));
        }
        self.responses_call(content, 1200)
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        self.responses_call(vec![json!({ "type": "input_text", "text": prompt })], 1200)
    }
}

fn extract_usage(response: &Value) -> Option<TokenUsage> {
    let usage = response.get("usage")?;
    let details = usage.get("input_tokens_details");
    let mut parsed = TokenUsage {
        input_text_tokens: value_as_u64(details.and_then(|row| row.get("text_tokens"))),
        input_image_tokens: value_as_u64(details.and_then(|row| row.get("image_tokens"))),
        output_tokens: value_as_u64(usage.get("output_tokens")),
        estimated: false,
    };
    if details.is_none() {
        parsed.input_text_tokens = value_as_u64(usage.get("input_tokens"));
    }
    (!parsed.is_empty()).then_some(parsed)
}

fn extract_output_text(response: &Value) -> String {
    if let Some(text) = response.get("output_text").and_then(Value::as_str) {
        if !text.trim().is_empty() {
            return text.trim().to_string();
        }
    }

    let mut parts: Vec<String> = Vec::new();
    let rows = response
        .get("output")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for row in rows {
        let content = row
            .get("content")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for item in content {
            let kind = item.get("type").and_then(Value::as_str).unwrap_or_default();
            if !matches!(kind, "output_text" | "text") {
                continue;
            }
            if let Some(text) = item.get("text").and_then(Value::as_str) {
                if !text.trim().is_empty() {
                    parts.push(text.trim().to_string());
                }
            }
        }
    }
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{extract_output_text, extract_usage, OpenAiBackend, OpenAiSettings};
    use crate::backends::Backend;

    #[test]
    fn usage_splits_text_and_image_input_tokens() {
        let response = json!({
            "usage": {
                "input_tokens": 1500,
                "input_tokens_details": { "text_tokens": 300, "image_tokens": 1200 },
                "output_tokens": 4160
            }
        });
        let usage = extract_usage(&response).expect("usage");
        assert_eq!(usage.input_text_tokens, 300);
        assert_eq!(usage.input_image_tokens, 1200);
        assert_eq!(usage.output_tokens, 4160);
    }

    #[test]
    fn usage_without_details_counts_all_input_as_text() {
        let usage = extract_usage(&json!({"usage": {"input_tokens": 50, "output_tokens": 10}}))
            .expect("usage");
        assert_eq!(usage.input_text_tokens, 50);
        assert_eq!(usage.input_image_tokens, 0);
        assert!(extract_usage(&json!({})).is_none());
    }

    #[test]
    fn output_text_prefers_top_level_field() {
        assert_eq!(extract_output_text(&json!({"output_text": " hi "})), "hi");
        let nested = json!({
            "output": [
                {"type": "reasoning", "content": []},
                {"type": "message", "content": [
                    {"type": "output_text", "text": "first"},
                    {"type": "refusal", "text": "nope"},
                    {"type": "output_text", "text": "second"}
                ]}
            ]
        });
        assert_eq!(extract_output_text(&nested), "first\nsecond");
    }

    #[test]
    fn missing_key_is_reported() {
        let backend = OpenAiBackend::new(OpenAiSettings::default());
        let err = backend
            .complete("ping")
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();
        assert!(err.contains("OPENAI_API_KEY"));
    }
}
