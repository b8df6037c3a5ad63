use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use avatar_contracts::pricing::TokenUsage;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};

use super::http::{api_base_from_env, first_non_empty_env, response_json_or_error, value_as_u64};
use super::media::{prepare_upload_image, UPLOAD_MAX_DIM};
use super::{Backend, GenerateRequest, GeneratedImage};

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub api_key: Option<String>,
    pub api_base: String,
    pub image_model: String,
    pub text_model: String,
    pub timeout: Duration,
    pub max_reference_images: usize,
}

impl Default for GeminiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            image_model: "gemini-2.5-flash-image".to_string(),
            text_model: "gemini-2.5-flash".to_string(),
            timeout: Duration::from_secs(120),
            max_reference_images: 3,
        }
    }
}

impl GeminiSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: first_non_empty_env(&["GEMINI_API_KEY", "GOOGLE_API_KEY"]),
            api_base: api_base_from_env(&["GEMINI_API_BASE"], DEFAULT_API_BASE),
            image_model: first_non_empty_env(&["AVATAR_GEMINI_IMAGE_MODEL"])
                .unwrap_or(defaults.image_model),
            text_model: first_non_empty_env(&["AVATAR_GEMINI_TEXT_MODEL"])
                .unwrap_or(defaults.text_model),
            ..defaults
        }
    }
}

pub struct GeminiBackend {
    settings: GeminiSettings,
    http: HttpClient,
}

impl GeminiBackend {
    pub fn new(settings: GeminiSettings) -> Self {
        Self {
            settings,
            http: HttpClient::new(),
        }
    }

    fn api_key(&self) -> Result<&str> {
        self.settings
            .api_key
            .as_deref()
            .context("GEMINI_API_KEY (or GOOGLE_API_KEY) not set")
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.settings.api_base, model_path)
    }

    fn post(&self, model: &str, payload: &Value) -> Result<(u16, Value)> {
        let api_key = self.api_key()?;
        let endpoint = self.endpoint_for_model(model);
        let response = self
            .http
            .post(&endpoint)
            .header("x-goog-api-key", api_key)
            .timeout(self.settings.timeout)
            .json(payload)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        response_json_or_error("Gemini", response)
    }

    fn text_call(&self, parts: Vec<Value>) -> Result<String> {
        let payload = json!({
            "contents": [{ "role": "user", "parts": parts }],
        });
        let (_, response) = self.post(&self.settings.text_model, &payload)?;
        let text = extract_text(&response);
        if text.trim().is_empty() {
            bail!("Gemini returned no text");
        }
        Ok(text)
    }
}

impl Backend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    fn max_reference_images(&self) -> usize {
        self.settings.max_reference_images
    }

    fn generate(&self, request: &GenerateRequest) -> Result<GeneratedImage> {
        let mut parts = image_parts(&request.reference_images)?;
        parts.push(json!({ "text": request.prompt }));
        let payload = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": { "responseModalities": ["IMAGE", "TEXT"] },
        });

        let (status_code, response) = self.post(&self.settings.image_model, &payload)?;
        let Some((bytes, mime_type)) = extract_first_image(&response)? else {
            bail!("Gemini response returned no image");
        };

        let mut metadata = Map::new();
        metadata.insert("status_code".to_string(), json!(status_code));
        metadata.insert("model".to_string(), json!(self.settings.image_model));
        for key in ["modelVersion", "responseId", "usageMetadata"] {
            if let Some(value) = response.get(key) {
                metadata.insert(key.to_string(), value.clone());
            }
        }

        Ok(GeneratedImage {
            bytes,
            mime_type,
            usage: extract_usage(&response),
            response: metadata,
        })
    }

    fn analyze(&self, instruction: &str, images: &[PathBuf]) -> Result<String> {
        let mut parts = image_parts(images)?;
        parts.push(json!({ "text": instruction }));
        self.text_call(parts)
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        self.text_call(vec![json!({ "text": prompt })])
    }
}

fn image_parts(paths: &[PathBuf]) -> Result<Vec<Value>> {
    paths
        .iter()
        .map(|path| {
            let (bytes, mime) = prepare_upload_image(path, UPLOAD_MAX_DIM)?;
            Ok(json!({
                "inlineData": {
                    "mimeType": mime,
                    "data": BASE64.encode(bytes),
                }
            }))
        })
        .collect()
}

fn candidate_parts(response: &Value) -> Vec<Value> {
    response
        .get("candidates")
        .and_then(Value::as_array)
        .map(|candidates| {
            candidates
                .iter()
                .filter_map(|candidate| candidate.pointer("/content/parts"))
                .filter_map(Value::as_array)
                .flatten()
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

fn extract_first_image(response: &Value) -> Result<Option<(Vec<u8>, Option<String>)>> {
    for part in candidate_parts(response) {
        let Some(inline) = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(Value::as_object)
        else {
            continue;
        };
        let data = inline
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        let bytes = BASE64
            .decode(data.as_bytes())
            .context("Gemini image base64 decode failed")?;
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .map(str::to_string);
        return Ok(Some((bytes, mime_type)));
    }
    Ok(None)
}

fn extract_text(response: &Value) -> String {
    candidate_parts(response)
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .collect::<Vec<&str>>()
        .join("\n")
}

fn extract_usage(response: &Value) -> Option<TokenUsage> {
    let usage = response.get("usageMetadata")?;
    let parsed = TokenUsage {
        input_text_tokens: value_as_u64(usage.get("promptTokenCount")),
        input_image_tokens: 0,
        output_tokens: value_as_u64(usage.get("candidatesTokenCount")),
        estimated: false,
    };
    (!parsed.is_empty()).then_some(parsed)
}
