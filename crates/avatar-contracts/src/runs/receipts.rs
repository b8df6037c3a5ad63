use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::artifacts::Artifact;
use crate::pricing::CostEstimate;

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

/// Audit record written next to every freshly generated artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationReceipt {
    pub schema_version: u64,
    pub concept: String,
    pub backend: String,
    pub storage_name: String,
    pub prompt: String,
    pub prompt_sha256: String,
    pub reference_images: Vec<String>,
    pub matched_names: Vec<String>,
    pub cost: CostEstimate,
    pub thinking_s: f64,
    pub generation_s: f64,
    #[serde(default)]
    pub backend_response: Map<String, Value>,
    pub created_at: String,
}

pub struct ReceiptInput<'a> {
    pub concept: &'a str,
    pub backend: &'a str,
    pub artifact: &'a Artifact,
    pub prompt: &'a str,
    pub reference_images: &'a [PathBuf],
    pub matched_names: &'a [String],
    pub cost: &'a CostEstimate,
    pub thinking_s: f64,
    pub generation_s: f64,
    pub backend_response: &'a Map<String, Value>,
}

pub fn build_receipt(input: ReceiptInput<'_>) -> GenerationReceipt {
    let backend_response = match sanitize_payload(&Value::Object(input.backend_response.clone())) {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    GenerationReceipt {
        schema_version: RECEIPT_SCHEMA_VERSION,
        concept: input.concept.to_string(),
        backend: input.backend.to_string(),
        storage_name: input.artifact.storage_name(),
        prompt: input.prompt.to_string(),
        prompt_sha256: prompt_fingerprint(input.prompt),
        reference_images: input
            .reference_images
            .iter()
            .map(|path| path.to_string_lossy().to_string())
            .collect(),
        matched_names: input.matched_names.to_vec(),
        cost: *input.cost,
        thinking_s: input.thinking_s,
        generation_s: input.generation_s,
        backend_response,
        created_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, false),
    }
}

/// `<receipts_dir>/<storage-stem>.json`, kept outside the image collections.
pub fn receipt_path(receipts_dir: &Path, artifact: &Artifact) -> Option<PathBuf> {
    let stem = artifact.path.file_stem()?;
    Some(receipts_dir.join(format!("{}.json", stem.to_string_lossy())))
}

pub fn write_receipt(path: &Path, receipt: &GenerationReceipt) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(receipt)?)?;
    Ok(())
}

/// SHA-256 hex digest of the exact instruction text sent to a backend.
pub fn prompt_fingerprint(prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hex::encode(hasher.finalize())
}

fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if matches!(
                    lowered.as_str(),
                    "b64_json" | "image" | "image_bytes" | "data" | "inlinedata" | "inline_data"
                ) {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::{json, Map, Value};

    use crate::artifacts::{Artifact, ArtifactSource};
    use crate::pricing::CostAccountant;

    use super::{
        build_receipt, prompt_fingerprint, receipt_path, write_receipt, GenerationReceipt,
        ReceiptInput, RECEIPT_SCHEMA_VERSION,
    };

    #[test]
    fn receipt_records_prompt_fingerprint_and_strips_image_payloads() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let artifact = Artifact {
            name: "rust".to_string(),
            path: temp.path().join("generated").join("rust_1712345678901.png"),
            source: ArtifactSource::Generated,
            timestamp_ms: Some(1_712_345_678_901),
        };
        let cost = CostAccountant::with_defaults().generation_cost("gemini", None);
        let mut response = Map::new();
        response.insert("status_code".to_string(), json!(200));
        response.insert("candidates".to_string(), json!([{"inlineData": {"data": "AAAA"}}]));

        let receipt = build_receipt(ReceiptInput {
            concept: "Rust",
            backend: "gemini",
            artifact: &artifact,
            prompt: "render a crab robot",
            reference_images: &[PathBuf::from("/refs/c.png")],
            matched_names: &["c".to_string()],
            cost: &cost,
            thinking_s: 1.5,
            generation_s: 9.0,
            backend_response: &response,
        });

        assert_eq!(receipt.schema_version, RECEIPT_SCHEMA_VERSION);
        assert_eq!(receipt.storage_name, "rust_1712345678901.png");
        assert_eq!(receipt.prompt_sha256, prompt_fingerprint("render a crab robot"));
        assert_eq!(
            receipt.backend_response["candidates"][0]["inlineData"],
            json!("<omitted>")
        );

        let receipts_dir = temp.path().join("runs").join("receipts");
        let path = receipt_path(&receipts_dir, &artifact).unwrap_or_default();
        assert!(path.ends_with("runs/receipts/rust_1712345678901.json"));
        write_receipt(&path, &receipt)?;
        let parsed: GenerationReceipt = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(parsed.prompt, receipt.prompt);
        assert_eq!(parsed.matched_names, vec!["c".to_string()]);
        assert_eq!(parsed.reference_images, vec!["/refs/c.png".to_string()]);
        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(raw["cost"]["basis"], json!("assumed"));
        Ok(())
    }

    #[test]
    fn fingerprint_is_stable_hex() {
        let first = prompt_fingerprint("same text");
        assert_eq!(first, prompt_fingerprint("same text"));
        assert_ne!(first, prompt_fingerprint("same text."));
        assert_eq!(first.len(), 64);
    }
}
