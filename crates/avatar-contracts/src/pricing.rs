use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const DEFAULT_PRICING_TABLES_JSON: &str = include_str!("../resources/default_pricing.json");

/// Charged for a fresh generation on a backend with no usable pricing row.
pub const UNPRICED_IMAGE_COST_USD: f64 = 0.04;

const TOKENS_PER_MILLION: f64 = 1_000_000.0;

/// Unit counts reported by (or assumed for) one backend call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_text_tokens: u64,
    pub input_image_tokens: u64,
    pub output_tokens: u64,
    /// `true` when the counts come from the rate table rather than the backend.
    pub estimated: bool,
}

impl TokenUsage {
    pub fn is_empty(&self) -> bool {
        self.input_text_tokens == 0 && self.input_image_tokens == 0 && self.output_tokens == 0
    }

    pub fn total(&self) -> u64 {
        self.input_text_tokens + self.input_image_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostBasis {
    Cached,
    Reported,
    Assumed,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub usd: f64,
    pub usage: TokenUsage,
    pub basis: CostBasis,
}

impl CostEstimate {
    pub fn cached() -> Self {
        Self {
            usd: 0.0,
            usage: TokenUsage::default(),
            basis: CostBasis::Cached,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PricingRow {
    pub input_text_usd_per_million: Option<f64>,
    pub input_image_usd_per_million: Option<f64>,
    pub output_usd_per_million: Option<f64>,
    pub assumed_input_text_tokens: Option<u64>,
    pub assumed_input_image_tokens: Option<u64>,
    pub assumed_output_tokens: Option<u64>,
    pub flat_usd_per_image: Option<f64>,
    pub completion_input_usd_per_million: Option<f64>,
    pub completion_output_usd_per_million: Option<f64>,
}

impl PricingRow {
    fn assumed_usage(&self) -> TokenUsage {
        TokenUsage {
            input_text_tokens: self.assumed_input_text_tokens.unwrap_or(0),
            input_image_tokens: self.assumed_input_image_tokens.unwrap_or(0),
            output_tokens: self.assumed_output_tokens.unwrap_or(0),
            estimated: true,
        }
    }

    fn price(&self, usage: &TokenUsage) -> f64 {
        let rate = |value: Option<f64>| value.unwrap_or(0.0).max(0.0) / TOKENS_PER_MILLION;
        usage.input_text_tokens as f64 * rate(self.input_text_usd_per_million)
            + usage.input_image_tokens as f64 * rate(self.input_image_usd_per_million)
            + usage.output_tokens as f64 * rate(self.output_usd_per_million)
    }

    fn flat(&self) -> f64 {
        self.flat_usd_per_image
            .filter(|value| *value > 0.0)
            .unwrap_or(UNPRICED_IMAGE_COST_USD)
    }
}

/// Maps per-backend unit counts to a USD estimate using a rate table.
///
/// The table is configuration: built-in defaults, optionally merged
/// field-by-field with an override file.
#[derive(Debug, Clone, Default)]
pub struct CostAccountant {
    rows: BTreeMap<String, PricingRow>,
}

impl CostAccountant {
    pub fn with_defaults() -> Self {
        Self::from_raw_rows(parse_pricing_table_rows(DEFAULT_PRICING_TABLES_JSON))
    }

    /// Defaults merged with `override_path` when it exists and parses.
    pub fn load(override_path: Option<&Path>) -> Self {
        let mut rows = parse_pricing_table_rows(DEFAULT_PRICING_TABLES_JSON);
        if let Some(path) = override_path {
            match std::fs::read_to_string(path) {
                Ok(raw) => merge_pricing_table_rows(&mut rows, &raw),
                Err(err) => tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "pricing override unreadable; using defaults"
                ),
            }
        }
        Self::from_raw_rows(rows)
    }

    fn from_raw_rows(raw: BTreeMap<String, Map<String, Value>>) -> Self {
        let rows = raw
            .into_iter()
            .filter_map(|(backend, row)| {
                match serde_json::from_value::<PricingRow>(Value::Object(row)) {
                    Ok(parsed) => Some((backend, parsed)),
                    Err(err) => {
                        tracing::warn!(
                            backend = %backend,
                            error = %err,
                            "invalid pricing row skipped"
                        );
                        None
                    }
                }
            })
            .collect();
        Self { rows }
    }

    pub fn row(&self, backend: &str) -> Option<&PricingRow> {
        self.rows.get(backend)
    }

    /// Cost of one fresh, successful generation.
    ///
    /// Backends that report nothing are charged the row's assumed counts; a
    /// backend with no row, or whose rates price the call at zero, is charged
    /// a flat estimate. The result is never zero.
    pub fn generation_cost(&self, backend: &str, reported: Option<&TokenUsage>) -> CostEstimate {
        let reported = reported.filter(|usage| !usage.is_empty()).copied();
        let Some(row) = self.rows.get(backend) else {
            return CostEstimate {
                usd: UNPRICED_IMAGE_COST_USD,
                usage: reported.unwrap_or_default(),
                basis: CostBasis::Flat,
            };
        };

        let (usage, basis) = match reported {
            Some(usage) => (usage, CostBasis::Reported),
            None => (row.assumed_usage(), CostBasis::Assumed),
        };
        let usd = row.price(&usage);
        if usd > 0.0 {
            return CostEstimate { usd, usage, basis };
        }
        CostEstimate {
            usd: row.flat(),
            usage,
            basis: CostBasis::Flat,
        }
    }

    /// Cost of a text completion, used by connectivity checks.
    pub fn completion_cost(&self, backend: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        let Some(row) = self.rows.get(backend) else {
            return 0.0;
        };
        let rate = |value: Option<f64>| value.unwrap_or(0.0).max(0.0) / TOKENS_PER_MILLION;
        input_tokens as f64 * rate(row.completion_input_usd_per_million)
            + output_tokens as f64 * rate(row.completion_output_usd_per_million)
    }
}

/// Rough token count for text a backend did not meter: one token per four chars.
pub fn estimate_tokens(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    ((text.chars().count() as f64) / 4.0).ceil() as u64
}

fn parse_pricing_table_rows(raw: &str) -> BTreeMap<String, Map<String, Value>> {
    let mut rows = BTreeMap::new();
    merge_pricing_table_rows(&mut rows, raw);
    rows
}

fn merge_pricing_table_rows(rows: &mut BTreeMap<String, Map<String, Value>>, raw: &str) {
    let Ok(payload) = serde_json::from_str::<Value>(raw) else {
        tracing::warn!("pricing table is not valid JSON; ignored");
        return;
    };
    let Some(table) = payload.as_object() else {
        return;
    };
    for (backend, row_value) in table {
        let Some(row) = row_value.as_object() else {
            continue;
        };
        let entry = rows.entry(backend.to_string()).or_default();
        for (field, field_value) in row {
            entry.insert(field.to_string(), field_value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        estimate_tokens, CostAccountant, CostBasis, CostEstimate, TokenUsage,
        UNPRICED_IMAGE_COST_USD,
    };

    fn close(left: f64, right: f64) -> bool {
        (left - right).abs() < 1e-9
    }

    #[test]
    fn gemini_is_priced_per_million_output_tokens() {
        let accountant = CostAccountant::with_defaults();
        let cost = accountant.generation_cost("gemini", None);
        assert_eq!(cost.basis, CostBasis::Assumed);
        assert!(cost.usage.estimated);
        assert_eq!(cost.usage.output_tokens, 1290);
        assert!(close(cost.usd, 1290.0 * 30.0 / 1_000_000.0));
    }

    #[test]
    fn openai_reported_usage_uses_split_rates() {
        let accountant = CostAccountant::with_defaults();
        let usage = TokenUsage {
            input_text_tokens: 1_000,
            input_image_tokens: 2_000,
            output_tokens: 4_000,
            estimated: false,
        };
        let cost = accountant.generation_cost("openai", Some(&usage));
        assert_eq!(cost.basis, CostBasis::Reported);
        assert!(close(cost.usd, (1_000.0 * 5.0 + 2_000.0 * 10.0 + 4_000.0 * 40.0) / 1e6));
    }

    #[test]
    fn empty_reported_usage_falls_back_to_assumed_counts() {
        let accountant = CostAccountant::with_defaults();
        let cost = accountant.generation_cost("openai", Some(&TokenUsage::default()));
        assert_eq!(cost.basis, CostBasis::Assumed);
        assert!(cost.usd > 0.0);
    }

    #[test]
    fn unknown_backend_is_never_free() {
        let accountant = CostAccountant::with_defaults();
        let cost = accountant.generation_cost("mystery", None);
        assert_eq!(cost.basis, CostBasis::Flat);
        assert!(close(cost.usd, UNPRICED_IMAGE_COST_USD));
    }

    #[test]
    fn zero_rates_fall_back_to_flat_estimate() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("pricing.json");
        std::fs::write(
            &path,
            r#"{
                "gemini": {"output_usd_per_million": 0.0},
                "local": {"flat_usd_per_image": 0.002}
            }"#,
        )?;
        let accountant = CostAccountant::load(Some(&path));

        let gemini = accountant.generation_cost("gemini", None);
        assert_eq!(gemini.basis, CostBasis::Flat);
        assert!(close(gemini.usd, UNPRICED_IMAGE_COST_USD));

        let local = accountant.generation_cost("local", None);
        assert!(close(local.usd, 0.002));
        Ok(())
    }

    #[test]
    fn overrides_merge_field_by_field() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("pricing.json");
        std::fs::write(&path, r#"{"openai": {"output_usd_per_million": 80.0}}"#)?;
        let accountant = CostAccountant::load(Some(&path));
        let row = accountant.row("openai").cloned().unwrap_or_default();
        assert_eq!(row.output_usd_per_million, Some(80.0));
        assert_eq!(row.input_image_usd_per_million, Some(10.0));
        Ok(())
    }

    #[test]
    fn missing_override_file_keeps_defaults() {
        let accountant = CostAccountant::load(Some(std::path::Path::new("/no/such/pricing.json")));
        assert!(accountant.row("gemini").is_some());
    }

    #[test]
    fn cached_estimates_are_exactly_zero() {
        let cached = CostEstimate::cached();
        assert_eq!(cached.usd, 0.0);
        assert_eq!(cached.basis, CostBasis::Cached);
    }

    #[test]
    fn completion_cost_uses_completion_rates() {
        let accountant = CostAccountant::with_defaults();
        assert!(close(
            accountant.completion_cost("openai", 1_000_000, 0),
            0.15
        ));
        assert_eq!(accountant.completion_cost("mystery", 10, 10), 0.0);
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens("abcdefghi"), 3);
    }
}
