use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{RelayError, RelayResult};
use crate::workflow::PatchValues;

pub const DEFAULT_DIMENSION: u32 = 512;

/// A validated generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationRequest {
    pub positive_prompt: String,
    pub lora_name: String,
    pub seed: Option<u64>,
    pub height: u32,
    pub width: u32,
}

// Nulls behave like absent keys.
#[derive(Debug, Deserialize)]
struct RawRequest {
    positive_prompt: Option<String>,
    lora_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_seed")]
    seed: Option<u64>,
    height: Option<u32>,
    width: Option<u32>,
}

impl GenerationRequest {
    pub fn new(positive_prompt: impl Into<String>) -> Self {
        Self {
            positive_prompt: positive_prompt.into(),
            lora_name: String::new(),
            seed: None,
            height: DEFAULT_DIMENSION,
            width: DEFAULT_DIMENSION,
        }
    }

    /// Parses and validates a raw request body. Every failure here is a
    /// `Validation` error and happens before any template or backend work.
    pub fn from_body(body: Option<&str>) -> RelayResult<Self> {
        let Some(body) = body.filter(|value| !value.trim().is_empty()) else {
            return Err(RelayError::validation("Missing request body"));
        };
        let parsed: Value = serde_json::from_str(body)
            .map_err(|_| RelayError::validation("Invalid JSON in request body"))?;
        Self::from_value(parsed)
    }

    pub fn from_value(value: Value) -> RelayResult<Self> {
        if !value.is_object() {
            return Err(RelayError::validation(
                "Request body must be a JSON object",
            ));
        }
        let raw: RawRequest = serde_json::from_value(value)
            .map_err(|err| RelayError::validation(format!("Invalid request parameters: {err}")))?;
        let Some(positive_prompt) = raw.positive_prompt else {
            return Err(RelayError::validation(
                "Missing required parameter: positive_prompt",
            ));
        };
        let request = Self {
            positive_prompt,
            lora_name: raw.lora_name.unwrap_or_default(),
            seed: raw.seed,
            height: raw.height.unwrap_or(DEFAULT_DIMENSION),
            width: raw.width.unwrap_or(DEFAULT_DIMENSION),
        };
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> RelayResult<()> {
        if self.height == 0 || self.width == 0 {
            return Err(RelayError::validation(format!(
                "Image dimensions must be positive integers (got {}x{})",
                self.width, self.height
            )));
        }
        Ok(())
    }

    pub fn patch_values(&self) -> PatchValues {
        PatchValues {
            prompt: self.positive_prompt.clone(),
            seed: self.seed,
            height: self.height,
            width: self.width,
            adapter_name: self.lora_name.clone(),
        }
    }
}

/// Integers, integral floats (`123.0`) and numeric strings (`"123"`) are all
/// accepted as seeds; anything negative or fractional is not.
fn lenient_seed<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    let Some(value) = Option::<Value>::deserialize(deserializer)? else {
        return Ok(None);
    };
    seed_from_value(&value).map(Some).ok_or_else(|| {
        D::Error::custom(format!("seed must be a non-negative integer, got {value}"))
    })
}

fn seed_from_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64().or_else(|| {
            number
                .as_f64()
                .filter(|seed| seed.fract() == 0.0 && *seed >= 0.0 && *seed < u64::MAX as f64)
                .map(|seed| seed as u64)
        }),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(err: RelayError) -> String {
        match err {
            RelayError::Validation(message) => message,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn parses_full_request() -> anyhow::Result<()> {
        let request = GenerationRequest::from_body(Some(
            r#"{"positive_prompt": "a handsome man smiling", "seed": 123, "height": 512, "width": 512, "lora_name": "dm7249atlas.safetensors"}"#,
        ))?;
        assert_eq!(request.positive_prompt, "a handsome man smiling");
        assert_eq!(request.seed, Some(123));
        assert_eq!(request.lora_name, "dm7249atlas.safetensors");

        let values = request.patch_values();
        assert_eq!(values.adapter_name, "dm7249atlas.safetensors");
        assert_eq!((values.height, values.width), (512, 512));
        Ok(())
    }

    #[test]
    fn applies_defaults() -> anyhow::Result<()> {
        let request =
            GenerationRequest::from_body(Some(r#"{"positive_prompt": "fox", "seed": null}"#))?;
        assert_eq!(request, GenerationRequest::new("fox"));
        Ok(())
    }

    #[test]
    fn reports_missing_and_malformed_bodies() {
        assert_eq!(
            message(GenerationRequest::from_body(None).unwrap_err()),
            "Missing request body"
        );
        assert_eq!(
            message(GenerationRequest::from_body(Some("  ")).unwrap_err()),
            "Missing request body"
        );
        assert_eq!(
            message(GenerationRequest::from_body(Some("{not json")).unwrap_err()),
            "Invalid JSON in request body"
        );
        assert_eq!(
            message(GenerationRequest::from_body(Some("[]")).unwrap_err()),
            "Request body must be a JSON object"
        );
        assert_eq!(
            message(GenerationRequest::from_body(Some(r#"{"seed": 1}"#)).unwrap_err()),
            "Missing required parameter: positive_prompt"
        );
    }

    #[test]
    fn coerces_integral_floats_and_numeric_string_seeds() -> anyhow::Result<()> {
        for body in [
            r#"{"positive_prompt": "x", "seed": "123"}"#,
            r#"{"positive_prompt": "x", "seed": " 123 "}"#,
            r#"{"positive_prompt": "x", "seed": 123.0}"#,
            r#"{"positive_prompt": "x", "seed": 123}"#,
        ] {
            assert_eq!(GenerationRequest::from_body(Some(body))?.seed, Some(123), "{body}");
        }
        Ok(())
    }

    #[test]
    fn rejects_bad_parameter_types_and_zero_dimensions() {
        let err = GenerationRequest::from_body(Some(r#"{"positive_prompt": "x", "seed": -4}"#))
            .unwrap_err();
        assert!(message(err).starts_with("Invalid request parameters:"));

        let err =
            GenerationRequest::from_body(Some(r#"{"positive_prompt": "x", "seed": 1.5}"#))
                .unwrap_err();
        assert!(message(err).contains("seed must be a non-negative integer, got 1.5"));
        let err = GenerationRequest::from_body(Some(r#"{"positive_prompt": "x", "seed": "abc"}"#))
            .unwrap_err();
        assert!(message(err).starts_with("Invalid request parameters:"));

        let err = GenerationRequest::from_body(Some(r#"{"positive_prompt": "x", "height": 0}"#))
            .unwrap_err();
        assert_eq!(
            message(err),
            "Image dimensions must be positive integers (got 512x0)"
        );
    }
}
