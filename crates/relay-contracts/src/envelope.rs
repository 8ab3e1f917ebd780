//! Hosting-platform event and response shapes (API-gateway style proxy).

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, RelayResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerEvent {
    #[serde(default)]
    pub body: Option<String>,
    #[serde(rename = "isBase64Encoded", default)]
    pub is_base64_encoded: bool,
}

impl HandlerEvent {
    pub fn with_body(body: impl Into<String>) -> Self {
        Self {
            body: Some(body.into()),
            is_base64_encoded: false,
        }
    }

    /// Request body as text, undoing the gateway's base64 wrapping if present.
    pub fn decoded_body(&self) -> RelayResult<Option<String>> {
        let Some(body) = self.body.as_deref() else {
            return Ok(None);
        };
        if !self.is_base64_encoded {
            return Ok(Some(body.to_string()));
        }
        let bytes = BASE64
            .decode(body.trim())
            .map_err(|_| RelayError::validation("Request body is not valid base64"))?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| RelayError::validation("Request body is not valid UTF-8"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerResponse {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: String,
    #[serde(
        rename = "isBase64Encoded",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub is_base64_encoded: Option<bool>,
}

impl HandlerResponse {
    /// Binary payload passed through with the backend's status and type.
    pub fn binary(status_code: u16, content_type: &str, bytes: &[u8]) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), content_type.to_string());
        Self {
            headers,
            status_code,
            body: BASE64.encode(bytes),
            is_base64_encoded: Some(true),
        }
    }

    pub fn from_error(err: &RelayError) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Self {
            headers,
            status_code: err.status_code(),
            body: err.response_body().to_string(),
            is_base64_encoded: None,
        }
    }

    pub fn decoded_body(&self) -> RelayResult<Vec<u8>> {
        if self.is_base64_encoded != Some(true) {
            return Ok(self.body.as_bytes().to_vec());
        }
        BASE64
            .decode(&self.body)
            .map_err(|err| RelayError::BackendInvocation(format!("undecodable payload: {err}")))
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("Content-Type").map(String::as_str)
    }
}
