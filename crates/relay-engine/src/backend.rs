use std::io::Cursor;

use anyhow::{bail, Context, Result};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use relay_contracts::workflow::{GraphDocument, RoleNames};
use relay_contracts::{RelayError, RelayResult};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use sha2::{Digest, Sha256};

use crate::config::{BackendKind, RelayConfig};

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const ACCEPT_ANY: &str = "*/*";

const DRYRUN_MAX_SIDE: u32 = 2048;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

/// The remote runtime that executes a patched workflow.
pub trait InferenceBackend: Send + Sync {
    fn name(&self) -> &str;
    fn invoke(&self, body: &[u8], content_type: &str, accept: &str)
        -> RelayResult<BackendResponse>;
}

pub fn build_backend(config: &RelayConfig) -> RelayResult<Box<dyn InferenceBackend>> {
    match config.backend {
        BackendKind::Http => Ok(Box::new(HttpBackend::new(config)?)),
        BackendKind::Dryrun => Ok(Box::new(DryrunBackend)),
    }
}

/// POSTs the workflow to `{api_base}/endpoints/{ENDPOINT_NAME}/invocations`.
pub struct HttpBackend {
    url: String,
    api_token: Option<String>,
    http: HttpClient,
}

impl HttpBackend {
    pub fn new(config: &RelayConfig) -> RelayResult<Self> {
        let url = config.invocation_url()?;
        let http = HttpClient::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| RelayError::Config(format!("cannot build HTTP client: {err}")))?;
        Ok(Self {
            url,
            api_token: config.api_token.clone(),
            http,
        })
    }

    fn post(&self, body: &[u8], content_type: &str, accept: &str) -> Result<BackendResponse> {
        let mut request = self
            .http
            .post(&self.url)
            .header(CONTENT_TYPE, content_type)
            .header(ACCEPT, accept)
            .body(body.to_vec());
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .with_context(|| format!("invocation request failed ({})", self.url))?;
        let status = response.status();
        let code = status.as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            bail!("backend returned {code}: {}", truncate_text(&text, 512));
        }
        let body = response
            .bytes()
            .context("failed reading backend response body")?
            .to_vec();
        Ok(BackendResponse {
            status: code,
            content_type,
            body,
        })
    }
}

impl InferenceBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    fn invoke(
        &self,
        body: &[u8],
        content_type: &str,
        accept: &str,
    ) -> RelayResult<BackendResponse> {
        self.post(body, content_type, accept)
            .map_err(|err| RelayError::BackendInvocation(error_chain_text(&err, 1024)))
    }
}

/// Answers with a flat PNG derived from the workflow, sized from its latent node.
pub struct DryrunBackend;

impl InferenceBackend for DryrunBackend {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn invoke(
        &self,
        body: &[u8],
        _content_type: &str,
        _accept: &str,
    ) -> RelayResult<BackendResponse> {
        let raw = std::str::from_utf8(body)
            .map_err(|err| RelayError::BackendInvocation(format!("payload is not UTF-8: {err}")))?;
        let document = GraphDocument::from_json_str("<payload>", raw)
            .map_err(|err| RelayError::BackendInvocation(err.to_string()))?;
        let (width, height) = latent_dims(&document);
        let png = render_flat_png(width, height, color_from_payload(body))
            .map_err(|err| RelayError::BackendInvocation(error_chain_text(&err, 512)))?;
        Ok(BackendResponse {
            status: 200,
            content_type: "image/png".to_string(),
            body: png,
        })
    }
}

fn latent_dims(document: &GraphDocument) -> (u32, u32) {
    let roles = RoleNames::default();
    let dim = |value: Option<&serde_json::Value>| {
        value
            .and_then(serde_json::Value::as_u64)
            .map(|side| side.clamp(1, DRYRUN_MAX_SIDE as u64) as u32)
    };
    let dims = document
        .nodes_with_role(&roles.latent_image)
        .find_map(|node| Some((dim(node.input("width"))?, dim(node.input("height"))?)))
        .unwrap_or((512, 512));
    dims
}

fn color_from_payload(payload: &[u8]) -> (u8, u8, u8) {
    let digest = Sha256::digest(payload);
    (digest[0], digest[1], digest[2])
}

fn render_flat_png(width: u32, height: u32, (r, g, b): (u8, u8, u8)) -> Result<Vec<u8>> {
    let image = RgbImage::from_pixel(width, height, Rgb([r, g, b]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("failed to encode dryrun PNG")?;
    Ok(bytes)
}

fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() || parts.last().map(String::as_str) == Some(trimmed) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
