use relay_contracts::envelope::{HandlerEvent, HandlerResponse};
use relay_contracts::events::{EventPayload, EventWriter};
use relay_contracts::request::GenerationRequest;
use relay_contracts::workflow::{GraphDocument, PatchProfile, PatchReport, ProfileRegistry};
use relay_contracts::{RelayError, RelayResult};
use serde_json::{json, Map, Value};

use crate::backend::{
    build_backend, BackendResponse, InferenceBackend, ACCEPT_ANY, JSON_CONTENT_TYPE,
};
use crate::config::RelayConfig;
use crate::template::TemplateStore;

/// A patched workflow ready to submit.
#[derive(Debug, Clone)]
pub struct RenderedWorkflow {
    pub template: String,
    pub template_sha256: String,
    pub document: GraphDocument,
    pub report: PatchReport,
}

/// Request → patched template → backend.
///
/// Holds no per-request state; every call loads its own copy of the template.
pub struct Dispatcher {
    templates: TemplateStore,
    profile: PatchProfile,
    backend: BackendSource,
    events: EventWriter,
}

/// Either an injected backend or the configuration to build one from.
///
/// A configured backend is built at the invocation step, so a missing
/// endpoint only fails requests that got past validation and patching.
enum BackendSource {
    Ready(Box<dyn InferenceBackend>),
    Deferred(RelayConfig),
}

impl BackendSource {
    fn name(&self) -> &str {
        match self {
            Self::Ready(backend) => backend.name(),
            Self::Deferred(config) => config.backend.as_str(),
        }
    }

    fn invoke(&self, body: &[u8]) -> RelayResult<BackendResponse> {
        match self {
            Self::Ready(backend) => backend.invoke(body, JSON_CONTENT_TYPE, ACCEPT_ANY),
            Self::Deferred(config) => {
                build_backend(config)?.invoke(body, JSON_CONTENT_TYPE, ACCEPT_ANY)
            }
        }
    }
}

impl Dispatcher {
    pub fn new(
        templates: TemplateStore,
        profile: PatchProfile,
        backend: Box<dyn InferenceBackend>,
        events: EventWriter,
    ) -> Self {
        Self {
            templates,
            profile,
            backend: BackendSource::Ready(backend),
            events,
        }
    }

    /// The backend itself is built per request, at the invocation step.
    pub fn from_config(config: &RelayConfig) -> RelayResult<Self> {
        let profile = resolve_profile(&ProfileRegistry::default(), &config.profile)?;
        let events = match &config.events_path {
            Some(path) => EventWriter::new(path, "relay"),
            None => EventWriter::stderr("relay"),
        };
        Ok(Self {
            templates: TemplateStore::new(&config.template_dir),
            profile,
            backend: BackendSource::Deferred(config.clone()),
            events,
        })
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Full platform round trip. Never fails: errors become error responses.
    pub fn handle(&self, event: &HandlerEvent) -> HandlerResponse {
        let events = self.events.for_run(new_request_id());
        events.record(
            "request_received",
            payload(json!({
                "has_body": event.body.is_some(),
                "is_base64_encoded": event.is_base64_encoded,
            })),
        );
        let outcome = event
            .decoded_body()
            .and_then(|body| GenerationRequest::from_body(body.as_deref()))
            .and_then(|request| self.patch_and_invoke_with(&events, &request));
        match outcome {
            Ok(response) => HandlerResponse::binary(
                response.status,
                &response.content_type,
                &response.body,
            ),
            Err(err) => {
                events.record(
                    "request_failed",
                    payload(json!({
                        "kind": err.kind(),
                        "status": err.status_code(),
                        "message": err.to_string(),
                    })),
                );
                HandlerResponse::from_error(&err)
            }
        }
    }

    pub fn render(&self, request: &GenerationRequest) -> RelayResult<RenderedWorkflow> {
        self.render_with(&self.events.for_run(new_request_id()), request)
    }

    pub fn patch_and_invoke(&self, request: &GenerationRequest) -> RelayResult<BackendResponse> {
        self.patch_and_invoke_with(&self.events.for_run(new_request_id()), request)
    }

    fn render_with(
        &self,
        events: &EventWriter,
        request: &GenerationRequest,
    ) -> RelayResult<RenderedWorkflow> {
        request.validate()?;
        events.record(
            "request_parameters",
            payload(json!({
                "profile": self.profile.name,
                "template": self.profile.template,
                "positive_prompt": request.positive_prompt,
                "lora_name": request.lora_name,
                "seed": request.seed,
                "dimensions": format!("{}x{}", request.width, request.height),
            })),
        );

        let loaded = self.templates.load(&self.profile.template)?;
        events.record(
            "template_loaded",
            payload(json!({
                "template": loaded.name,
                "path": loaded.path.to_string_lossy(),
                "nodes": loaded.document.len(),
                "sha256": loaded.sha256,
                "contract": self.profile.contract.tag(),
            })),
        );

        let mut document = loaded.document;
        let report = self.profile.apply(&mut document, &request.patch_values())?;
        events.record(
            "patches_applied",
            payload(json!({
                "seed": report.seed,
                "hits": report.hits,
                "unmatched": report.unmatched(),
            })),
        );

        Ok(RenderedWorkflow {
            template: loaded.name,
            template_sha256: loaded.sha256,
            document,
            report,
        })
    }

    fn patch_and_invoke_with(
        &self,
        events: &EventWriter,
        request: &GenerationRequest,
    ) -> RelayResult<BackendResponse> {
        let rendered = self.render_with(events, request)?;
        let body = rendered.document.to_json_string()?;
        events.record(
            "backend_invoked",
            payload(json!({
                "backend": self.backend.name(),
                "content_type": JSON_CONTENT_TYPE,
                "accept": ACCEPT_ANY,
                "bytes": body.len(),
                "payload": rendered.document,
            })),
        );

        let response = self.backend.invoke(body.as_bytes())?;
        events.record(
            "backend_responded",
            payload(json!({
                "status": response.status,
                "content_type": response.content_type,
                "bytes": response.body.len(),
            })),
        );
        Ok(response)
    }
}

pub fn resolve_profile(registry: &ProfileRegistry, name: &str) -> RelayResult<PatchProfile> {
    registry.get(name).cloned().ok_or_else(|| {
        RelayError::Config(format!(
            "unknown profile '{name}' (available: {})",
            registry.names().join(", ")
        ))
    })
}

fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn payload(value: Value) -> EventPayload {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
