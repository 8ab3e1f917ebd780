pub mod backend;
pub mod config;
pub mod dispatch;
pub mod template;

pub use backend::{build_backend, BackendResponse, DryrunBackend, HttpBackend, InferenceBackend};
pub use config::{BackendKind, RelayConfig};
pub use dispatch::{resolve_profile, Dispatcher, RenderedWorkflow};
pub use template::{LoadedTemplate, TemplateStore};
