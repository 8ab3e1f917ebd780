use super::graph::GraphDocument;
use crate::error::{RelayError, RelayResult};

pub const COMFYUI_API_SCHEMA: &str = "comfyui-api";
pub const COMFYUI_API_VERSION: u32 = 1;

/// The node vocabulary a template is expected to speak.
///
/// Role and field names belong to the backend's authoring tool and drift
/// between releases. A strict contract turns that drift into a load-time
/// `MalformedTemplate` instead of a silently unpatched field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateContract {
    pub schema: String,
    pub version: u32,
    pub required_roles: Vec<String>,
    pub strict: bool,
}

impl TemplateContract {
    pub fn comfyui_api<I, S>(required_roles: I, strict: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut roles: Vec<String> = Vec::new();
        for role in required_roles {
            let role = role.as_ref().to_string();
            if !roles.contains(&role) {
                roles.push(role);
            }
        }
        Self {
            schema: COMFYUI_API_SCHEMA.to_string(),
            version: COMFYUI_API_VERSION,
            required_roles: roles,
            strict,
        }
    }

    pub fn tag(&self) -> String {
        format!("{}/v{}", self.schema, self.version)
    }

    pub fn missing_roles(&self, document: &GraphDocument) -> Vec<&str> {
        self.required_roles
            .iter()
            .map(String::as_str)
            .filter(|role| !document.has_role(role))
            .collect()
    }

    pub fn validate(&self, template: &str, document: &GraphDocument) -> RelayResult<()> {
        if !self.strict {
            return Ok(());
        }
        let missing = self.missing_roles(document);
        if missing.is_empty() {
            return Ok(());
        }
        Err(RelayError::malformed(
            template,
            format!(
                "template does not satisfy {}: missing node roles {}",
                self.tag(),
                missing.join(", ")
            ),
        ))
    }
}
