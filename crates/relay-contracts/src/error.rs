use serde_json::{json, Value};
use thiserror::Error;

pub type RelayResult<T> = Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Template missing, unparseable, or not matching its declared contract.
    #[error("malformed template '{template}': {reason}")]
    MalformedTemplate { template: String, reason: String },
    /// Caller-side problem with the request; reported back, never fatal.
    #[error("{0}")]
    Validation(String),
    #[error("backend invocation failed: {0}")]
    BackendInvocation(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl RelayError {
    pub fn malformed(template: impl Into<String>, reason: impl ToString) -> Self {
        Self::MalformedTemplate {
            template: template.into(),
            reason: reason.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedTemplate { .. } => "malformed_template",
            Self::Validation(_) => "validation",
            Self::BackendInvocation(_) => "backend_invocation",
            Self::Config(_) => "config",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            _ => 500,
        }
    }

    /// JSON body returned to the caller for this error.
    pub fn response_body(&self) -> Value {
        match self {
            Self::Validation(message) => json!({ "error": message }),
            other => json!({
                "error": "Internal server error",
                "details": other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::RelayError;

    #[test]
    fn validation_errors_map_to_400_with_plain_message() {
        let err = RelayError::validation("Missing required parameter: positive_prompt");
        assert_eq!(err.status_code(), 400);
        assert_eq!(
            err.response_body(),
            json!({ "error": "Missing required parameter: positive_prompt" })
        );
    }

    #[test]
    fn server_side_errors_map_to_500_with_details() {
        let err = RelayError::malformed("missing.json", "file not found");
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.kind(), "malformed_template");
        let body = err.response_body();
        assert_eq!(body["error"], json!("Internal server error"));
        assert_eq!(
            body["details"],
            json!("malformed template 'missing.json': file not found")
        );

        let err = RelayError::BackendInvocation("connection refused".to_string());
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.kind(), "backend_invocation");
    }
}
