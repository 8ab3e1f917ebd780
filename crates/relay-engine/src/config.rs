use std::env;
use std::path::PathBuf;
use std::time::Duration;

use relay_contracts::workflow::DEFAULT_PROFILE;
use relay_contracts::{RelayError, RelayResult};

pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:8080";
pub const DEFAULT_TEMPLATE_DIR: &str = "./workflow";
const DEFAULT_TIMEOUT_SECS: u64 = 300;
const MAX_TIMEOUT_SECS: u64 = 900;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Http,
    Dryrun,
}

impl BackendKind {
    pub fn parse(raw: &str) -> RelayResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "dryrun" => Ok(Self::Dryrun),
            other => Err(RelayError::Config(format!(
                "unknown RELAY_BACKEND '{other}' (expected http or dryrun)"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Dryrun => "dryrun",
        }
    }
}

/// Process-wide settings, read once and passed down explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub endpoint_name: Option<String>,
    pub backend: BackendKind,
    pub api_base: String,
    pub api_token: Option<String>,
    pub timeout: Duration,
    pub template_dir: PathBuf,
    pub profile: String,
    pub events_path: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoint_name: None,
            backend: BackendKind::Http,
            api_base: DEFAULT_API_BASE.to_string(),
            api_token: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            template_dir: PathBuf::from(DEFAULT_TEMPLATE_DIR),
            profile: DEFAULT_PROFILE.to_string(),
            events_path: None,
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> RelayResult<Self> {
        Self::from_lookup(non_empty_env)
    }

    /// Builds a config from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> RelayResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        let backend = match get("RELAY_BACKEND") {
            Some(raw) => BackendKind::parse(&raw)?,
            None => defaults.backend,
        };
        let timeout = match get("RELAY_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw.parse().map_err(|_| {
                    RelayError::Config(format!("RELAY_TIMEOUT_SECS is not an integer: '{raw}'"))
                })?;
                Duration::from_secs(secs.clamp(1, MAX_TIMEOUT_SECS))
            }
            None => defaults.timeout,
        };

        Ok(Self {
            endpoint_name: get("ENDPOINT_NAME"),
            backend,
            api_base: get("RELAY_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base),
            api_token: get("RELAY_API_TOKEN"),
            timeout,
            template_dir: get("RELAY_TEMPLATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.template_dir),
            profile: get("RELAY_PROFILE").unwrap_or(defaults.profile),
            events_path: get("RELAY_EVENTS").map(PathBuf::from),
        })
    }

    /// Required only once the invocation step is built.
    pub fn endpoint_name(&self) -> RelayResult<&str> {
        self.endpoint_name
            .as_deref()
            .ok_or_else(|| RelayError::Config("ENDPOINT_NAME is not set".to_string()))
    }

    pub fn invocation_url(&self) -> RelayResult<String> {
        Ok(format!(
            "{}/endpoints/{}/invocations",
            self.api_base,
            self.endpoint_name()?
        ))
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::Duration;

    use relay_contracts::RelayError;

    use super::{BackendKind, RelayConfig};

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() -> anyhow::Result<()> {
        let config = RelayConfig::from_lookup(lookup(&[("RELAY_PROFILE", "   ")]))?;
        assert_eq!(config, RelayConfig::default());
        assert!(matches!(
            config.endpoint_name(),
            Err(RelayError::Config(message)) if message == "ENDPOINT_NAME is not set"
        ));
        Ok(())
    }

    #[test]
    fn reads_every_setting() -> anyhow::Result<()> {
        let config = RelayConfig::from_lookup(lookup(&[
            ("ENDPOINT_NAME", "comfyui-flux"),
            ("RELAY_BACKEND", "DryRun"),
            ("RELAY_API_BASE", "https://runtime.example.com/"),
            ("RELAY_API_TOKEN", "secret"),
            ("RELAY_TIMEOUT_SECS", "5000"),
            ("RELAY_TEMPLATE_DIR", "/opt/workflow"),
            ("RELAY_PROFILE", "sd3"),
            ("RELAY_EVENTS", "/tmp/relay.jsonl"),
        ]))?;
        assert_eq!(config.backend, BackendKind::Dryrun);
        assert_eq!(config.timeout, Duration::from_secs(900));
        assert_eq!(config.template_dir, PathBuf::from("/opt/workflow"));
        assert_eq!(config.profile, "sd3");
        assert_eq!(config.api_token.as_deref(), Some("secret"));
        assert_eq!(
            config.invocation_url()?,
            "https://runtime.example.com/endpoints/comfyui-flux/invocations"
        );
        Ok(())
    }

    #[test]
    fn rejects_unknown_backend_and_bad_timeout() {
        let err = RelayConfig::from_lookup(lookup(&[("RELAY_BACKEND", "grpc")])).unwrap_err();
        assert_eq!(err.kind(), "config");
        let err = RelayConfig::from_lookup(lookup(&[("RELAY_TIMEOUT_SECS", "soon")])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "configuration error: RELAY_TIMEOUT_SECS is not an integer: 'soon'"
        );
    }
}
