use std::fs;
use std::path::{Component, Path, PathBuf};

use relay_contracts::workflow::GraphDocument;
use relay_contracts::{RelayError, RelayResult};
use sha2::{Digest, Sha256};

/// Workflow templates addressed by file name under one directory.
///
/// Nothing is cached: every `load` re-reads the file so out-of-band template
/// updates show up on the next request.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LoadedTemplate {
    pub name: String,
    pub path: PathBuf,
    pub sha256: String,
    pub document: GraphDocument,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, name: &str) -> RelayResult<PathBuf> {
        let mut components = Path::new(name).components();
        let plain = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !plain {
            return Err(RelayError::malformed(
                name,
                "template name must be a plain file name",
            ));
        }
        Ok(self.dir.join(name))
    }

    pub fn load(&self, name: &str) -> RelayResult<LoadedTemplate> {
        let path = self.path_for(name)?;
        let raw = fs::read_to_string(&path).map_err(|err| {
            RelayError::malformed(name, format!("cannot read {}: {err}", path.display()))
        })?;
        let document = GraphDocument::from_json_str(name, &raw)?;
        Ok(LoadedTemplate {
            name: name.to_string(),
            path,
            sha256: hex::encode(Sha256::digest(raw.as_bytes())),
            document,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use relay_contracts::RelayError;

    use super::TemplateStore;

    const TEMPLATE: &str = r#"{"31": {"class_type": "KSampler", "inputs": {"seed": 0}}}"#;

    #[test]
    fn loads_fresh_copy_every_time() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        fs::write(temp.path().join("flow.json"), TEMPLATE)?;
        let store = TemplateStore::new(temp.path());

        let first = store.load("flow.json")?;
        assert_eq!(first.document.len(), 1);
        assert_eq!(first.sha256.len(), 64);

        fs::write(
            temp.path().join("flow.json"),
            r#"{"1": {"class_type": "A"}, "2": {"class_type": "B"}}"#,
        )?;
        let second = store.load("flow.json")?;
        assert_eq!(second.document.len(), 2);
        assert_ne!(first.sha256, second.sha256);
        Ok(())
    }

    #[test]
    fn missing_or_invalid_templates_are_malformed() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        fs::write(temp.path().join("broken.json"), "{ nope")?;
        let store = TemplateStore::new(temp.path());

        for name in ["absent.json", "broken.json", "../flow.json", "/etc/passwd", ""] {
            let err = store.load(name).unwrap_err();
            assert!(
                matches!(err, RelayError::MalformedTemplate { .. }),
                "{name}: {err:?}"
            );
        }
        Ok(())
    }
}
