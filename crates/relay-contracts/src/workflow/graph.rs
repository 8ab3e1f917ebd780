use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{RelayError, RelayResult};

/// A ComfyUI "API format" workflow: node id → node.
///
/// Nodes are addressed by what they are (`class_type`, `_meta.title`), never by
/// their id or position. Keys the relay does not understand are carried through
/// untouched so a parse/serialize round trip only changes patched leaves.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraphDocument {
    nodes: IndexMap<String, Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub class_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Map<String, Value>>,
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<NodeMeta>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GraphDocument {
    /// Parses a template. `name` only labels the error.
    pub fn from_json_str(name: &str, raw: &str) -> RelayResult<Self> {
        serde_json::from_str(raw).map_err(|err| RelayError::malformed(name, err))
    }

    pub fn from_value(name: &str, value: Value) -> RelayResult<Self> {
        serde_json::from_value(value).map_err(|err| RelayError::malformed(name, err))
    }

    pub fn to_json_string(&self) -> RelayResult<String> {
        serde_json::to_string(self).map_err(|err| RelayError::malformed("<patched>", err))
    }

    pub fn to_pretty_string(&self) -> RelayResult<String> {
        serde_json::to_string_pretty(self).map_err(|err| RelayError::malformed("<patched>", err))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = (&String, &mut Node)> {
        self.nodes.iter_mut()
    }

    pub fn nodes_with_role<'a>(&'a self, role: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes
            .values()
            .filter(move |node| node.class_type == role)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.nodes_with_role(role).next().is_some()
    }
}

impl Node {
    pub fn title(&self) -> Option<&str> {
        self.meta.as_ref().and_then(|meta| meta.title.as_deref())
    }

    pub fn has_input(&self, field: &str) -> bool {
        self.inputs
            .as_ref()
            .map(|inputs| inputs.contains_key(field))
            .unwrap_or(false)
    }

    pub fn input(&self, field: &str) -> Option<&Value> {
        self.inputs.as_ref().and_then(|inputs| inputs.get(field))
    }

    /// Overwrites (or inserts) an input, returning the previous value.
    pub fn set_input(&mut self, field: &str, value: Value) -> Option<Value> {
        self.inputs
            .get_or_insert_with(Map::new)
            .insert(field.to_string(), value)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::GraphDocument;
    use crate::error::RelayError;

    fn sample() -> Value {
        json!({
            "6": {
                "class_type": "CLIPTextEncode",
                "inputs": { "text": "POSITIVE_PROMT_PLACEHOLDER", "clip": ["38", 1] },
                "_meta": { "title": "CLIP Text Encode (Positive Prompt)" }
            },
            "8": {
                "class_type": "VAEDecode",
                "inputs": { "samples": ["31", 0], "vae": ["30", 2] }
            },
            "99": { "class_type": "Note", "widgets_values": ["keep me"] }
        })
    }

    #[test]
    fn parses_nodes_and_metadata() -> anyhow::Result<()> {
        let doc = GraphDocument::from_value("sample", sample())?;
        assert_eq!(doc.len(), 3);
        assert_eq!(doc.node_ids(), vec!["6", "8", "99"]);
        let encoder = doc.get("6").expect("node 6");
        assert_eq!(encoder.title(), Some("CLIP Text Encode (Positive Prompt)"));
        assert!(encoder.has_input("text"));
        assert!(!encoder.has_input("seed"));
        assert!(doc.get("99").expect("node 99").inputs.is_none());
        assert!(doc.has_role("VAEDecode"));
        assert!(!doc.has_role("KSampler"));
        Ok(())
    }

    #[test]
    fn round_trip_preserves_unknown_keys() -> anyhow::Result<()> {
        let doc = GraphDocument::from_value("sample", sample())?;
        let text = doc.to_json_string()?;
        let reparsed: Value = serde_json::from_str(&text)?;
        assert_eq!(reparsed, sample());
        assert_eq!(GraphDocument::from_json_str("sample", &text)?, doc);
        Ok(())
    }

    #[test]
    fn rejects_non_graph_payloads() {
        for raw in ["not json", "[1, 2]", r#"{"1": {"inputs": {}}}"#] {
            let err = GraphDocument::from_json_str("broken.json", raw).unwrap_err();
            match err {
                RelayError::MalformedTemplate { template, .. } => {
                    assert_eq!(template, "broken.json")
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }
}
