use indexmap::IndexMap;
use rand::Rng;
use serde::Serialize;
use serde_json::Value;

use super::graph::{GraphDocument, Node};
use super::profiles::RoleNames;

/// Sentinel the shipped templates carry in the positive prompt encoder.
/// The misspelling is part of the template contract.
pub const PROMPT_PLACEHOLDER: &str = "POSITIVE_PROMT_PLACEHOLDER";

/// Exclusive upper bound for generated seeds.
pub const MAX_RANDOM_SEED: u64 = 10_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverwritePolicy {
    Always,
    /// Only replace a field whose current value is exactly this string.
    WhenPlaceholder(String),
}

impl OverwritePolicy {
    pub fn placeholder() -> Self {
        Self::WhenPlaceholder(PROMPT_PLACEHOLDER.to_string())
    }

    fn permits(&self, current: Option<&Value>) -> bool {
        match self {
            Self::Always => true,
            Self::WhenPlaceholder(sentinel) => {
                current.and_then(Value::as_str) == Some(sentinel.as_str())
            }
        }
    }
}

/// Which caller-supplied value a rule writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchValue {
    Seed,
    PromptText,
    Height,
    Width,
    AdapterName,
}

/// Caller-supplied values for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchValues {
    pub prompt: String,
    pub seed: Option<u64>,
    pub height: u32,
    pub width: u32,
    pub adapter_name: String,
}

impl PatchValues {
    fn json_for(&self, value: PatchValue, seed: u64) -> Value {
        match value {
            PatchValue::Seed => Value::from(seed),
            PatchValue::PromptText => Value::String(self.prompt.clone()),
            PatchValue::Height => Value::from(self.height),
            PatchValue::Width => Value::from(self.width),
            PatchValue::AdapterName => Value::String(self.adapter_name.clone()),
        }
    }
}

/// One declarative patch: nodes of `role` (and `title`, when set) whose inputs
/// contain `requires` (defaults to `field`) get `field` overwritten with
/// `value`, subject to `policy`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRule {
    pub role: String,
    pub title: Option<String>,
    pub field: String,
    pub requires: Option<String>,
    pub value: PatchValue,
    pub policy: OverwritePolicy,
}

impl PatchRule {
    pub fn new(role: impl Into<String>, field: impl Into<String>, value: PatchValue) -> Self {
        Self {
            role: role.into(),
            title: None,
            field: field.into(),
            requires: None,
            value,
            policy: OverwritePolicy::Always,
        }
    }

    pub fn with_title(mut self, title: Option<impl Into<String>>) -> Self {
        self.title = title.map(Into::into);
        self
    }

    pub fn requires(mut self, field: impl Into<String>) -> Self {
        self.requires = Some(field.into());
        self
    }

    pub fn with_policy(mut self, policy: OverwritePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn label(&self) -> String {
        match &self.title {
            Some(title) => format!("{}[{}].{}", self.role, title, self.field),
            None => format!("{}.{}", self.role, self.field),
        }
    }

    fn matches(&self, node: &Node) -> bool {
        if node.class_type != self.role {
            return false;
        }
        if let Some(title) = &self.title {
            if node.title() != Some(title.as_str()) {
                return false;
            }
        }
        node.has_input(self.requires.as_deref().unwrap_or(&self.field))
    }

    /// Writes `value` into every matching node; returns how many were written.
    pub fn apply_value(&self, document: &mut GraphDocument, value: &Value) -> usize {
        let mut written = 0;
        for (_, node) in document.nodes_mut() {
            if !self.matches(node) || !self.policy.permits(node.input(&self.field)) {
                continue;
            }
            node.set_input(&self.field, value.clone());
            written += 1;
        }
        written
    }
}

/// Outcome of running a rule set over a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchReport {
    /// Seed actually written; drawn at random when the caller gave none.
    pub seed: u64,
    pub hits: IndexMap<String, usize>,
}

impl PatchReport {
    pub fn unmatched(&self) -> Vec<&str> {
        self.hits
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(label, _)| label.as_str())
            .collect()
    }
}

/// Applies `rules` in order. The seed is resolved once so every sampler in the
/// graph shares it.
pub fn apply_rules(
    document: &mut GraphDocument,
    rules: &[PatchRule],
    values: &PatchValues,
) -> PatchReport {
    let seed = values.seed.unwrap_or_else(random_seed);
    let mut hits = IndexMap::new();
    for rule in rules {
        let written = rule.apply_value(document, &values.json_for(rule.value, seed));
        *hits.entry(rule.label()).or_insert(0) += written;
    }
    PatchReport { seed, hits }
}

pub fn random_seed() -> u64 {
    rand::thread_rng().gen_range(0..MAX_RANDOM_SEED)
}

pub fn set_dimensions(document: &mut GraphDocument, height: u32, width: u32) -> usize {
    let roles = RoleNames::default();
    let height_rule = PatchRule::new(&roles.latent_image, "height", PatchValue::Height);
    let width_rule =
        PatchRule::new(&roles.latent_image, "width", PatchValue::Width).requires("height");
    let written = height_rule.apply_value(document, &Value::from(height));
    width_rule.apply_value(document, &Value::from(width));
    written
}

/// Returns the seed that was written (or would have been, if no sampler exists).
pub fn set_seed(document: &mut GraphDocument, seed: Option<u64>) -> u64 {
    let roles = RoleNames::default();
    let seed = seed.unwrap_or_else(random_seed);
    PatchRule::new(&roles.sampler, &roles.seed_field, PatchValue::Seed)
        .apply_value(document, &Value::from(seed));
    seed
}

pub fn set_prompt_text(document: &mut GraphDocument, text: &str, policy: &OverwritePolicy) -> usize {
    let roles = RoleNames::default();
    PatchRule::new(&roles.text_encoder, "text", PatchValue::PromptText)
        .with_policy(policy.clone())
        .apply_value(document, &Value::String(text.to_string()))
}

pub fn set_adapter_name(document: &mut GraphDocument, name: &str, title: Option<&str>) -> usize {
    let roles = RoleNames::default();
    PatchRule::new(&roles.adapter_loader, "lora_name", PatchValue::AdapterName)
        .with_title(title)
        .apply_value(document, &Value::String(name.to_string()))
}
