use indexmap::IndexMap;

use super::graph::GraphDocument;
use super::patch::{apply_rules, OverwritePolicy, PatchReport, PatchRule, PatchValue, PatchValues};
use super::schema::TemplateContract;
use crate::error::RelayResult;

pub const DEFAULT_PROFILE: &str = "lora-flux";

/// ComfyUI class types the relay patches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleNames {
    pub sampler: String,
    pub seed_field: String,
    pub text_encoder: String,
    pub latent_image: String,
    pub adapter_loader: String,
}

impl Default for RoleNames {
    fn default() -> Self {
        Self {
            sampler: "KSampler".to_string(),
            seed_field: "seed".to_string(),
            text_encoder: "CLIPTextEncode".to_string(),
            latent_image: "EmptySD3LatentImage".to_string(),
            adapter_loader: "LoraLoader".to_string(),
        }
    }
}

/// A template plus the rules that parameterize it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchProfile {
    pub name: String,
    pub template: String,
    pub contract: TemplateContract,
    pub rules: Vec<PatchRule>,
}

impl PatchProfile {
    /// Standard seed → prompt → dimensions → adapter rule set.
    pub fn standard(
        name: &str,
        template: &str,
        roles: &RoleNames,
        prompt_policy: OverwritePolicy,
        adapter_title: Option<&str>,
        strict: bool,
    ) -> Self {
        let rules = vec![
            PatchRule::new(&roles.sampler, &roles.seed_field, PatchValue::Seed),
            PatchRule::new(&roles.text_encoder, "text", PatchValue::PromptText)
                .with_policy(prompt_policy),
            PatchRule::new(&roles.latent_image, "height", PatchValue::Height),
            PatchRule::new(&roles.latent_image, "width", PatchValue::Width).requires("height"),
            PatchRule::new(&roles.adapter_loader, "lora_name", PatchValue::AdapterName)
                .with_title(adapter_title),
        ];
        let contract = TemplateContract::comfyui_api(
            [
                &roles.sampler,
                &roles.text_encoder,
                &roles.latent_image,
                &roles.adapter_loader,
            ],
            strict,
        );
        Self {
            name: name.to_string(),
            template: template.to_string(),
            contract,
            rules,
        }
    }

    /// Checks the contract, then runs every rule.
    pub fn apply(
        &self,
        document: &mut GraphDocument,
        values: &PatchValues,
    ) -> RelayResult<PatchReport> {
        self.contract.validate(&self.template, document)?;
        Ok(apply_rules(document, &self.rules, values))
    }
}

#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: IndexMap<String, PatchProfile>,
}

impl ProfileRegistry {
    pub fn new(profiles: Option<IndexMap<String, PatchProfile>>) -> Self {
        Self {
            profiles: profiles.unwrap_or_else(default_profiles),
        }
    }

    pub fn get(&self, name: &str) -> Option<&PatchProfile> {
        self.profiles.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    pub fn list(&self) -> impl Iterator<Item = &PatchProfile> {
        self.profiles.values()
    }
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

fn default_profiles() -> IndexMap<String, PatchProfile> {
    let roles = RoleNames::default();
    let mut map = IndexMap::new();
    let mut insert = |profile: PatchProfile| {
        map.insert(profile.name.clone(), profile);
    };

    // Flux + character LoRA: only the sentinel prompt encoder is replaced so
    // the negative encoder keeps its template text.
    insert(PatchProfile::standard(
        DEFAULT_PROFILE,
        "lora_flux_workflow.json",
        &roles,
        OverwritePolicy::placeholder(),
        Some("character-lora"),
        true,
    ));
    insert(PatchProfile::standard(
        "sd3",
        "sd3_workflow.json",
        &roles,
        OverwritePolicy::Always,
        None,
        false,
    ));

    map
}
