mod graph;
mod patch;
mod profiles;
mod schema;

pub use graph::{GraphDocument, Node, NodeMeta};
pub use patch::{
    random_seed, set_adapter_name, set_dimensions, set_prompt_text, set_seed, OverwritePolicy,
    PatchReport, PatchRule, PatchValue, PatchValues, MAX_RANDOM_SEED, PROMPT_PLACEHOLDER,
};
pub use profiles::{PatchProfile, ProfileRegistry, RoleNames, DEFAULT_PROFILE};
pub use schema::TemplateContract;
