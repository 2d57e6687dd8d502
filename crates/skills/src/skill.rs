//! The skill contract: a named, static profile of allowed tools, a turn
//! budget, and an optional instruction override, plus a deterministic
//! matcher. No LLM is involved in matching — zero latency, zero API cost,
//! fully testable.

use fin_domain::plan::ToolSelection;

use crate::prompts::PromptFragmentStore;

/// Everything a skill's matcher may look at.
pub struct SkillContext<'a> {
    pub query: &'a str,
    /// True iff the session's page_injected artifacts were populated in the
    /// current request.
    pub has_injected_page: bool,
    /// Host of the page the user is viewing, if known.
    pub host: Option<&'a str>,
    /// The injected page content, available to instruction overrides.
    pub injected_page: Option<&'a str>,
}

pub trait Skill: Send + Sync {
    fn name(&self) -> &'static str;

    fn allowed_tools(&self) -> ToolSelection;

    fn max_turns(&self) -> u32;

    /// Deterministic match score in `[0.0, 1.0]`.
    fn match_score(&self, ctx: &SkillContext<'_>) -> f32;

    /// Replacement instructions for the run. Mandatory for skills with an
    /// empty tool allow-list — with no tools, the override must carry
    /// everything the model needs (the injected page in particular).
    fn instruction_override(
        &self,
        _ctx: &SkillContext<'_>,
        _prompts: &PromptFragmentStore,
    ) -> Option<String> {
        None
    }
}
