//! The planner: scores every skill against the query and turns the winner
//! into an immutable execution plan.

use fin_domain::plan::ExecutionPlan;
use fin_domain::{Error, Result};

use crate::prompts::PromptFragmentStore;
use crate::registry::SkillRegistry;
use crate::skill::{Skill, SkillContext};

pub struct Planner {
    registry: SkillRegistry,
}

impl Planner {
    pub fn new(registry: SkillRegistry) -> Self {
        Self { registry }
    }

    /// Pick the highest-scoring skill (ties break by declaration order)
    /// and produce its execution plan.
    ///
    /// Fails only when the registry is empty, which a correctly wired
    /// gateway never hits. A winning skill with an empty allow-list that
    /// cannot produce its instruction override (e.g. the page content went
    /// missing) is replaced by the fallback — an empty-tool run without
    /// instructions would have nothing to work from.
    pub fn plan(
        &self,
        ctx: &SkillContext<'_>,
        prompts: &PromptFragmentStore,
    ) -> Result<ExecutionPlan> {
        if self.registry.is_empty() {
            return Err(Error::Plan("skill registry is empty".into()));
        }

        let mut best: Option<(&std::sync::Arc<dyn Skill>, f32)> = None;
        for skill in self.registry.iter() {
            let score = skill.match_score(ctx).clamp(0.0, 1.0);
            match &best {
                Some((_, best_score)) if score <= *best_score => {}
                _ if score > 0.0 => best = Some((skill, score)),
                _ => {}
            }
        }

        let (skill, score) = match best {
            Some(found) => found,
            // Defensive: a well-formed registry's fallback always scores
            // above zero, but an empty-scoring custom registry still plans.
            None => (
                self.registry.fallback().expect("non-empty registry"),
                0.0,
            ),
        };

        let instruction_override = skill.instruction_override(ctx, prompts);
        let allowed_tools = skill.allowed_tools();

        if allowed_tools.is_empty() && instruction_override.is_none() {
            let fallback = self.registry.fallback().expect("non-empty registry");
            tracing::warn!(
                skill = skill.name(),
                "empty-tool skill produced no instruction override, using fallback"
            );
            return Ok(ExecutionPlan {
                skill_name: fallback.name().to_string(),
                allowed_tools: fallback.allowed_tools(),
                max_turns: fallback.max_turns(),
                instruction_override: fallback.instruction_override(ctx, prompts),
            });
        }

        tracing::debug!(skill = skill.name(), score, "plan selected");
        Ok(ExecutionPlan {
            skill_name: skill.name().to_string(),
            allowed_tools,
            max_turns: skill.max_turns(),
            instruction_override,
        })
    }
}
