//! Ordered skill registry. Declaration order is priority order for tie
//! breaking; the last entry is the fallback and must return a strictly
//! positive minimum score.

use std::sync::Arc;

use crate::builtin::{
    FinancialStatements, OptionsAnalysis, StockFundamentals, SummarizePage, TechnicalAnalysis,
    WebResearch,
};
use crate::skill::Skill;

pub struct SkillRegistry {
    skills: Vec<Arc<dyn Skill>>,
}

impl SkillRegistry {
    /// The built-in skill set, in priority order, fallback last.
    pub fn builtin() -> Self {
        Self {
            skills: vec![
                Arc::new(SummarizePage),
                Arc::new(StockFundamentals),
                Arc::new(OptionsAnalysis),
                Arc::new(FinancialStatements),
                Arc::new(TechnicalAnalysis),
                Arc::new(WebResearch),
            ],
        }
    }

    /// Test-only: a registry with an explicit skill list.
    pub fn from_skills(skills: Vec<Arc<dyn Skill>>) -> Self {
        Self { skills }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Skill>> {
        self.skills.iter()
    }

    pub fn fallback(&self) -> Option<&Arc<dyn Skill>> {
        self.skills.last()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.skills.iter().map(|s| s.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skill::SkillContext;

    #[test]
    fn builtin_order_and_fallback() {
        let registry = SkillRegistry::builtin();
        assert_eq!(
            registry.names(),
            vec![
                "summarize_page",
                "stock_fundamentals",
                "options_analysis",
                "financial_statements",
                "technical_analysis",
                "web_research",
            ]
        );

        // The fallback's score floor must be strictly positive for any
        // input, or the planner could come up empty.
        let ctx = SkillContext {
            query: "",
            has_injected_page: false,
            host: None,
            injected_page: None,
        };
        assert!(registry.fallback().unwrap().match_score(&ctx) > 0.0);
    }
}
