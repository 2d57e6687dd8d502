//! Planning and research types: which tools a skill run may touch, how a
//! complex query decomposes, and what each lookup produced.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool selection + execution plan
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The set of tools a skill run is allowed to use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolSelection {
    /// Every registered tool.
    All,
    /// An explicit allow-list. Empty means "no tools at all" — the runner
    /// skips tool setup entirely and invokes the model in one shot.
    Named(BTreeSet<String>),
}

impl ToolSelection {
    pub fn none() -> Self {
        ToolSelection::Named(BTreeSet::new())
    }

    pub fn named<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ToolSelection::Named(names.into_iter().map(Into::into).collect())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ToolSelection::Named(set) if set.is_empty())
    }

    pub fn permits(&self, name: &str) -> bool {
        match self {
            ToolSelection::All => true,
            ToolSelection::Named(set) => set.contains(name),
        }
    }
}

/// The concrete output of planning for one request. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub skill_name: String,
    pub allowed_tools: ToolSelection,
    pub max_turns: u32,
    /// Replaces the assembled system prompt for this run. Required whenever
    /// `allowed_tools` is empty (the override must carry the page content,
    /// since no tool can fetch it).
    pub instruction_override: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Research decomposition
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Routing tag for a sub-question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubKind {
    /// Prefers structured market-data tools, falls back to web search.
    Numerical,
    /// Goes straight to web search.
    Qualitative,
    /// Deferred to synthesis; no lookup is performed.
    Analytical,
}

/// One atomic information need produced by decomposing a complex query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubQuestion {
    pub question: String,
    pub kind: SubKind,
}

/// Where a sub-result's answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubOrigin {
    Tool,
    Web,
    Deferred,
    Error,
}

/// A source attribution attached to an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl SourceRef {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            title: None,
        }
    }
}

/// The outcome of executing one sub-question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubResult {
    pub sub_question: SubQuestion,
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub origin: SubOrigin,
}

/// Gap Detector verdict on an accumulated result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapReport {
    pub complete: bool,
    pub gaps: Vec<String>,
    /// Clamped to 3 by the detector.
    pub follow_ups: Vec<SubQuestion>,
}

impl GapReport {
    /// The safe default: research is complete, nothing to follow up.
    /// Used whenever the detector's output cannot be parsed, so the
    /// iteration loop always terminates.
    pub fn complete() -> Self {
        Self {
            complete: true,
            gaps: Vec::new(),
            follow_ups: Vec::new(),
        }
    }
}

/// Run metadata returned alongside a synthesized research answer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchMeta {
    pub iterations: u32,
    pub subq_count: u32,
    pub tool_hits: u32,
    pub web_hits: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_selection_permits_nothing() {
        let sel = ToolSelection::none();
        assert!(sel.is_empty());
        assert!(!sel.permits("calculate"));
    }

    #[test]
    fn named_selection_permits_members_only() {
        let sel = ToolSelection::named(["get_stock_info", "calculate"]);
        assert!(sel.permits("calculate"));
        assert!(!sel.permits("get_options_chain"));
        assert!(!sel.is_empty());
    }

    #[test]
    fn all_selection_permits_everything() {
        assert!(ToolSelection::All.permits("anything"));
        assert!(!ToolSelection::All.is_empty());
    }

    #[test]
    fn sub_kind_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&SubKind::Numerical).unwrap(),
            "\"numerical\""
        );
    }
}
