//! Iterative research: decompose a complex query, execute sub-questions in
//! parallel, detect coverage gaps, iterate, and synthesize a grounded
//! answer. The three LLM-backed operators (analyzer, gap detector,
//! synthesizer) run as single-shot structured-JSON calls; the engine around
//! them is plain control flow.

pub mod analyzer;
pub mod engine;
pub mod gaps;
pub mod synthesizer;

pub use analyzer::{analyze_query, AnalysisOutcome};
pub use engine::{run_iterative_research, ResearchOutcome, SubQuestionExecutor};
pub use gaps::detect_gaps;
pub use synthesizer::synthesize;

/// Best-effort JSON extraction from model output.
///
/// Models wrap JSON in code fences or prose despite instructions; find the
/// outermost object and parse that. `None` means there is nothing usable —
/// callers fall back to their safe defaults.
pub(crate) fn parse_json_lenient(raw: &str) -> Option<serde_json::Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        let value = parse_json_lenient(r#"{"complete": true}"#).unwrap();
        assert_eq!(value["complete"], true);
    }

    #[test]
    fn parses_fenced_json() {
        let raw = "Here you go:\n```json\n{\"needs_decomposition\": false}\n```";
        let value = parse_json_lenient(raw).unwrap();
        assert_eq!(value["needs_decomposition"], false);
    }

    #[test]
    fn garbage_is_none() {
        assert!(parse_json_lenient("I couldn't produce JSON, sorry").is_none());
        assert!(parse_json_lenient("").is_none());
    }
}
