//! Query analyzer: decides whether a query needs decomposition and, if so,
//! produces the initial sub-question plan.

use fin_domain::plan::{SubKind, SubQuestion};
use fin_domain::tool::Message;
use fin_providers::{ChatRequest, LlmProvider};

use crate::parse_json_lenient;

#[derive(Debug, Clone, Default)]
pub struct AnalysisOutcome {
    pub needs_decomposition: bool,
    pub sub_questions: Vec<SubQuestion>,
}

const ANALYZER_INSTRUCTIONS: &str = r#"You decide whether a financial question needs to be decomposed into independent sub-questions before research.

Respond with JSON only, in this shape:
{"needs_decomposition": <bool>, "sub_questions": [{"question": "<text>", "kind": "numerical" | "qualitative" | "analytical"}]}

Rules:
- A question answerable with a single aggregate metric from one source (one price, one market cap, one ratio) must NOT be decomposed: return {"needs_decomposition": false, "sub_questions": []}.
- Decompose comparisons, multi-entity questions, multi-period questions, and questions mixing data lookup with interpretation.
- "numerical": a concrete figure retrievable from market-data tools.
- "qualitative": news, commentary, or context found by web search.
- "analytical": reasoning over the other answers; no lookup is performed for it.
- Each sub-question must stand alone (name the company and period explicitly)."#;

/// Run the analyzer. Every failure mode — provider error, invalid JSON,
/// missing fields, wrong types — degrades to "no decomposition" so the
/// caller simply uses the single-pass path.
pub async fn analyze_query(
    provider: &dyn LlmProvider,
    query: &str,
    time_ctx: &str,
    max_sub: usize,
) -> AnalysisOutcome {
    let request = ChatRequest {
        messages: vec![
            Message::system(ANALYZER_INSTRUCTIONS),
            Message::user(format!("{time_ctx}\n\nQuestion: {query}")),
        ],
        temperature: Some(0.0),
        json_mode: true,
        ..Default::default()
    };

    let response = match provider.chat(&request).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "query analyzer call failed, using single-pass path");
            return AnalysisOutcome::default();
        }
    };

    parse_outcome(&response.content, max_sub)
}

/// Lenient parse of the analyzer's JSON. Unknown `kind` values coerce to
/// qualitative; the sub-question list clamps to `max_sub`.
pub fn parse_outcome(raw: &str, max_sub: usize) -> AnalysisOutcome {
    let Some(value) = parse_json_lenient(raw) else {
        tracing::debug!("analyzer output unparseable, defaulting to no decomposition");
        return AnalysisOutcome::default();
    };

    let Some(needs) = value["needs_decomposition"].as_bool() else {
        return AnalysisOutcome::default();
    };
    if !needs {
        return AnalysisOutcome::default();
    }

    let mut sub_questions = Vec::new();
    if let Some(items) = value["sub_questions"].as_array() {
        for item in items.iter().take(max_sub) {
            let Some(question) = item["question"].as_str() else {
                continue;
            };
            if question.trim().is_empty() {
                continue;
            }
            let kind = match item["kind"].as_str() {
                Some("numerical") => SubKind::Numerical,
                Some("analytical") => SubKind::Analytical,
                _ => SubKind::Qualitative,
            };
            sub_questions.push(SubQuestion {
                question: question.trim().to_string(),
                kind,
            });
        }
    }

    if sub_questions.is_empty() {
        return AnalysisOutcome::default();
    }
    AnalysisOutcome {
        needs_decomposition: true,
        sub_questions,
    }
}
