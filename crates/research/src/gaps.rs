//! Gap detector: given the original question, the plan, and everything
//! gathered so far, reports whether coverage is complete and proposes
//! follow-up sub-questions when it is not.

use fin_domain::plan::{GapReport, SubKind, SubQuestion, SubResult};
use fin_domain::tool::Message;
use fin_providers::{ChatRequest, LlmProvider};

use crate::parse_json_lenient;

/// Follow-ups are clamped to this many per iteration.
const MAX_FOLLOW_UPS: usize = 3;

const GAP_INSTRUCTIONS: &str = r#"You check whether gathered research answers a financial question completely.

Respond with JSON only, in this shape:
{"complete": <bool>, "gaps": ["<missing piece>"], "follow_ups": [{"question": "<text>", "kind": "numerical" | "qualitative" | "analytical"}]}

Rules:
- "complete": true when every figure and fact the question asks for is present in the results (an explicit "not found" counts as an answer).
- List at most 3 follow-ups, each targeting one specific missing piece.
- Do not re-ask sub-questions that already produced an answer or an explicit failure."#;

/// Run the gap detector. On any parse error the report claims completion,
/// so the research loop terminates gracefully.
pub async fn detect_gaps(
    provider: &dyn LlmProvider,
    query: &str,
    original_plan: &[SubQuestion],
    results: &[SubResult],
) -> GapReport {
    let plan_summary = original_plan
        .iter()
        .map(|sq| format!("- {}", sq.question))
        .collect::<Vec<_>>()
        .join("\n");
    let results_summary = results
        .iter()
        .map(|r| {
            format!(
                "- [{}] {} => {}",
                serde_json::to_value(r.origin)
                    .ok()
                    .and_then(|v| v.as_str().map(String::from))
                    .unwrap_or_default(),
                r.sub_question.question,
                r.answer
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let request = ChatRequest {
        messages: vec![
            Message::system(GAP_INSTRUCTIONS),
            Message::user(format!(
                "Question: {query}\n\nOriginal plan:\n{plan_summary}\n\nGathered results:\n{results_summary}"
            )),
        ],
        temperature: Some(0.0),
        json_mode: true,
        ..Default::default()
    };

    let response = match provider.chat(&request).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "gap detector call failed, treating research as complete");
            return GapReport::complete();
        }
    };

    parse_report(&response.content)
}

/// Lenient parse of the detector's JSON.
pub fn parse_report(raw: &str) -> GapReport {
    let Some(value) = parse_json_lenient(raw) else {
        return GapReport::complete();
    };
    let Some(complete) = value["complete"].as_bool() else {
        return GapReport::complete();
    };

    let gaps = value["gaps"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    let follow_ups = value["follow_ups"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .take(MAX_FOLLOW_UPS)
                .filter_map(|item| {
                    let question = item["question"].as_str()?.trim().to_string();
                    if question.is_empty() {
                        return None;
                    }
                    let kind = match item["kind"].as_str() {
                        Some("numerical") => SubKind::Numerical,
                        Some("analytical") => SubKind::Analytical,
                        _ => SubKind::Qualitative,
                    };
                    Some(SubQuestion { question, kind })
                })
                .collect()
        })
        .unwrap_or_default();

    GapReport {
        complete,
        gaps,
        follow_ups,
    }
}
