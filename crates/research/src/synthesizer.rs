//! Synthesizer: integrates every sub-result into a grounded final answer,
//! optionally streaming output tokens.

use fin_domain::stream::{BoxStream, StreamEvent};
use fin_domain::plan::{SubOrigin, SubResult};
use fin_domain::tool::Message;
use fin_domain::Result;
use fin_providers::{ChatRequest, LlmProvider};

const SYNTHESIS_INSTRUCTIONS: &str = r#"You write the final answer to a financial research question from gathered sub-results.

Rules:
- Use the exact values from the results; never alter or re-derive a figure that was looked up.
- Attribute each figure to its source when the result lists one.
- Do NOT aggregate numbers across different sources unless the user explicitly asked for an aggregate.
- Do NOT present partial data as a total. If a requested figure is missing or a lookup failed, say so explicitly.
- Never fabricate a value for anything the results do not contain.
- Results marked "(to be synthesized)" are analytical: answer them by reasoning over the other results.
- Write naturally; lead with the direct answer, then the supporting figures."#;

fn build_request(query: &str, results: &[SubResult], time_ctx: &str) -> ChatRequest {
    let mut body = format!("{time_ctx}\n\nQuestion: {query}\n\nGathered results:\n");
    for result in results {
        body.push_str(&format!("\n### {}\n{}\n", result.sub_question.question, result.answer));
        if result.origin == SubOrigin::Error {
            body.push_str("(this lookup failed; treat the value as unavailable)\n");
        }
        let sources: Vec<&str> = result
            .sources
            .iter()
            .filter_map(|s| s.url.as_deref())
            .collect();
        if !sources.is_empty() {
            body.push_str(&format!("Sources: {}\n", sources.join(", ")));
        }
    }

    ChatRequest {
        messages: vec![
            Message::system(SYNTHESIS_INSTRUCTIONS),
            Message::user(body),
        ],
        temperature: Some(0.3),
        ..Default::default()
    }
}

/// One-shot synthesis.
pub async fn synthesize(
    provider: &dyn LlmProvider,
    query: &str,
    results: &[SubResult],
    time_ctx: &str,
) -> Result<String> {
    let request = build_request(query, results, time_ctx);
    let response = provider.chat(&request).await?;
    Ok(response.content)
}

/// Streaming synthesis: the caller consumes token events as they arrive.
pub async fn synthesize_stream(
    provider: &dyn LlmProvider,
    query: &str,
    results: &[SubResult],
    time_ctx: &str,
) -> Result<BoxStream<'static, Result<StreamEvent>>> {
    let request = build_request(query, results, time_ctx);
    provider.chat_stream(&request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use fin_domain::plan::{SourceRef, SubKind, SubQuestion};

    fn result(question: &str, answer: &str, origin: SubOrigin) -> SubResult {
        SubResult {
            sub_question: SubQuestion {
                question: question.into(),
                kind: SubKind::Numerical,
            },
            answer: answer.into(),
            sources: vec![SourceRef::url("https://finance.yahoo.com/quote/AAPL")],
            origin,
        }
    }

    #[test]
    fn request_carries_every_result_and_source() {
        let results = vec![
            result("AAPL Q1 revenue", "$119.6B", SubOrigin::Tool),
            result("MSFT Q1 revenue", "$69.6B", SubOrigin::Web),
        ];
        let request = build_request("Compare AAPL and MSFT revenue", &results, "It is Q2 2025.");
        let body = request.messages[1].content.extract_all_text();
        assert!(body.contains("$119.6B"));
        assert!(body.contains("$69.6B"));
        assert!(body.contains("finance.yahoo.com"));
        assert!(body.contains("It is Q2 2025."));
    }

    #[test]
    fn failed_lookups_are_flagged_in_the_request() {
        let results = vec![result("NVDA Q3 revenue", "lookup timed out", SubOrigin::Error)];
        let request = build_request("NVDA revenue", &results, "");
        let body = request.messages[1].content.extract_all_text();
        assert!(body.contains("this lookup failed"));
    }
}
