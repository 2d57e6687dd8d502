//! The iterative research engine: decompose → parallel-execute →
//! detect-gaps → iterate → synthesize.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use fin_domain::cancel::CancelToken;
use fin_domain::config::ResearchConfig;
use fin_domain::plan::{
    ResearchMeta, SourceRef, SubKind, SubOrigin, SubQuestion, SubResult,
};
use fin_domain::stream::{PipelineEvent, StreamEvent};
use fin_domain::{Error, Result};
use fin_providers::LlmProvider;

use crate::analyzer::analyze_query;
use crate::gaps::detect_gaps;
use crate::synthesizer::{synthesize, synthesize_stream};

/// Placeholder answer for analytical sub-questions; the synthesizer treats
/// it as "reason over the other results".
const DEFERRED_ANSWER: &str = "(to be synthesized)";

/// What the engine returns for a decomposed query.
#[derive(Debug, Clone)]
pub struct ResearchOutcome {
    pub text: String,
    pub sources: Vec<SourceRef>,
    pub meta: ResearchMeta,
}

/// How the engine reaches the outside world for one sub-question.
///
/// `numerical` is the structured-data path (a constrained agent run over
/// the market-data tools); `web` is a single web search. The engine owns
/// routing, fallback, timeouts, and failure isolation.
#[async_trait]
pub trait SubQuestionExecutor: Send + Sync {
    async fn numerical(&self, question: &str) -> Result<(String, Vec<SourceRef>)>;
    async fn web(&self, question: &str) -> Result<(String, Vec<SourceRef>)>;
}

/// Run the full research loop.
///
/// Returns `None` when the analyzer decides the query does not decompose —
/// the caller then uses the single-pass thinking-mode path. Status frames
/// (and, during synthesis, content chunks) go out over `events` when the
/// caller is streaming.
pub async fn run_iterative_research(
    analysis_provider: Arc<dyn LlmProvider>,
    synthesis_provider: Arc<dyn LlmProvider>,
    executor: Arc<dyn SubQuestionExecutor>,
    query: &str,
    time_ctx: &str,
    config: &ResearchConfig,
    cancel: CancelToken,
    events: Option<mpsc::Sender<PipelineEvent>>,
) -> Result<Option<ResearchOutcome>> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    emit(&events, PipelineEvent::status("analyzing question")).await;
    let analysis = analyze_query(analysis_provider.as_ref(), query, time_ctx, config.max_sub).await;
    if !analysis.needs_decomposition {
        tracing::debug!("query does not decompose, deferring to single-pass path");
        return Ok(None);
    }

    let original_plan = analysis.sub_questions.clone();
    let mut current_plan = analysis.sub_questions;
    let mut collected: Vec<(u32, usize, SubResult)> = Vec::new();
    let mut iterations: u32 = 0;

    while iterations < config.max_iterations {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        iterations += 1;

        emit(
            &events,
            PipelineEvent::status_detail(
                "researching",
                format!(
                    "{} sub-question(s), iteration {iterations}",
                    current_plan.len()
                ),
            ),
        )
        .await;

        let results =
            execute_plan(&current_plan, executor.clone(), config, cancel.clone()).await?;
        for (idx, result) in results {
            collected.push((iterations, idx, result));
        }

        if iterations >= config.max_iterations {
            break;
        }

        emit(&events, PipelineEvent::status("checking coverage")).await;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let flat: Vec<SubResult> = collected.iter().map(|(_, _, r)| r.clone()).collect();
        let report =
            detect_gaps(analysis_provider.as_ref(), query, &original_plan, &flat).await;
        if report.complete || report.follow_ups.is_empty() {
            break;
        }
        tracing::debug!(gaps = ?report.gaps, "gap detector requested follow-ups");
        current_plan = report.follow_ups;
    }

    // Stable order regardless of completion interleaving.
    collected.sort_by_key(|(iteration, idx, _)| (*iteration, *idx));
    let results: Vec<SubResult> = collected.into_iter().map(|(_, _, r)| r).collect();

    let mut meta = ResearchMeta {
        iterations,
        subq_count: results.len() as u32,
        ..Default::default()
    };
    let mut sources: Vec<SourceRef> = Vec::new();
    let mut seen_urls = std::collections::HashSet::new();
    for result in &results {
        match result.origin {
            SubOrigin::Tool => meta.tool_hits += 1,
            SubOrigin::Web => meta.web_hits += 1,
            _ => {}
        }
        for source in &result.sources {
            match &source.url {
                Some(url) if !seen_urls.insert(url.clone()) => {}
                _ => sources.push(source.clone()),
            }
        }
    }

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    emit(&events, PipelineEvent::status("synthesizing answer")).await;

    let text = match &events {
        // Streaming callers get synthesis token-by-token as content frames.
        Some(tx) => {
            let mut stream =
                synthesize_stream(synthesis_provider.as_ref(), query, &results, time_ctx).await?;
            let mut text = String::new();
            while let Some(event) = stream.next().await {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                match event? {
                    StreamEvent::Token { text: chunk } => {
                        let _ = tx.send(PipelineEvent::Content { chunk: chunk.clone() }).await;
                        text.push_str(&chunk);
                    }
                    StreamEvent::Error { message } => {
                        return Err(Error::Upstream {
                            provider: "synthesizer".into(),
                            message,
                        });
                    }
                    StreamEvent::Done { .. } => break,
                    _ => {}
                }
            }
            text
        }
        None => synthesize(synthesis_provider.as_ref(), query, &results, time_ctx).await?,
    };

    Ok(Some(ResearchOutcome {
        text,
        sources,
        meta,
    }))
}

async fn emit(events: &Option<mpsc::Sender<PipelineEvent>>, event: PipelineEvent) {
    if let Some(tx) = events {
        // Receiver loss means the client went away; cancellation follows.
        let _ = tx.send(event).await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// One plan iteration: bounded-parallel sub-question execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Execute every sub-question of one iteration in parallel (bounded by the
/// semaphore). Individual failures and timeouts become `origin=Error`
/// results; they never cancel siblings. Cancellation aborts everything
/// outstanding.
async fn execute_plan(
    plan: &[SubQuestion],
    executor: Arc<dyn SubQuestionExecutor>,
    config: &ResearchConfig,
    cancel: CancelToken,
) -> Result<Vec<(usize, SubResult)>> {
    let semaphore = Arc::new(Semaphore::new(config.max_parallel.max(1)));
    let sub_timeout = Duration::from_secs(config.sub_timeout_secs);
    let mut join_set: JoinSet<(usize, SubResult)> = JoinSet::new();

    for (idx, sub_question) in plan.iter().cloned().enumerate() {
        let semaphore = semaphore.clone();
        let executor = executor.clone();
        let cancel = cancel.clone();
        join_set.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            if cancel.is_cancelled() {
                return (idx, error_result(&sub_question, "cancelled"));
            }
            let result = drive_sub_question(&sub_question, executor.as_ref(), sub_timeout).await;
            (idx, result)
        });
    }

    // Collect as tasks finish, polling the cancel flag so a client
    // disconnect aborts outstanding sub-questions promptly instead of
    // waiting for the next completion.
    let mut poll = tokio::time::interval(Duration::from_millis(50));
    let mut results = Vec::with_capacity(plan.len());
    loop {
        tokio::select! {
            joined = join_set.join_next() => match joined {
                None => break,
                Some(Ok(entry)) => results.push(entry),
                Some(Err(e)) => tracing::warn!(error = %e, "sub-question task failed to join"),
            },
            _ = poll.tick() => {
                if cancel.is_cancelled() {
                    join_set.abort_all();
                    return Err(Error::Cancelled);
                }
            }
        }
    }
    Ok(results)
}

/// Route one sub-question per its kind and normalize the outcome.
async fn drive_sub_question(
    sub_question: &SubQuestion,
    executor: &dyn SubQuestionExecutor,
    sub_timeout: Duration,
) -> SubResult {
    match sub_question.kind {
        SubKind::Analytical => SubResult {
            sub_question: sub_question.clone(),
            answer: DEFERRED_ANSWER.into(),
            sources: Vec::new(),
            origin: SubOrigin::Deferred,
        },
        SubKind::Numerical => {
            let question = &sub_question.question;
            let tool_attempt =
                tokio::time::timeout(sub_timeout, executor.numerical(question)).await;
            match tool_attempt {
                Ok(Ok((answer, sources))) if !answer.trim().is_empty() => SubResult {
                    sub_question: sub_question.clone(),
                    answer,
                    sources,
                    origin: SubOrigin::Tool,
                },
                // Empty, failed, or timed out: one web-search fallback.
                other => {
                    if let Ok(Err(e)) = &other {
                        tracing::debug!(question, error = %e, "structured lookup failed, trying web");
                    }
                    match tokio::time::timeout(sub_timeout, executor.web(question)).await {
                        Ok(Ok((answer, sources))) => SubResult {
                            sub_question: sub_question.clone(),
                            answer,
                            sources,
                            origin: SubOrigin::Web,
                        },
                        Ok(Err(e)) => error_result(sub_question, &e.to_string()),
                        Err(_) => error_result(sub_question, "timed out"),
                    }
                }
            }
        }
        SubKind::Qualitative => {
            match tokio::time::timeout(sub_timeout, executor.web(&sub_question.question)).await {
                Ok(Ok((answer, sources))) => SubResult {
                    sub_question: sub_question.clone(),
                    answer,
                    sources,
                    origin: SubOrigin::Web,
                },
                Ok(Err(e)) => error_result(sub_question, &e.to_string()),
                Err(_) => error_result(sub_question, "timed out"),
            }
        }
    }
}

fn error_result(sub_question: &SubQuestion, detail: &str) -> SubResult {
    SubResult {
        sub_question: sub_question.clone(),
        answer: format!("lookup failed: {detail}"),
        sources: Vec::new(),
        origin: SubOrigin::Error,
    }
}
