//! Research-mode wiring: how the engine's sub-questions reach the tool
//! registry and the web-search client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use fin_domain::cancel::CancelToken;
use fin_domain::plan::{ExecutionPlan, SourceRef, ToolSelection};
use fin_domain::stream::PipelineEvent;
use fin_domain::tool::Message;
use fin_domain::Result;
use fin_providers::LlmProvider;
use fin_research::{run_iterative_research, ResearchOutcome, SubQuestionExecutor};

use crate::runtime::agent::{run_skill, AgentDeps};
use crate::state::AppState;

/// Tools the numerical path is biased toward: structured market data plus
/// the calculator.
const NUMERICAL_TOOLS: [&str; 7] = [
    "get_stock_info",
    "get_stock_history",
    "get_stock_financials",
    "get_earnings_info",
    "get_options_summary",
    "get_technical_indicators",
    "calculate",
];

const NUMERICAL_INSTRUCTIONS: &str = "Answer the question using the structured \
market-data tools. Report the exact figures the tools return, with units and \
the period they cover. If the tools cannot produce the figure, reply with an \
empty message.";

/// Executor backed by the gateway's tool registry and web-search client.
pub struct GatewayExecutor {
    state: AppState,
    provider: Arc<dyn LlmProvider>,
    search_domains: Vec<String>,
    cancel: CancelToken,
    time_ctx: String,
}

impl GatewayExecutor {
    pub fn new(
        state: AppState,
        provider: Arc<dyn LlmProvider>,
        search_domains: Vec<String>,
        cancel: CancelToken,
        time_ctx: String,
    ) -> Self {
        Self {
            state,
            provider,
            search_domains,
            cancel,
            time_ctx,
        }
    }
}

#[async_trait]
impl SubQuestionExecutor for GatewayExecutor {
    /// A constrained thinking-mode run over the market-data tools.
    async fn numerical(&self, question: &str) -> Result<(String, Vec<SourceRef>)> {
        let plan = ExecutionPlan {
            skill_name: "research_numerical".into(),
            allowed_tools: ToolSelection::named(NUMERICAL_TOOLS),
            max_turns: 3,
            instruction_override: None,
        };
        let messages = vec![
            Message::system(format!("{NUMERICAL_INSTRUCTIONS}\n\n{}", self.time_ctx)),
            Message::user(question.to_string()),
        ];
        let deps = AgentDeps {
            provider: self.provider.as_ref(),
            tools: &self.state.tools,
            tool_cache: Some(&self.state.tool_cache),
            tool_timeout: Duration::from_secs(self.state.config.tools.tool_timeout_secs),
        };
        let outcome = run_skill(&deps, &plan, messages, &self.cancel, None).await?;
        let sources = outcome
            .tools_used
            .iter()
            .map(|tool| SourceRef {
                url: None,
                title: Some(format!("{tool} (market data)")),
            })
            .collect();
        Ok((outcome.text, sources))
    }

    /// A single web search.
    async fn web(&self, question: &str) -> Result<(String, Vec<SourceRef>)> {
        self.state
            .web_search
            .search_rendered(question, &self.search_domains)
            .await
    }
}

/// Entry point the handlers call for research mode. `None` means the query
/// did not decompose and the caller should run the single-pass path.
#[allow(clippy::too_many_arguments)]
pub async fn run_research(
    state: &AppState,
    provider: Arc<dyn LlmProvider>,
    query: &str,
    time_ctx: &str,
    search_domains: Vec<String>,
    cancel: CancelToken,
    events: Option<mpsc::Sender<PipelineEvent>>,
) -> Result<Option<ResearchOutcome>> {
    let analysis_provider = state.llm.resolve_analysis()?;
    let executor = Arc::new(GatewayExecutor::new(
        state.clone(),
        provider.clone(),
        search_domains,
        cancel.clone(),
        time_ctx.to_string(),
    ));

    run_iterative_research(
        analysis_provider,
        provider,
        executor,
        query,
        time_ctx,
        &state.config.research,
        cancel,
        events,
    )
    .await
}
