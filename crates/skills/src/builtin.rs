//! The built-in skills, in priority order. Matching is regex/keyword
//! classification over the query plus the injected-page flag; scores are
//! stable for identical inputs.

use std::sync::LazyLock;

use regex::Regex;

use fin_domain::plan::ToolSelection;

use crate::prompts::PromptFragmentStore;
use crate::skill::{Skill, SkillContext};

fn keyword_regex(pattern: &str) -> Regex {
    Regex::new(&format!(r"(?i)\b(?:{pattern})\b")).expect("static keyword pattern")
}

/// Score from a keyword matcher: a base for any hit plus a small boost per
/// additional distinct hit, capped below the next tier.
fn keyword_score(re: &Regex, query: &str, base: f32) -> f32 {
    let hits = re.find_iter(query).count();
    if hits == 0 {
        return 0.0;
    }
    (base + 0.05 * (hits.min(4) as f32 - 1.0)).min(base + 0.15)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// summarize_page
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

static SUMMARY_INTENT: LazyLock<Regex> = LazyLock::new(|| {
    keyword_regex(
        "summarize|summary|summarise|explain|tl;?dr|overview|key points|what does this (?:page|article|say)",
    )
});

static DATA_LOOKUP: LazyLock<Regex> = LazyLock::new(|| {
    keyword_regex(
        "price|quote|market cap|p/?e|dividend|volume|options?|strike|revenue|eps|ebitda|earnings|rsi|macd|bollinger",
    )
});

/// Zero tools, one turn: the page is already in hand, the model only
/// restates it.
pub struct SummarizePage;

impl Skill for SummarizePage {
    fn name(&self) -> &'static str {
        "summarize_page"
    }

    fn allowed_tools(&self) -> ToolSelection {
        ToolSelection::none()
    }

    fn max_turns(&self) -> u32 {
        1
    }

    fn match_score(&self, ctx: &SkillContext<'_>) -> f32 {
        if ctx.has_injected_page
            && SUMMARY_INTENT.is_match(ctx.query)
            && !DATA_LOOKUP.is_match(ctx.query)
        {
            0.9
        } else {
            0.0
        }
    }

    fn instruction_override(
        &self,
        ctx: &SkillContext<'_>,
        prompts: &PromptFragmentStore,
    ) -> Option<String> {
        let page = ctx.injected_page?;
        Some(format!(
            "{}\n\n[CURRENT PAGE CONTENT - Already scraped, do NOT re-scrape]: {}",
            prompts.summarize_page(),
            page
        ))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// stock_fundamentals
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

static FUNDAMENTALS: LazyLock<Regex> = LazyLock::new(|| {
    keyword_regex(
        "price|quote|market cap|p/?e(?: ratio)?|dividend(?: yield)?|52[- ]week|day'?s? range|volume|shares outstanding|beta|valuation",
    )
});

static OPTIONS: LazyLock<Regex> = LazyLock::new(|| {
    keyword_regex(
        "options?(?: chain| summary)?|puts?|calls?|strike|open interest|implied volatility|\\biv\\b|put[- /]call|expir(?:y|ation)|greeks|delta|theta|gamma",
    )
});

pub struct StockFundamentals;

impl Skill for StockFundamentals {
    fn name(&self) -> &'static str {
        "stock_fundamentals"
    }

    fn allowed_tools(&self) -> ToolSelection {
        ToolSelection::named(["get_stock_info", "get_stock_history", "calculate"])
    }

    fn max_turns(&self) -> u32 {
        3
    }

    fn match_score(&self, ctx: &SkillContext<'_>) -> f32 {
        // Options-flavored queries belong to options_analysis.
        if OPTIONS.is_match(ctx.query) {
            return 0.0;
        }
        keyword_score(&FUNDAMENTALS, ctx.query, 0.6)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// options_analysis
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OptionsAnalysis;

impl Skill for OptionsAnalysis {
    fn name(&self) -> &'static str {
        "options_analysis"
    }

    fn allowed_tools(&self) -> ToolSelection {
        ToolSelection::named(["get_options_summary", "get_options_chain", "calculate"])
    }

    fn max_turns(&self) -> u32 {
        3
    }

    fn match_score(&self, ctx: &SkillContext<'_>) -> f32 {
        keyword_score(&OPTIONS, ctx.query, 0.65)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// financial_statements
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

static STATEMENTS: LazyLock<Regex> = LazyLock::new(|| {
    keyword_regex(
        "revenue|eps|ebitda|margins?|earnings(?: date| call| report)?|net income|gross profit|operating income|income statement|balance sheet|cash flow|guidance|fiscal (?:year|quarter)|10-[kq]",
    )
});

pub struct FinancialStatements;

impl Skill for FinancialStatements {
    fn name(&self) -> &'static str {
        "financial_statements"
    }

    fn allowed_tools(&self) -> ToolSelection {
        ToolSelection::named(["get_stock_financials", "get_earnings_info", "calculate"])
    }

    fn max_turns(&self) -> u32 {
        3
    }

    fn match_score(&self, ctx: &SkillContext<'_>) -> f32 {
        keyword_score(&STATEMENTS, ctx.query, 0.62)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// technical_analysis
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

static TECHNICALS: LazyLock<Regex> = LazyLock::new(|| {
    keyword_regex(
        "rsi|macd|bollinger|moving averages?|\\bs?ma\\b|\\bema\\b|support|resistance|candle(?:stick)?s?|golden cross|death cross|momentum|overbought|oversold|breakout|fibonacci",
    )
});

pub struct TechnicalAnalysis;

impl Skill for TechnicalAnalysis {
    fn name(&self) -> &'static str {
        "technical_analysis"
    }

    fn allowed_tools(&self) -> ToolSelection {
        ToolSelection::named(["get_technical_indicators", "get_stock_history", "calculate"])
    }

    fn max_turns(&self) -> u32 {
        3
    }

    fn match_score(&self, ctx: &SkillContext<'_>) -> f32 {
        keyword_score(&TECHNICALS, ctx.query, 0.63)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// web_research (fallback)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The registry's last entry. Its strictly positive floor guarantees the
/// planner always has a pick.
pub struct WebResearch;

impl Skill for WebResearch {
    fn name(&self) -> &'static str {
        "web_research"
    }

    fn allowed_tools(&self) -> ToolSelection {
        ToolSelection::All
    }

    fn max_turns(&self) -> u32 {
        10
    }

    fn match_score(&self, _ctx: &SkillContext<'_>) -> f32 {
        0.1
    }
}
