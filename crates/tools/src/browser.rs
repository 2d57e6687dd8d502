//! Scoped headless-browser sessions.
//!
//! Pages are never shared: each invocation launches its own browser, runs
//! its actions, and releases the page and browser process unconditionally.
//! When the same-origin restriction is in force, navigation is pinned to
//! the host of the first navigated URL; cross-host attempts fail without
//! navigating.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures_util::StreamExt;
use reqwest::Url;
use serde::Deserialize;

use fin_domain::config;
use fin_domain::tool::ToolDefinition;
use fin_domain::{Error, Result};

use crate::web::extract_readable_text;
use crate::Tool;

fn browser_error(message: impl Into<String>) -> Error {
    Error::ToolFailed {
        tool: "browse_page".into(),
        message: message.into(),
    }
}

/// Extract the host from a URL string.
fn url_host(raw: &str) -> Result<String> {
    let parsed = Url::parse(raw).map_err(|e| browser_error(format!("invalid URL: {e}")))?;
    parsed
        .host_str()
        .map(str::to_owned)
        .ok_or_else(|| browser_error("URL has no host"))
}

/// Decide whether navigation from `pinned` to `target` is allowed under the
/// same-origin restriction.
pub fn navigation_allowed(pinned: Option<&str>, target_host: &str, same_origin: bool) -> bool {
    if !same_origin {
        return true;
    }
    match pinned {
        None => true,
        Some(host) => host == target_host,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scoped session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct BrowserSession {
    browser: Browser,
    handler_task: tokio::task::JoinHandle<()>,
    page: Page,
    pinned_host: Option<String>,
    same_origin: bool,
}

impl BrowserSession {
    pub async fn launch(config: &config::BrowserConfig) -> Result<Self> {
        let mut builder = BrowserConfig::builder();
        for arg in &config.launch_args {
            builder = builder.arg(arg);
        }
        let browser_config = builder.build().map_err(browser_error)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| browser_error(format!("browser launch failed: {e}")))?;

        // The handler stream must be pumped for the CDP connection to work.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| browser_error(format!("page open failed: {e}")))?;

        Ok(Self {
            browser,
            handler_task,
            page,
            pinned_host: None,
            same_origin: config.same_origin,
        })
    }

    /// Navigate the page. The first navigation pins the session's host when
    /// the same-origin restriction is in force.
    pub async fn navigate(&mut self, url: &str) -> Result<()> {
        let host = url_host(url)?;
        if !navigation_allowed(self.pinned_host.as_deref(), &host, self.same_origin) {
            return Err(browser_error(format!(
                "navigation blocked: session is restricted to {}, refusing {host}",
                self.pinned_host.as_deref().unwrap_or("(unset)")
            )));
        }

        self.page
            .goto(url)
            .await
            .map_err(|e| browser_error(format!("navigation failed: {e}")))?;
        self.page
            .wait_for_navigation()
            .await
            .map_err(|e| browser_error(format!("load failed: {e}")))?;

        if self.pinned_host.is_none() {
            self.pinned_host = Some(host);
        }
        Ok(())
    }

    pub async fn click(&self, selector: &str) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| browser_error(format!("selector {selector:?} not found: {e}")))?;
        element
            .click()
            .await
            .map_err(|e| browser_error(format!("click failed: {e}")))?;
        Ok(())
    }

    pub async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| browser_error(format!("selector {selector:?} not found: {e}")))?;
        element
            .click()
            .await
            .map_err(|e| browser_error(format!("focus failed: {e}")))?;
        element
            .type_str(value)
            .await
            .map_err(|e| browser_error(format!("type failed: {e}")))?;
        Ok(())
    }

    pub async fn extract_text(&self, max_chars: usize) -> Result<String> {
        let html = self
            .page
            .content()
            .await
            .map_err(|e| browser_error(format!("content read failed: {e}")))?;
        Ok(extract_readable_text(&html, max_chars))
    }

    /// Release the page and the browser process. Errors during teardown are
    /// logged, never surfaced.
    pub async fn close(mut self) {
        if let Err(e) = self.page.close().await {
            tracing::debug!(error = %e, "browser page close failed");
        }
        if let Err(e) = self.browser.close().await {
            tracing::debug!(error = %e, "browser close failed");
        }
        if let Err(e) = self.browser.wait().await {
            tracing::debug!(error = %e, "browser wait failed");
        }
        self.handler_task.abort();
    }
}

/// Acquire a scoped browser session, run `body`, and unconditionally
/// release the session afterwards.
pub async fn with_browser<T, F, Fut>(config: &config::BrowserConfig, body: F) -> Result<T>
where
    F: FnOnce(BrowserSession) -> Fut,
    Fut: std::future::Future<Output = (BrowserSession, Result<T>)>,
{
    let session = BrowserSession::launch(config).await?;
    let (session, result) = body(session).await;
    session.close().await;
    result
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool wrapper
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum BrowserAction {
    Click { selector: String },
    Fill { selector: String, value: String },
}

#[derive(Debug, Deserialize)]
struct BrowseArgs {
    url: String,
    #[serde(default)]
    actions: Vec<BrowserAction>,
}

pub struct BrowsePageTool {
    config: config::BrowserConfig,
    max_text_chars: usize,
}

impl BrowsePageTool {
    pub fn new(config: config::BrowserConfig, max_text_chars: usize) -> Self {
        Self {
            config,
            max_text_chars,
        }
    }
}

#[async_trait]
impl Tool for BrowsePageTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "browse_page".into(),
            description: "Open a page in a headless browser, optionally click/fill \
                          elements, and return the page's readable text."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "URL to open" },
                    "actions": {
                        "type": "array",
                        "description": "Interactions to perform after load",
                        "items": {
                            "type": "object",
                            "properties": {
                                "type": { "type": "string", "enum": ["click", "fill"] },
                                "selector": { "type": "string" },
                                "value": { "type": "string" }
                            },
                            "required": ["type", "selector"]
                        }
                    }
                },
                "required": ["url"]
            }),
        }
    }

    async fn invoke(&self, args: serde_json::Value) -> Result<String> {
        let args: BrowseArgs = serde_json::from_value(args)
            .map_err(|e| Error::InputInvalid(format!("browse_page arguments: {e}")))?;
        let max_chars = self.max_text_chars;

        with_browser(&self.config, |mut session| async move {
            let result = async {
                session.navigate(&args.url).await?;
                for action in &args.actions {
                    match action {
                        BrowserAction::Click { selector } => session.click(selector).await?,
                        BrowserAction::Fill { selector, value } => {
                            session.fill(selector, value).await?
                        }
                    }
                }
                session.extract_text(max_chars).await
            }
            .await;
            (session, result)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_navigation_is_always_allowed() {
        assert!(navigation_allowed(None, "finance.yahoo.com", true));
        assert!(navigation_allowed(None, "finance.yahoo.com", false));
    }

    #[test]
    fn cross_host_blocked_only_under_restriction() {
        assert!(!navigation_allowed(
            Some("finance.yahoo.com"),
            "evil.example",
            true
        ));
        assert!(navigation_allowed(
            Some("finance.yahoo.com"),
            "evil.example",
            false
        ));
    }

    #[test]
    fn same_host_allowed_under_restriction() {
        assert!(navigation_allowed(
            Some("finance.yahoo.com"),
            "finance.yahoo.com",
            true
        ));
    }

    #[test]
    fn action_args_parse() {
        let args: BrowseArgs = serde_json::from_value(serde_json::json!({
            "url": "https://finance.yahoo.com/quote/AAPL",
            "actions": [
                {"type": "click", "selector": "#consent"},
                {"type": "fill", "selector": "input[name=q]", "value": "MSFT"}
            ]
        }))
        .unwrap();
        assert_eq!(args.actions.len(), 2);
    }
}
