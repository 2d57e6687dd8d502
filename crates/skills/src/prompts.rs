//! Prompt fragments as data.
//!
//! The base identity fragment, site-specific fragments, and skill
//! instruction templates are markdown files. Embedded copies ship with the
//! binary; an optional override directory replaces them at startup. Loaded
//! once, cached for the process lifetime.

use std::path::Path;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fragment store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PromptFragmentStore {
    base: String,
    default_site: String,
    summarize_page: String,
    /// (registered host suffix, fragment), longest suffix first.
    sites: Vec<(String, String)>,
}

impl PromptFragmentStore {
    /// Load fragments: embedded defaults, overridden file-by-file from
    /// `override_dir` when present.
    pub fn load(override_dir: Option<&Path>) -> Self {
        let read = |name: &str, embedded: &str| -> String {
            if let Some(dir) = override_dir {
                let path = dir.join(name);
                if let Ok(content) = std::fs::read_to_string(&path) {
                    tracing::debug!(path = %path.display(), "prompt fragment overridden");
                    return content;
                }
            }
            embedded.to_string()
        };

        let mut sites = vec![
            (
                "finance.yahoo.com".to_string(),
                read(
                    "sites/finance.yahoo.com.md",
                    include_str!("../prompts/sites/finance.yahoo.com.md"),
                ),
            ),
            (
                "tradingview.com".to_string(),
                read(
                    "sites/tradingview.com.md",
                    include_str!("../prompts/sites/tradingview.com.md"),
                ),
            ),
            (
                "sec.gov".to_string(),
                read("sites/sec.gov.md", include_str!("../prompts/sites/sec.gov.md")),
            ),
        ];

        // Any extra fragments dropped into the override dir register their
        // filename (minus .md) as a host suffix.
        if let Some(dir) = override_dir {
            if let Ok(entries) = std::fs::read_dir(dir.join("sites")) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                        continue;
                    };
                    if sites.iter().any(|(suffix, _)| suffix == stem) {
                        continue;
                    }
                    if let Ok(content) = std::fs::read_to_string(&path) {
                        sites.push((stem.to_string(), content));
                    }
                }
            }
        }

        // Longest suffix first so the most specific registration wins.
        sites.sort_by_key(|(suffix, _)| std::cmp::Reverse(suffix.len()));

        Self {
            base: read("base.md", include_str!("../prompts/base.md")),
            default_site: read("default_site.md", include_str!("../prompts/default_site.md")),
            summarize_page: read(
                "summarize_page.md",
                include_str!("../prompts/summarize_page.md"),
            ),
            sites,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn summarize_page(&self) -> &str {
        &self.summarize_page
    }

    /// Fragment for a host, by registered-suffix lookup; the generic
    /// default when nothing matches.
    pub fn site_fragment(&self, host: Option<&str>) -> &str {
        let Some(host) = host else {
            return &self.default_site;
        };
        self.sites
            .iter()
            .find(|(suffix, _)| host == suffix || host.ends_with(&format!(".{suffix}")))
            .map(|(_, fragment)| fragment.as_str())
            .unwrap_or(&self.default_site)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Assembler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Extract the host from a URL-ish string without a full parser dependency.
pub fn host_of(url: &str) -> Option<String> {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let host_port = rest.split(['/', '?', '#']).next()?;
    let host = host_port.split(':').next()?.trim();
    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}

/// Assemble the system prompt: base identity ⊕ site fragment ⊕ time
/// context ⊕ optional per-request override.
pub fn assemble_system_prompt(
    store: &PromptFragmentStore,
    current_url: Option<&str>,
    user_timezone: Option<&str>,
    user_clock_iso: Option<&str>,
    extra: Option<&str>,
) -> String {
    let host = current_url.and_then(host_of);
    let mut prompt = String::new();
    prompt.push_str(store.base());
    prompt.push_str("\n\n");
    prompt.push_str(store.site_fragment(host.as_deref()));
    prompt.push_str("\n\n");
    prompt.push_str(&time_context(user_timezone, user_clock_iso));
    if let Some(extra) = extra {
        prompt.push_str("\n\n");
        prompt.push_str(extra);
    }
    prompt
}

/// Human-readable time context. The user's own wall clock wins when the
/// extension sends it; otherwise the server clock rendered in their zone.
pub fn time_context(user_timezone: Option<&str>, user_clock_iso: Option<&str>) -> String {
    let tz_label = user_timezone.unwrap_or("UTC");
    if let Some(clock) = user_clock_iso {
        return format!("Current time for the user: {clock} ({tz_label})");
    }
    let now = chrono::Utc::now();
    let rendered = user_timezone
        .and_then(|tz| tz.parse::<chrono_tz::Tz>().ok())
        .map(|tz| now.with_timezone(&tz).to_rfc3339())
        .unwrap_or_else(|| now.to_rfc3339());
    format!("Current time for the user: {rendered} ({tz_label})")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> PromptFragmentStore {
        PromptFragmentStore::load(None)
    }

    #[test]
    fn host_extraction() {
        assert_eq!(
            host_of("https://ca.finance.yahoo.com/quote/AAPL?p=AAPL"),
            Some("ca.finance.yahoo.com".into())
        );
        assert_eq!(host_of("http://localhost:8864/x"), Some("localhost".into()));
        assert_eq!(host_of(""), None);
    }

    #[test]
    fn site_lookup_matches_registered_suffix() {
        let store = store();
        let yahoo = store.site_fragment(Some("finance.yahoo.com"));
        assert!(yahoo.contains("Yahoo Finance"));
        // Subdomain resolves to the same registered fragment.
        assert_eq!(store.site_fragment(Some("ca.finance.yahoo.com")), yahoo);
    }

    #[test]
    fn unknown_host_gets_default_fragment() {
        let store = store();
        let fragment = store.site_fragment(Some("news.example.org"));
        assert!(fragment.contains("browsing the open web"));
        assert_eq!(store.site_fragment(None), fragment);
    }

    #[test]
    fn suffix_match_requires_label_boundary() {
        let store = store();
        // "notsec.gov" must not match the "sec.gov" registration.
        let fragment = store.site_fragment(Some("notsec.gov"));
        assert!(!fragment.contains("EDGAR"));
    }

    #[test]
    fn assembled_prompt_contains_all_sections() {
        let store = store();
        let prompt = assemble_system_prompt(
            &store,
            Some("https://www.sec.gov/cgi-bin/browse-edgar"),
            Some("America/New_York"),
            Some("2025-03-07T09:30:00-05:00"),
            Some("Focus on the risk factors section."),
        );
        assert!(prompt.contains("financial research assistant"));
        assert!(prompt.contains("EDGAR"));
        assert!(prompt.contains("2025-03-07T09:30:00-05:00"));
        assert!(prompt.contains("America/New_York"));
        assert!(prompt.ends_with("Focus on the risk factors section."));
    }

    #[test]
    fn override_dir_replaces_embedded_fragment() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("base.md"), "OVERRIDDEN BASE").unwrap();
        let store = PromptFragmentStore::load(Some(dir.path()));
        assert_eq!(store.base(), "OVERRIDDEN BASE");
        // Non-overridden fragments keep their embedded content.
        assert!(store.site_fragment(Some("sec.gov")).contains("EDGAR"));
    }
}
