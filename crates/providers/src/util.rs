use fin_domain::Error;

/// Map a reqwest error onto the domain error, preserving timeout identity.
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Wrap an HTTP-level failure from a named provider.
pub(crate) fn upstream(provider: &str, message: impl Into<String>) -> Error {
    Error::Upstream {
        provider: provider.to_string(),
        message: message.into(),
    }
}
