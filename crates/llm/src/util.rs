//! Shared helpers for provider adapters.

use gb_domain::error::Error;

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Map a non-success provider response to the right error kind.
///
/// 429 and 529 (and bodies naming `overloaded_error` / `rate_limit_error`)
/// become [`Error::Overloaded`] so the client's backoff policy kicks in;
/// everything else is a plain provider error.
pub(crate) fn status_to_error(provider: &str, status: u16, body: &str) -> Error {
    let overloaded = matches!(status, 429 | 529)
        || body.contains("overloaded_error")
        || body.contains("rate_limit_error");

    if overloaded {
        Error::Overloaded(format!("{provider}: HTTP {status}"))
    } else {
        Error::Provider {
            provider: provider.to_owned(),
            message: format!("HTTP {status} - {body}"),
        }
    }
}
