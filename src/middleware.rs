//! Request localization.
//!
//! Resolves the ambient locale of every request, exposes it to handlers as a
//! [`LocaleContext`] extension and stamps `Content-Language` on the response.

use crate::config::Config;
use crate::locale::{preferred_language, LocaleContext};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;
use tracing::debug;

/// Explicit locale override header.
pub const LOCALE_HEADER: &str = "x-locale";

/// Locale negotiation settings shared by every request.
#[derive(Debug, Clone)]
pub struct Localization {
    languages: Arc<[String]>,
    fallback: String,
}

impl Localization {
    /// # Arguments
    /// * `languages` - supported locales, first one preferred
    /// * `fallback` - locale used when nothing else resolves
    pub fn new(languages: Vec<String>, fallback: impl Into<String>) -> Self {
        Self {
            languages: languages.into(),
            fallback: fallback.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.languages.clone(), config.app_locale.clone())
    }

    /// Resolve the locale for a request: `x-locale` when present, else the
    /// Accept-Language preference against the supported languages, else the
    /// fallback.
    pub fn resolve(&self, headers: &HeaderMap) -> String {
        let explicit = headers
            .get(LOCALE_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty());

        if let Some(locale) = explicit {
            return locale.to_string();
        }

        let accept_language = headers
            .get(header::ACCEPT_LANGUAGE)
            .and_then(|value| value.to_str().ok());

        preferred_language(accept_language, &self.languages)
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Axum middleware; install with `axum::middleware::from_fn_with_state`.
pub async fn localization(
    State(localization): State<Localization>,
    mut request: Request,
    next: Next,
) -> Response {
    let locale = localization.resolve(request.headers());
    debug!(locale = %locale, path = %request.uri().path(), "Resolved request locale");
    request
        .extensions_mut()
        .insert(LocaleContext::new(locale.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&locale) {
        response
            .headers_mut()
            .insert(header::CONTENT_LANGUAGE, value);
    }
    response
}
