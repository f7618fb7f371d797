//! Locale resolution: ambient request locale, optional locale providers and
//! Accept-Language negotiation.
//!
//! There is no process-wide "current locale". Each request (or any other unit
//! of work) carries a [`LocaleContext`], and every read path receives it
//! explicitly.

use std::cmp::Ordering;
use std::fmt;

/// Base-language sentinel. Submissions in this locale update the entity
/// itself instead of a translation record.
pub const BASE_LOCALE: &str = "en";

/// Maximum length of a locale tag accepted by the stores.
pub const MAX_LOCALE_LEN: usize = 10;

/// The ambient locale of the current request or operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocaleContext {
    locale: String,
}

impl LocaleContext {
    /// Create a context for the given locale tag.
    pub fn new(locale: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
        }
    }

    /// The ambient locale tag (e.g. "fr", "pt-BR").
    pub fn locale(&self) -> &str {
        &self.locale
    }
}

impl Default for LocaleContext {
    fn default() -> Self {
        Self::new(BASE_LOCALE)
    }
}

impl fmt::Display for LocaleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.locale)
    }
}

/// Capability a translation store binding may expose to force the locale
/// every overlay built on it resolves to.
pub trait LocaleProvider: fmt::Debug + Send + Sync {
    fn default_locale(&self) -> String;
}

/// A [`LocaleProvider`] that always answers with the same locale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedLocale(pub String);

impl FixedLocale {
    pub fn new(locale: impl Into<String>) -> Self {
        Self(locale.into())
    }
}

impl LocaleProvider for FixedLocale {
    fn default_locale(&self) -> String {
        self.0.clone()
    }
}

/// Determine the locale an entity should be read in.
///
/// Precedence:
/// 1. the store binding's [`LocaleProvider`], if it has one
/// 2. the instance-level default set on the entity overlay
/// 3. the ambient locale from `ctx`
pub fn determine_locale(
    provider: Option<&dyn LocaleProvider>,
    instance_default: Option<&str>,
    ctx: &LocaleContext,
) -> String {
    if let Some(provider) = provider {
        return provider.default_locale();
    }

    instance_default
        .map(str::to_string)
        .unwrap_or_else(|| ctx.locale().to_string())
}

/// Parse an `Accept-Language` header value.
///
/// # Returns
/// Language tags ordered by descending quality. Ties keep header order.
/// Wildcards, entries with `q=0` and entries with an unparseable quality
/// are dropped.
///
/// # Example
/// ```
/// use entity_translations::locale::parse_accept_language;
///
/// let tags = parse_accept_language("fr;q=0.8, en-US, de;q=0.9");
/// assert_eq!(tags, vec!["en-US", "de", "fr"]);
/// ```
pub fn parse_accept_language(header: &str) -> Vec<String> {
    let mut weighted: Vec<(String, f32)> = header
        .split(',')
        .filter_map(|entry| {
            let mut parts = entry.split(';');
            let tag = parts.next()?.trim();
            if tag.is_empty() || tag == "*" {
                return None;
            }

            let mut quality = 1.0_f32;
            for param in parts {
                let param = param.trim();
                if let Some(value) = param.strip_prefix("q=") {
                    quality = value.trim().parse().ok()?;
                }
            }

            (quality > 0.0).then(|| (tag.to_string(), quality))
        })
        .collect();

    // sort_by is stable, so equal weights keep their header order
    weighted.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    weighted.into_iter().map(|(tag, _)| tag).collect()
}

/// Pick the best locale from an `Accept-Language` header.
///
/// # Arguments
/// * `header` - the raw header value, if the request carried one
/// * `allowed` - the application's supported locales, in priority order
///
/// # Returns
/// * with no allowed locales: the client's first preference, if any
/// * with no client preference: the first allowed locale
/// * otherwise the first preference that matches an allowed locale (a
///   regional tag also tries its primary language), else the first allowed
///   locale
pub fn preferred_language(header: Option<&str>, allowed: &[String]) -> Option<String> {
    let preferred = header.map(parse_accept_language).unwrap_or_default();

    if allowed.is_empty() {
        return preferred.into_iter().next();
    }
    if preferred.is_empty() {
        return allowed.first().cloned();
    }

    let mut candidates: Vec<String> = Vec::with_capacity(preferred.len() * 2);
    for tag in &preferred {
        candidates.push(normalize_tag(tag));
        if let Some((primary, _)) = tag.split_once(['-', '_']) {
            let primary = normalize_tag(primary);
            let already_preferred = preferred.iter().any(|p| normalize_tag(p) == primary);
            if !already_preferred {
                candidates.push(primary);
            }
        }
    }

    candidates
        .iter()
        .find_map(|candidate| {
            allowed
                .iter()
                .find(|locale| normalize_tag(locale) == *candidate)
                .cloned()
        })
        .or_else(|| allowed.first().cloned())
}

fn normalize_tag(tag: &str) -> String {
    tag.trim().replace('_', "-").to_ascii_lowercase()
}
