//! Locale-specific attribute overrides for application entities.
//!
//! An entity implements [`Translatable`] to declare which attributes may be
//! overridden per locale. Wrapped in a [`Translated`] overlay together with a
//! [`TranslationStore`], its reads and serialization prefer the override for
//! the active locale and fall back to the entity's own base value, and field
//! submissions are routed to the entity (base locale) or to a translation
//! record (any other locale).
//!
//! # Example
//!
//! ```rust,ignore
//! use entity_translations::{LocaleContext, MemoryTranslationStore, Scope, Translated};
//!
//! let mut article = Translated::new(article, MemoryTranslationStore::new());
//! article
//!     .set_translations(Some("fr"), fields, Scope::new())
//!     .await?;
//!
//! let title = article.get_attribute("title", &LocaleContext::new("fr")).await;
//! ```

pub mod config;
pub mod error;
pub mod locale;
pub mod middleware;
pub mod overlay;
pub mod server;
pub mod store;

pub use error::{Result, TranslationError};
pub use locale::{FixedLocale, LocaleContext, LocaleProvider, BASE_LOCALE};
pub use overlay::{resolve_field, DeleteMode, Translatable, Translated, TranslationWrite};
pub use store::{
    MatchKey, MemoryTranslationStore, OwnerRef, PgTranslationStore, Scope, TranslationRecord,
    TranslationStore,
};
