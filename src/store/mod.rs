//! Translation records and the stores that persist them.
//!
//! A record belongs to exactly one owner entity (polymorphic type + id), one
//! locale and one scope of extra matching attributes. Stores guarantee at most
//! one record per `(owner_type, owner_id, locale, scope)` by making upsert
//! atomic.

mod memory;
mod postgres;

pub use memory::MemoryTranslationStore;
pub use postgres::PgTranslationStore;

use crate::error::{Result, TranslationError};
use crate::locale::{LocaleProvider, MAX_LOCALE_LEN};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Default storage location for translation records.
pub const DEFAULT_TABLE: &str = "translations";

/// Extra matching attributes of a translation record, kept sorted so the
/// serialized form is canonical.
pub type Scope = BTreeMap<String, Value>;

/// A locale-specific set of attribute overrides for one owner entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationRecord {
    pub id: i64,
    pub translatable_type: String,
    pub translatable_id: i64,
    pub locale: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scope: Scope,
    pub data: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TranslationRecord {
    /// Look up an override value by attribute name.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Whether this record belongs to `owner`.
    pub fn is_owned_by(&self, owner: &OwnerRef) -> bool {
        owner.owner_id == Some(self.translatable_id) && owner.owner_type == self.translatable_type
    }

    pub(crate) fn matches(&self, key: &MatchKey) -> bool {
        self.is_owned_by(&key.owner) && self.locale == key.locale && self.scope == key.scope
    }
}

/// Identifies the owner of a set of translation records.
///
/// `owner_id` is `None` for entities that have not been persisted yet; such
/// owners have no records and cannot receive writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerRef {
    pub owner_type: String,
    pub owner_id: Option<i64>,
}

impl OwnerRef {
    pub fn new(owner_type: impl Into<String>, owner_id: Option<i64>) -> Self {
        Self {
            owner_type: owner_type.into(),
            owner_id,
        }
    }
}

/// The uniqueness key a translation upsert matches against.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchKey {
    pub owner: OwnerRef,
    pub locale: String,
    pub scope: Scope,
}

impl MatchKey {
    pub fn new(owner: OwnerRef, locale: impl Into<String>) -> Self {
        Self {
            owner,
            locale: locale.into(),
            scope: Scope::new(),
        }
    }

    /// Add extra matching attributes to the key.
    pub fn with_scope(mut self, scope: impl IntoIterator<Item = (String, Value)>) -> Self {
        self.scope.extend(scope);
        self
    }
}

/// Durable storage for translation records.
///
/// Implementations must make [`upsert`](TranslationStore::upsert) atomic:
/// concurrent calls with the same [`MatchKey`] may never leave two records
/// behind.
#[async_trait]
pub trait TranslationStore: Send + Sync {
    /// Every record owned by `owner`, ordered by id.
    async fn find_for_owner(&self, owner: &OwnerRef) -> Result<Vec<TranslationRecord>>;

    /// The first record owned by `owner` in `locale`, if any.
    async fn find_by_owner_and_locale(
        &self,
        owner: &OwnerRef,
        locale: &str,
    ) -> Result<Option<TranslationRecord>>;

    /// Replace the data of the record matching `key`, creating it if needed.
    async fn upsert(&self, key: &MatchKey, data: &Map<String, Value>) -> Result<TranslationRecord>;

    /// Remove every record owned by `owner`, returning how many were removed.
    async fn delete_all_for_owner(&self, owner: &OwnerRef) -> Result<u64>;

    /// Locale every overlay on this store should resolve to, if the binding
    /// forces one.
    fn locale_provider(&self) -> Option<&dyn LocaleProvider> {
        None
    }
}

/// Check a translation write before it touches storage.
///
/// # Returns
/// The owner id on success, so callers don't have to unwrap it again.
pub fn validate_write(key: &MatchKey, data: &Map<String, Value>) -> Result<i64> {
    let owner_id = key
        .owner
        .owner_id
        .ok_or_else(|| TranslationError::validation("translatable_id", "is required"))?;

    if key.owner.owner_type.trim().is_empty() {
        return Err(TranslationError::validation(
            "translatable_type",
            "must not be empty",
        ));
    }

    if key.locale.trim().is_empty() {
        return Err(TranslationError::validation("locale", "must not be empty"));
    }

    if key.locale.chars().count() > MAX_LOCALE_LEN {
        return Err(TranslationError::validation(
            "locale",
            format!(
                "'{}' exceeds {} characters",
                key.locale, MAX_LOCALE_LEN
            ),
        ));
    }

    if data.is_empty() {
        return Err(TranslationError::validation("data", "must not be empty"));
    }

    Ok(owner_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn article(id: Option<i64>) -> OwnerRef {
        OwnerRef::new("Article", id)
    }

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object literal")
    }

    fn record(locale: &str) -> TranslationRecord {
        let now = Utc::now();
        TranslationRecord {
            id: 1,
            translatable_type: "Article".to_string(),
            translatable_id: 7,
            locale: locale.to_string(),
            scope: Scope::new(),
            data: data(json!({"title": "Bonjour"})),
            created_at: now,
            updated_at: now,
        }
    }

    // ==================== validate_write Tests ====================

    #[test]
    fn test_validate_accepts_well_formed_write() {
        let key = MatchKey::new(article(Some(7)), "fr");
        let owner_id = validate_write(&key, &data(json!({"title": "Bonjour"}))).expect("valid");
        assert_eq!(owner_id, 7);
    }

    #[test]
    fn test_validate_rejects_missing_owner_id() {
        let key = MatchKey::new(article(None), "fr");
        let err = validate_write(&key, &data(json!({"title": "Bonjour"}))).unwrap_err();
        assert!(matches!(
            err,
            TranslationError::Validation {
                field: "translatable_id",
                ..
            }
        ));
    }

    #[test]
    fn test_validate_rejects_blank_owner_type() {
        let key = MatchKey::new(OwnerRef::new("  ", Some(7)), "fr");
        let err = validate_write(&key, &data(json!({"title": "Bonjour"}))).unwrap_err();
        assert!(matches!(
            err,
            TranslationError::Validation {
                field: "translatable_type",
                ..
            }
        ));
    }

    #[test]
    fn test_validate_rejects_empty_locale() {
        let key = MatchKey::new(article(Some(7)), "");
        let err = validate_write(&key, &data(json!({"title": "Bonjour"}))).unwrap_err();
        assert!(matches!(err, TranslationError::Validation { field: "locale", .. }));
    }

    #[test]
    fn test_validate_locale_length_boundary() {
        let ten = MatchKey::new(article(Some(7)), "abcdefghij");
        assert!(validate_write(&ten, &data(json!({"title": "x"}))).is_ok());

        let eleven = MatchKey::new(article(Some(7)), "abcdefghijk");
        let err = validate_write(&eleven, &data(json!({"title": "x"}))).unwrap_err();
        assert!(err.to_string().contains("exceeds 10 characters"));
    }

    #[test]
    fn test_validate_counts_characters_not_bytes() {
        let key = MatchKey::new(article(Some(7)), "çççççççççç");
        assert!(validate_write(&key, &data(json!({"title": "x"}))).is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_data() {
        let key = MatchKey::new(article(Some(7)), "fr");
        let err = validate_write(&key, &Map::new()).unwrap_err();
        assert!(matches!(err, TranslationError::Validation { field: "data", .. }));
    }

    // ==================== MatchKey Tests ====================

    #[test]
    fn test_match_key_scope_is_sorted() {
        let key = MatchKey::new(article(Some(7)), "fr").with_scope([
            ("region".to_string(), json!("ca")),
            ("channel".to_string(), json!("web")),
        ]);
        let keys: Vec<_> = key.scope.keys().cloned().collect();
        assert_eq!(keys, vec!["channel", "region"]);
    }

    // ==================== TranslationRecord Tests ====================

    #[test]
    fn test_record_matches_owner_locale_and_scope() {
        let rec = record("fr");
        assert!(rec.matches(&MatchKey::new(article(Some(7)), "fr")));
        assert!(!rec.matches(&MatchKey::new(article(Some(7)), "es")));
        assert!(!rec.matches(&MatchKey::new(article(Some(8)), "fr")));
        assert!(!rec.matches(&MatchKey::new(OwnerRef::new("Product", Some(7)), "fr")));
        assert!(!rec.matches(
            &MatchKey::new(article(Some(7)), "fr")
                .with_scope([("channel".to_string(), json!("web"))])
        ));
    }

    #[test]
    fn test_record_serializes_with_column_names() {
        let value = serde_json::to_value(record("fr")).expect("serialize");
        assert_eq!(value["translatable_type"], "Article");
        assert_eq!(value["translatable_id"], 7);
        assert_eq!(value["data"]["title"], "Bonjour");
        assert!(value.get("scope").is_none());
    }
}
