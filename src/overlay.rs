//! Translatable entity overlay.
//!
//! An entity opts into translations by implementing [`Translatable`]. The
//! [`Translated`] wrapper pairs it with a [`TranslationStore`] and provides:
//!
//! - locale determination (store provider, instance default, ambient locale)
//! - a lazily loaded, per-instance cache of the entity's translation records
//! - read overlay ([`Translated::get_attribute`]) and serialization overlay
//!   ([`Translated::to_array`]), both backed by the pure [`resolve_field`]
//! - update submission routed to the base entity or a translation record
//! - cascade delete of translation records on force deletion
//!
//! Reads never fail: a missing cache, record, key or an empty override all
//! resolve to the base value.

use crate::error::{Result, TranslationError};
use crate::locale::{determine_locale, LocaleContext, BASE_LOCALE};
use crate::store::{MatchKey, OwnerRef, Scope, TranslationRecord, TranslationStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// An entity whose attributes can carry locale-specific overrides.
pub trait Translatable {
    /// Owner type discriminator stored on every translation record.
    const OWNER_TYPE: &'static str;

    /// Attribute names eligible for locale override.
    const TRANSLATABLE: &'static [&'static str];

    /// Identifier of the persisted entity, `None` while unsaved.
    fn owner_id(&self) -> Option<i64>;

    /// The entity's full base field set.
    fn attributes(&self) -> Map<String, Value>;

    /// Apply field values onto the in-memory entity.
    fn fill(&mut self, values: Map<String, Value>) -> Result<()>;

    /// A single base value.
    fn attribute(&self, key: &str) -> Option<Value> {
        self.attributes().remove(key)
    }

    /// Whether deletes of this entity are reversible (soft) by default.
    fn soft_deletes(&self) -> bool {
        false
    }

    fn is_translatable_attribute(key: &str) -> bool {
        Self::TRANSLATABLE.iter().any(|attribute| *attribute == key)
    }

    fn owner_ref(&self) -> OwnerRef {
        OwnerRef::new(Self::OWNER_TYPE, self.owner_id())
    }
}

/// Serialize a serde-backed entity into its attribute map.
pub fn attributes_of<T: Serialize>(entity: &T) -> Map<String, Value> {
    match serde_json::to_value(entity) {
        Ok(Value::Object(map)) => map,
        Ok(_) => Map::new(),
        Err(e) => {
            warn!("Failed to serialize entity attributes: {}", e);
            Map::new()
        }
    }
}

/// Merge `values` into a serde-backed entity, replacing it on success.
pub fn fill_from<T: Serialize + DeserializeOwned>(
    entity: &mut T,
    values: Map<String, Value>,
) -> Result<()> {
    let mut current = serde_json::to_value(&*entity)?;
    if let Value::Object(fields) = &mut current {
        fields.extend(values);
    }
    *entity = serde_json::from_value(current)?;
    Ok(())
}

/// Whether a value counts as "no override": null, "", [] or {}.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Resolve one attribute of `entity` in `locale`.
///
/// Non-translatable keys always yield the base value. Translatable keys yield
/// the first record in `translations` for `locale` holding a non-empty value
/// for `key`, else the base value.
pub fn resolve_field<E: Translatable>(
    entity: &E,
    translations: &[TranslationRecord],
    key: &str,
    locale: &str,
) -> Option<Value> {
    if E::is_translatable_attribute(key) {
        if let Some(value) = override_for(translations, key, locale) {
            return Some(value.clone());
        }
    }

    entity.attribute(key)
}

/// The non-empty value `locale`'s record holds for `key`, if any.
fn override_for<'a>(
    translations: &'a [TranslationRecord],
    key: &str,
    locale: &str,
) -> Option<&'a Value> {
    translations
        .iter()
        .find(|record| record.locale == locale)
        .and_then(|record| record.get(key))
        .filter(|value| !is_empty_value(value))
}

/// How an owner entity is being deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    /// The entity's default delete. Reversible for soft-deleting entities.
    Soft,
    /// Irreversible delete, even for soft-deleting entities.
    Force,
}

/// Outcome of [`Translated::set_translations`].
#[derive(Debug, Clone, PartialEq)]
pub enum TranslationWrite {
    /// Values were applied onto the base entity; the caller persists it.
    Base,
    /// Every value matched the base entity, nothing was written.
    Unchanged,
    /// A translation record was created or updated.
    Stored(TranslationRecord),
}

/// An entity paired with its translation store and record cache.
#[derive(Debug)]
pub struct Translated<E, S> {
    entity: E,
    store: S,
    default_locale: Option<String>,
    base_locale: String,
    translations: Option<Vec<TranslationRecord>>,
}

impl<E, S> Translated<E, S>
where
    E: Translatable,
    S: TranslationStore,
{
    pub fn new(entity: E, store: S) -> Self {
        Self {
            entity,
            store,
            default_locale: None,
            base_locale: BASE_LOCALE.to_string(),
            translations: None,
        }
    }

    /// Override the base-language sentinel (defaults to [`BASE_LOCALE`]).
    pub fn with_base_locale(mut self, locale: impl Into<String>) -> Self {
        self.base_locale = locale.into();
        self
    }

    pub fn entity(&self) -> &E {
        &self.entity
    }

    /// Mutable access to the base entity. Does not touch the record cache.
    pub fn entity_mut(&mut self) -> &mut E {
        &mut self.entity
    }

    pub fn into_inner(self) -> E {
        self.entity
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn base_locale(&self) -> &str {
        &self.base_locale
    }

    /// Read this instance in `locale` unless the store forces another one.
    pub fn uses_translation(&mut self, locale: impl Into<String>) {
        self.default_locale = Some(locale.into());
    }

    pub fn determine_locale(&self, ctx: &LocaleContext) -> String {
        determine_locale(
            self.store.locale_provider(),
            self.default_locale.as_deref(),
            ctx,
        )
    }

    pub fn translations_loaded(&self) -> bool {
        self.translations.is_some()
    }

    /// The cached records, empty when nothing has been loaded yet.
    pub fn cached_translations(&self) -> &[TranslationRecord] {
        self.translations.as_deref().unwrap_or_default()
    }

    /// Load every record of the entity (all locales) once per instance.
    pub async fn load_translations(&mut self) -> Result<&[TranslationRecord]> {
        if self.translations.is_none() {
            self.refresh_translations().await?;
        }
        Ok(self.cached_translations())
    }

    /// Reload the record cache from the store, replacing what was cached.
    pub async fn refresh_translations(&mut self) -> Result<&[TranslationRecord]> {
        let owner = self.entity.owner_ref();
        let records = self.store.find_for_owner(&owner).await?;
        debug!(
            owner_type = E::OWNER_TYPE,
            owner_id = ?owner.owner_id,
            count = records.len(),
            "Loaded translations"
        );
        self.translations = Some(records);
        Ok(self.cached_translations())
    }

    /// Load the cache if needed. A store failure leaves the cache unloaded so
    /// reads fall back to base values and the next read retries.
    async fn ensure_loaded(&mut self) {
        let loaded = self.load_translations().await.map(|_| ());
        if let Err(e) = loaded {
            warn!(
                owner_type = E::OWNER_TYPE,
                owner_id = ?self.entity.owner_id(),
                "Failed to load translations, using base values: {}",
                e
            );
        }
    }

    /// The record for `locale`, or for the determined locale when `None`.
    pub async fn get_translations(
        &mut self,
        locale: Option<&str>,
        ctx: &LocaleContext,
    ) -> Option<&TranslationRecord> {
        self.ensure_loaded().await;
        let locale = locale.map_or_else(|| self.determine_locale(ctx), str::to_string);
        self.cached_translations()
            .iter()
            .find(|record| record.locale == locale)
    }

    /// Read one attribute through the translation overlay.
    pub async fn get_attribute(&mut self, key: &str, ctx: &LocaleContext) -> Option<Value> {
        if !E::is_translatable_attribute(key) {
            return self.entity.attribute(key);
        }

        self.ensure_loaded().await;
        let locale = self.determine_locale(ctx);
        resolve_field(&self.entity, self.cached_translations(), key, &locale)
    }

    /// The entity's full field set with every field passed through the
    /// overlay.
    pub async fn to_array(&mut self, ctx: &LocaleContext) -> Map<String, Value> {
        self.ensure_loaded().await;
        let locale = self.determine_locale(ctx);
        let translations = self.cached_translations();

        self.entity
            .attributes()
            .into_iter()
            .map(|(key, base)| {
                let value = if E::is_translatable_attribute(&key) {
                    override_for(translations, &key, &locale)
                        .cloned()
                        .unwrap_or(base)
                } else {
                    base
                };
                (key, value)
            })
            .collect()
    }

    /// Submit field values for `locale` (the base locale when `None`).
    ///
    /// Base-locale values are filled onto the entity, which the caller still
    /// has to persist. Other locales go to the translation record matching
    /// `locale` plus `matching`, after dropping values equal to the entity's
    /// current base values. Nothing is written when no value remains.
    pub async fn set_translations(
        &mut self,
        locale: Option<&str>,
        field_values: Map<String, Value>,
        matching: Scope,
    ) -> Result<TranslationWrite> {
        let locale = locale.unwrap_or(self.base_locale.as_str()).to_string();

        if locale == self.base_locale {
            self.entity.fill(field_values)?;
            return Ok(TranslationWrite::Base);
        }

        let base = self.entity.attributes();
        let data: Map<String, Value> = field_values
            .into_iter()
            .filter(|(key, value)| base.get(key).unwrap_or(&Value::Null) != value)
            .collect();

        if data.is_empty() {
            debug!(
                owner_type = E::OWNER_TYPE,
                owner_id = ?self.entity.owner_id(),
                locale = %locale,
                "All submitted values match the base entity, skipping write"
            );
            return Ok(TranslationWrite::Unchanged);
        }

        let key = MatchKey::new(self.entity.owner_ref(), locale).with_scope(matching);
        let record = self.store.upsert(&key, &data).await?;

        if let Some(cache) = self.translations.as_mut() {
            match cache.iter_mut().find(|cached| cached.id == record.id) {
                Some(cached) => *cached = record.clone(),
                None => cache.push(record.clone()),
            }
        }

        Ok(TranslationWrite::Stored(record))
    }

    /// Submit a request payload: the locale comes from its `locale` field and
    /// only translatable attributes are taken.
    pub async fn set_translations_from_request(
        &mut self,
        payload: &Map<String, Value>,
        matching: Scope,
    ) -> Result<TranslationWrite> {
        let locale = match payload.get("locale") {
            None | Some(Value::Null) => None,
            Some(Value::String(locale)) => Some(locale.as_str()),
            Some(other) => {
                return Err(TranslationError::validation(
                    "locale",
                    format!("expected a string, got {}", other),
                ))
            }
        };

        let field_values: Map<String, Value> = E::TRANSLATABLE
            .iter()
            .filter_map(|key| payload.get(*key).map(|value| (key.to_string(), value.clone())))
            .collect();

        self.set_translations(locale, field_values, matching).await
    }

    /// React to the owner entity being deleted.
    ///
    /// Records are removed on irreversible deletes only: a soft delete of a
    /// soft-deleting entity keeps them so a restore finds them intact.
    ///
    /// # Returns
    /// The number of records removed.
    pub async fn cascade_delete(&mut self, mode: DeleteMode) -> Result<u64> {
        if mode == DeleteMode::Soft && self.entity.soft_deletes() {
            debug!(
                owner_type = E::OWNER_TYPE,
                owner_id = ?self.entity.owner_id(),
                "Soft delete, keeping translations"
            );
            return Ok(0);
        }

        let owner = self.entity.owner_ref();
        let removed = self.store.delete_all_for_owner(&owner).await?;
        self.translations = Some(Vec::new());
        info!(
            owner_type = E::OWNER_TYPE,
            owner_id = ?owner.owner_id,
            removed,
            "Deleted translations of owner"
        );
        Ok(removed)
    }
}
