use super::{validate_write, MatchKey, OwnerRef, TranslationRecord, TranslationStore};
use crate::error::Result;
use crate::locale::LocaleProvider;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    records: Vec<TranslationRecord>,
}

/// In-process translation store.
///
/// Every write takes the same lock for the whole find-or-create sequence, so
/// concurrent upserts for one key always converge on a single record. Clones
/// share the same records.
#[derive(Debug, Clone, Default)]
pub struct MemoryTranslationStore {
    state: Arc<RwLock<MemoryState>>,
    locale_provider: Option<Arc<dyn LocaleProvider>>,
}

impl MemoryTranslationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force every overlay on this store to resolve to the provider's locale.
    pub fn with_locale_provider(mut self, provider: impl LocaleProvider + 'static) -> Self {
        self.locale_provider = Some(Arc::new(provider));
        self
    }

    /// Total number of stored records, across all owners.
    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl TranslationStore for MemoryTranslationStore {
    async fn find_for_owner(&self, owner: &OwnerRef) -> Result<Vec<TranslationRecord>> {
        let state = self.state.read().await;
        Ok(state
            .records
            .iter()
            .filter(|record| record.is_owned_by(owner))
            .cloned()
            .collect())
    }

    async fn find_by_owner_and_locale(
        &self,
        owner: &OwnerRef,
        locale: &str,
    ) -> Result<Option<TranslationRecord>> {
        let state = self.state.read().await;
        Ok(state
            .records
            .iter()
            .find(|record| record.is_owned_by(owner) && record.locale == locale)
            .cloned())
    }

    async fn upsert(&self, key: &MatchKey, data: &Map<String, Value>) -> Result<TranslationRecord> {
        let owner_id = validate_write(key, data)?;
        let now = Utc::now();
        let mut state = self.state.write().await;

        if let Some(existing) = state.records.iter_mut().find(|record| record.matches(key)) {
            existing.data = data.clone();
            existing.updated_at = now;
            debug!(
                owner_type = %key.owner.owner_type,
                owner_id,
                locale = %key.locale,
                id = existing.id,
                "Updated translation record"
            );
            return Ok(existing.clone());
        }

        state.next_id += 1;
        let record = TranslationRecord {
            id: state.next_id,
            translatable_type: key.owner.owner_type.clone(),
            translatable_id: owner_id,
            locale: key.locale.clone(),
            scope: key.scope.clone(),
            data: data.clone(),
            created_at: now,
            updated_at: now,
        };
        state.records.push(record.clone());
        debug!(
            owner_type = %key.owner.owner_type,
            owner_id,
            locale = %key.locale,
            id = record.id,
            "Created translation record"
        );

        Ok(record)
    }

    async fn delete_all_for_owner(&self, owner: &OwnerRef) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.records.len();
        state.records.retain(|record| !record.is_owned_by(owner));
        Ok((before - state.records.len()) as u64)
    }

    fn locale_provider(&self) -> Option<&dyn LocaleProvider> {
        self.locale_provider.as_deref()
    }
}
