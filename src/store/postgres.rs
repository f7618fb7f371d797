use super::{validate_write, MatchKey, OwnerRef, TranslationRecord, TranslationStore};
use crate::error::{Result, TranslationError};
use crate::locale::LocaleProvider;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Select list shared by reads and `RETURNING`. Casts keep rows written by
/// other applications decodable: integer ids, JSON-typed `data` and nullable
/// or zone-less timestamps.
const COLUMNS: &str = "id::BIGINT AS id, translatable_type, translatable_id::BIGINT AS translatable_id, \
     locale, scope, data::TEXT AS data, \
     COALESCE(created_at::TIMESTAMPTZ, NOW()) AS created_at, \
     COALESCE(updated_at::TIMESTAMPTZ, NOW()) AS updated_at";

/// Raw row as stored: `scope` and `data` are serialized JSON text.
#[derive(Debug, sqlx::FromRow)]
struct TranslationRow {
    id: i64,
    translatable_type: String,
    translatable_id: i64,
    locale: String,
    scope: String,
    data: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TranslationRow> for TranslationRecord {
    type Error = TranslationError;

    fn try_from(row: TranslationRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            translatable_type: row.translatable_type,
            translatable_id: row.translatable_id,
            locale: row.locale,
            scope: serde_json::from_str(&row.scope)?,
            data: serde_json::from_str(&row.data)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// PostgreSQL translation store.
///
/// Upserts are a single `INSERT .. ON CONFLICT .. DO UPDATE` against the
/// unique `(translatable_type, translatable_id, locale, scope)` index
/// created by [`ensure_schema`](Self::ensure_schema), so concurrent writers
/// cannot race each other into duplicate records.
#[derive(Debug, Clone)]
pub struct PgTranslationStore {
    pool: PgPool,
    table: Arc<str>,
    locale_provider: Option<Arc<dyn LocaleProvider>>,
}

impl PgTranslationStore {
    /// Wrap an existing pool, storing records in `table`.
    pub fn new(pool: PgPool, table: &str) -> Result<Self> {
        validate_table_name(table)?;
        Ok(Self {
            pool,
            table: Arc::from(table),
            locale_provider: None,
        })
    }

    /// Open a connection pool to `database_url` and bootstrap the schema.
    pub async fn connect(database_url: &str, table: &str) -> Result<Self> {
        validate_table_name(table)?;
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let store = Self::new(pool, table)?;
        store.ensure_schema().await?;
        info!(table = %store.table, "Connected translation store to PostgreSQL");
        Ok(store)
    }

    /// Force every overlay on this store to resolve to the provider's locale.
    pub fn with_locale_provider(mut self, provider: impl LocaleProvider + 'static) -> Self {
        self.locale_provider = Some(Arc::new(provider));
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the translations table and its indexes if they don't exist.
    ///
    /// A pre-existing table holding only the core columns (`id`,
    /// `translatable_type`, `translatable_id`, `locale`, `data`) is upgraded
    /// in place before the unique index is created.
    pub async fn ensure_schema(&self) -> Result<()> {
        let table = &self.table;

        if self.needs_migration().await? {
            self.run_migration().await?;
        } else {
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id BIGSERIAL PRIMARY KEY,
                    translatable_type VARCHAR(255) NOT NULL,
                    translatable_id BIGINT NOT NULL,
                    locale VARCHAR(10) NOT NULL,
                    scope TEXT NOT NULL DEFAULT '{{}}',
                    data TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )"
            ))
            .execute(&self.pool)
            .await?;
        }

        // Safe to run always; `ON CONFLICT` on these columns resolves to it.
        sqlx::query(&format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {table}_owner_locale_scope_unique
             ON {table} (translatable_type, translatable_id, locale, scope)"
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {table}_translatable_index
             ON {table} (translatable_type, translatable_id)"
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Whether the table exists but lacks the `scope` column.
    async fn needs_migration(&self) -> Result<bool> {
        let (table_exists, scope_exists): (bool, bool) = sqlx::query_as(
            "SELECT
                EXISTS (SELECT 1 FROM information_schema.tables
                        WHERE table_schema = current_schema() AND table_name = $1),
                EXISTS (SELECT 1 FROM information_schema.columns
                        WHERE table_schema = current_schema() AND table_name = $1
                          AND column_name = 'scope')",
        )
        // Unquoted identifiers fold to lower case in the catalog.
        .bind(self.table.to_lowercase())
        .fetch_one(&self.pool)
        .await?;

        Ok(table_exists && !scope_exists)
    }

    /// Add the missing columns to an existing table in one transaction.
    ///
    /// Duplicate `(owner, locale)` rows would block the unique index, so all
    /// but the lowest id (the one reads already resolved to) are dropped.
    async fn run_migration(&self) -> Result<()> {
        let table = &self.table;
        let mut tx = self.pool.begin().await?;

        for statement in [
            format!("ALTER TABLE {table} ADD COLUMN IF NOT EXISTS scope TEXT NOT NULL DEFAULT '{{}}'"),
            format!(
                "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()"
            ),
            format!(
                "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()"
            ),
        ] {
            sqlx::query(&statement).execute(&mut *tx).await?;
        }

        let duplicates = sqlx::query(&format!(
            "DELETE FROM {table} newer USING {table} older
             WHERE newer.translatable_type = older.translatable_type
               AND newer.translatable_id = older.translatable_id
               AND newer.locale = older.locale
               AND newer.scope = older.scope
               AND newer.id > older.id"
        ))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        if duplicates > 0 {
            warn!(table = %table, duplicates, "Dropped duplicate translation records during migration");
        }
        info!(table = %table, "Migrated existing translations table");
        Ok(())
    }
}

#[async_trait]
impl TranslationStore for PgTranslationStore {
    async fn find_for_owner(&self, owner: &OwnerRef) -> Result<Vec<TranslationRecord>> {
        let Some(owner_id) = owner.owner_id else {
            return Ok(Vec::new());
        };

        let rows: Vec<TranslationRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM {} \
             WHERE translatable_type = $1 AND translatable_id = $2 \
             ORDER BY id",
            self.table
        ))
        .bind(&owner.owner_type)
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TranslationRecord::try_from).collect()
    }

    async fn find_by_owner_and_locale(
        &self,
        owner: &OwnerRef,
        locale: &str,
    ) -> Result<Option<TranslationRecord>> {
        let Some(owner_id) = owner.owner_id else {
            return Ok(None);
        };

        let row: Option<TranslationRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM {} \
             WHERE translatable_type = $1 AND translatable_id = $2 AND locale = $3 \
             ORDER BY id LIMIT 1",
            self.table
        ))
        .bind(&owner.owner_type)
        .bind(owner_id)
        .bind(locale)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TranslationRecord::try_from).transpose()
    }

    async fn upsert(&self, key: &MatchKey, data: &Map<String, Value>) -> Result<TranslationRecord> {
        let owner_id = validate_write(key, data)?;
        let scope = serde_json::to_string(&key.scope)?;
        let payload = serde_json::to_string(data)?;

        let row: TranslationRow = sqlx::query_as(&format!(
            "INSERT INTO {table} \
             (translatable_type, translatable_id, locale, scope, data, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, NOW(), NOW()) \
             ON CONFLICT (translatable_type, translatable_id, locale, scope) \
             DO UPDATE SET data = EXCLUDED.data, updated_at = NOW() \
             RETURNING {COLUMNS}",
            table = self.table
        ))
        .bind(&key.owner.owner_type)
        .bind(owner_id)
        .bind(&key.locale)
        .bind(&scope)
        .bind(&payload)
        .fetch_one(&self.pool)
        .await?;

        debug!(
            owner_type = %key.owner.owner_type,
            owner_id,
            locale = %key.locale,
            id = row.id,
            "Upserted translation record"
        );

        TranslationRecord::try_from(row)
    }

    async fn delete_all_for_owner(&self, owner: &OwnerRef) -> Result<u64> {
        let Some(owner_id) = owner.owner_id else {
            return Ok(0);
        };

        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE translatable_type = $1 AND translatable_id = $2",
            self.table
        ))
        .bind(&owner.owner_type)
        .bind(owner_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    fn locale_provider(&self) -> Option<&dyn LocaleProvider> {
        self.locale_provider.as_deref()
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
fn validate_table_name(table: &str) -> Result<()> {
    static IDENTIFIER: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    let identifier = IDENTIFIER
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$"))
        .as_ref()
        .map_err(|e| TranslationError::InvalidTable(format!("{table} ({e})")))?;

    if identifier.is_match(table) {
        Ok(())
    } else {
        Err(TranslationError::InvalidTable(table.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DEFAULT_TABLE;
    use serde_json::json;

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object literal")
    }

    fn row() -> TranslationRow {
        let now = Utc::now();
        TranslationRow {
            id: 1,
            translatable_type: "Article".to_string(),
            translatable_id: 7,
            locale: "fr".to_string(),
            scope: "{}".to_string(),
            data: "{}".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    // ==================== Table Name Tests ====================

    #[test]
    fn test_default_table_name_is_valid() {
        assert!(validate_table_name(DEFAULT_TABLE).is_ok());
    }

    #[test]
    fn test_table_name_rejects_injection() {
        for bad in ["", "1translations", "translations; DROP TABLE users", "my-table", "a.b"] {
            let err = validate_table_name(bad).unwrap_err();
            assert!(matches!(err, TranslationError::InvalidTable(_)), "{bad}");
        }
    }

    #[test]
    fn test_table_name_accepts_identifiers() {
        for good in ["translations", "_t", "model_translations_v2"] {
            assert!(validate_table_name(good).is_ok(), "{good}");
        }
    }

    #[test]
    fn test_select_list_casts_foreign_column_types() {
        assert!(COLUMNS.contains("id::BIGINT AS id"));
        assert!(COLUMNS.contains("data::TEXT AS data"));
        assert!(COLUMNS.contains("COALESCE(created_at::TIMESTAMPTZ, NOW()) AS created_at"));
    }

    // ==================== Row Conversion Tests ====================

    #[test]
    fn test_row_conversion_parses_blobs() {
        let row = TranslationRow {
            id: 3,
            scope: r#"{"channel":"web"}"#.to_string(),
            data: r#"{"title":"Bonjour","tags":["a","b"]}"#.to_string(),
            ..row()
        };

        let record = TranslationRecord::try_from(row).expect("convert");

        assert_eq!(record.id, 3);
        assert_eq!(record.get("title"), Some(&json!("Bonjour")));
        assert_eq!(record.get("tags"), Some(&json!(["a", "b"])));
        assert_eq!(record.scope.get("channel"), Some(&json!("web")));
    }

    #[test]
    fn test_row_conversion_rejects_corrupt_data() {
        let row = TranslationRow {
            data: "not json".to_string(),
            ..row()
        };

        let result = TranslationRecord::try_from(row);
        assert!(matches!(result, Err(TranslationError::Serialization(_))));
    }

    // ==================== PostgreSQL Tests ====================
    // Run with: TEST_DATABASE_URL=postgres://... cargo test -- --ignored

    async fn create_test_store(table: &str) -> PgTranslationStore {
        let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL not set");
        let store = PgTranslationStore::connect(&url, table)
            .await
            .expect("Failed to connect");
        sqlx::query(&format!("TRUNCATE {table}"))
            .execute(store.pool())
            .await
            .expect("truncate");
        store
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (TEST_DATABASE_URL)"]
    async fn test_pg_upsert_roundtrip() {
        let store = create_test_store("translations_test_roundtrip").await;
        let owner = OwnerRef::new("Article", Some(7));
        let key = MatchKey::new(owner.clone(), "fr");

        let created = store
            .upsert(&key, &data(json!({"title": "Bonjour"})))
            .await
            .expect("create");
        let updated = store
            .upsert(&key, &data(json!({"title": "Salut"})))
            .await
            .expect("update");

        assert_eq!(created.id, updated.id);
        let found = store
            .find_by_owner_and_locale(&owner, "fr")
            .await
            .expect("find")
            .expect("record");
        assert_eq!(found.get("title"), Some(&json!("Salut")));
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (TEST_DATABASE_URL)"]
    async fn test_pg_concurrent_upserts_produce_one_record() {
        let store = create_test_store("translations_test_concurrent").await;
        let owner = OwnerRef::new("Article", Some(7));

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                let key = MatchKey::new(owner.clone(), "fr");
                tokio::spawn(async move {
                    store
                        .upsert(&key, &data(json!({ "title": format!("v{i}") })))
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.expect("join").expect("upsert");
        }

        let records = store.find_for_owner(&owner).await.expect("find");
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (TEST_DATABASE_URL)"]
    async fn test_pg_delete_all_for_owner() {
        let store = create_test_store("translations_test_delete").await;
        let owner = OwnerRef::new("Article", Some(7));
        for locale in ["fr", "es"] {
            store
                .upsert(&MatchKey::new(owner.clone(), locale), &data(json!({"title": locale})))
                .await
                .expect("upsert");
        }

        let removed = store.delete_all_for_owner(&owner).await.expect("delete");

        assert_eq!(removed, 2);
        assert!(store.find_for_owner(&owner).await.expect("find").is_empty());
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (TEST_DATABASE_URL)"]
    async fn test_pg_validation_runs_before_query() {
        let store = create_test_store("translations_test_validation").await;
        let key = MatchKey::new(OwnerRef::new("Article", None), "fr");

        let result = store.upsert(&key, &data(json!({"title": "x"}))).await;

        assert!(matches!(result, Err(TranslationError::Validation { .. })));
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (TEST_DATABASE_URL)"]
    async fn test_pg_connect_upgrades_existing_core_table() {
        let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL not set");
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .expect("Failed to connect");
        let table = "translations_test_existing";

        sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
            .execute(&pool)
            .await
            .expect("drop");
        sqlx::query(&format!(
            "CREATE TABLE {table} (
                id SERIAL PRIMARY KEY,
                translatable_type VARCHAR(255) NOT NULL,
                translatable_id INTEGER NOT NULL,
                locale VARCHAR(10) NOT NULL,
                data TEXT NOT NULL
            )"
        ))
        .execute(&pool)
        .await
        .expect("create");
        for title in ["Bonjour", "Doublon"] {
            sqlx::query(&format!(
                "INSERT INTO {table} (translatable_type, translatable_id, locale, data) \
                 VALUES ('Article', 7, 'fr', $1)"
            ))
            .bind(json!({ "title": title }).to_string())
            .execute(&pool)
            .await
            .expect("seed");
        }

        let store = PgTranslationStore::connect(&url, table)
            .await
            .expect("connect");
        let owner = OwnerRef::new("Article", Some(7));

        let records = store.find_for_owner(&owner).await.expect("find");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("title"), Some(&json!("Bonjour")));
        assert!(records[0].scope.is_empty());

        let updated = store
            .upsert(&MatchKey::new(owner.clone(), "fr"), &data(json!({"title": "Salut"})))
            .await
            .expect("upsert");
        assert_eq!(updated.id, records[0].id);
        assert_eq!(store.find_for_owner(&owner).await.expect("find").len(), 1);

        // A second bootstrap on the upgraded table is a no-op.
        store.ensure_schema().await.expect("ensure schema again");
    }
}
