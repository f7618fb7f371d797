//! HTTP service exposing a translatable article catalog.
//!
//! Articles live in process memory; their translations live in whichever
//! [`TranslationStore`] the service was built with. Every request runs
//! behind the localization middleware, so reads come back in the request's
//! locale.

use crate::error::TranslationError;
use crate::middleware::{localization, Localization};
use crate::overlay::{
    attributes_of, fill_from, DeleteMode, Translatable, Translated, TranslationWrite,
};
use crate::store::{Scope, TranslationStore};
use crate::LocaleContext;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: Option<i64>,
    pub title: String,
    pub body: String,
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Translatable for Article {
    const OWNER_TYPE: &'static str = "Article";
    const TRANSLATABLE: &'static [&'static str] = &["title", "body"];

    fn owner_id(&self) -> Option<i64> {
        self.id
    }

    fn attributes(&self) -> Map<String, Value> {
        attributes_of(self)
    }

    fn fill(&mut self, values: Map<String, Value>) -> crate::Result<()> {
        fill_from(self, values)
    }

    fn soft_deletes(&self) -> bool {
        true
    }
}

/// Payload for creating an article in the base locale.
#[derive(Debug, Deserialize)]
pub struct NewArticle {
    pub title: String,
    pub body: String,
    pub slug: String,
}

#[derive(Debug, Default)]
struct CatalogState {
    next_id: i64,
    articles: BTreeMap<i64, Article>,
}

/// In-memory base-entity repository backing the service.
#[derive(Debug, Clone, Default)]
pub struct ArticleCatalog {
    state: Arc<RwLock<CatalogState>>,
}

impl ArticleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, new: NewArticle) -> Article {
        let mut state = self.state.write().await;
        state.next_id += 1;
        let id = state.next_id;
        let article = Article {
            id: Some(id),
            title: new.title,
            body: new.body,
            slug: new.slug,
            deleted_at: None,
        };
        state.articles.insert(id, article.clone());
        article
    }

    /// A live (not soft-deleted) article.
    pub async fn get(&self, id: i64) -> Option<Article> {
        let state = self.state.read().await;
        state
            .articles
            .get(&id)
            .filter(|article| article.deleted_at.is_none())
            .cloned()
    }

    /// Like [`get`](Self::get), but also returns soft-deleted articles.
    pub async fn get_with_trashed(&self, id: i64) -> Option<Article> {
        self.state.read().await.articles.get(&id).cloned()
    }

    pub async fn list(&self) -> Vec<Article> {
        let state = self.state.read().await;
        state
            .articles
            .values()
            .filter(|article| article.deleted_at.is_none())
            .cloned()
            .collect()
    }

    pub async fn save(&self, article: Article) {
        if let Some(id) = article.id {
            self.state.write().await.articles.insert(id, article);
        }
    }

    pub async fn remove(&self, id: i64) -> Option<Article> {
        self.state.write().await.articles.remove(&id)
    }
}

#[derive(Debug, Clone)]
pub struct AppState<S> {
    pub store: S,
    pub catalog: ArticleCatalog,
    pub base_locale: Arc<str>,
}

impl<S: TranslationStore + Clone> AppState<S> {
    pub fn new(store: S, catalog: ArticleCatalog, base_locale: &str) -> Self {
        Self {
            store,
            catalog,
            base_locale: Arc::from(base_locale),
        }
    }

    fn translated(&self, article: Article) -> Translated<Article, S> {
        Translated::new(article, self.store.clone()).with_base_locale(self.base_locale.as_ref())
    }
}

#[derive(Debug)]
pub enum ApiError {
    NotFound(i64),
    Translation(TranslationError),
}

impl From<TranslationError> for ApiError {
    fn from(e: TranslationError) -> Self {
        Self::Translation(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(id) => (StatusCode::NOT_FOUND, format!("Article {} not found", id)),
            Self::Translation(e) if e.is_validation() => {
                (StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
            }
            Self::Translation(e) => {
                error!("Translation request failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteParams {
    #[serde(default)]
    pub force: bool,
}

/// Build the service router with the localization middleware installed.
pub fn router<S>(state: AppState<S>, localization_settings: Localization) -> Router
where
    S: TranslationStore + Clone + 'static,
{
    Router::new()
        .route("/health", get(health))
        .route("/articles", get(list_articles::<S>).post(create_article::<S>))
        .route(
            "/articles/:id",
            get(show_article::<S>)
                .put(update_article::<S>)
                .delete(delete_article::<S>),
        )
        .layer(axum::middleware::from_fn_with_state(
            localization_settings,
            localization,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn list_articles<S>(
    State(state): State<AppState<S>>,
    Extension(ctx): Extension<LocaleContext>,
) -> Json<Vec<Map<String, Value>>>
where
    S: TranslationStore + Clone + 'static,
{
    let mut articles = Vec::new();
    for article in state.catalog.list().await {
        articles.push(state.translated(article).to_array(&ctx).await);
    }
    Json(articles)
}

async fn create_article<S>(
    State(state): State<AppState<S>>,
    Json(new): Json<NewArticle>,
) -> (StatusCode, Json<Article>)
where
    S: TranslationStore + Clone + 'static,
{
    let article = state.catalog.create(new).await;
    info!(id = ?article.id, "Created article");
    (StatusCode::CREATED, Json(article))
}

async fn show_article<S>(
    State(state): State<AppState<S>>,
    Path(id): Path<i64>,
    Extension(ctx): Extension<LocaleContext>,
) -> Result<Json<Map<String, Value>>, ApiError>
where
    S: TranslationStore + Clone + 'static,
{
    let article = state.catalog.get(id).await.ok_or(ApiError::NotFound(id))?;
    Ok(Json(state.translated(article).to_array(&ctx).await))
}

async fn update_article<S>(
    State(state): State<AppState<S>>,
    Path(id): Path<i64>,
    Json(payload): Json<Map<String, Value>>,
) -> Result<Json<Value>, ApiError>
where
    S: TranslationStore + Clone + 'static,
{
    let article = state.catalog.get(id).await.ok_or(ApiError::NotFound(id))?;
    let mut translated = state.translated(article);

    let outcome = translated
        .set_translations_from_request(&payload, Scope::new())
        .await?;

    let body = match outcome {
        TranslationWrite::Base => {
            state.catalog.save(translated.into_inner()).await;
            json!({ "outcome": "base" })
        }
        TranslationWrite::Unchanged => json!({ "outcome": "unchanged" }),
        TranslationWrite::Stored(record) => json!({ "outcome": "stored", "translation": record }),
    };

    Ok(Json(body))
}

async fn delete_article<S>(
    State(state): State<AppState<S>>,
    Path(id): Path<i64>,
    Query(params): Query<DeleteParams>,
) -> Result<StatusCode, ApiError>
where
    S: TranslationStore + Clone + 'static,
{
    let article = if params.force {
        state.catalog.get_with_trashed(id).await
    } else {
        state.catalog.get(id).await
    }
    .ok_or(ApiError::NotFound(id))?;

    let mode = if params.force {
        DeleteMode::Force
    } else {
        DeleteMode::Soft
    };

    let mut translated = state.translated(article);
    translated.cascade_delete(mode).await?;

    match mode {
        DeleteMode::Force => {
            state.catalog.remove(id).await;
        }
        DeleteMode::Soft => {
            let mut article = translated.into_inner();
            article.deleted_at = Some(Utc::now());
            state.catalog.save(article).await;
        }
    }

    info!(id, force = params.force, "Deleted article");
    Ok(StatusCode::NO_CONTENT)
}
