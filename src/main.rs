use anyhow::{Context, Result};
use entity_translations::config::{Config, StoreBackend};
use entity_translations::middleware::Localization;
use entity_translations::server::{router, AppState, ArticleCatalog};
use entity_translations::{MemoryTranslationStore, PgTranslationStore, TranslationStore};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("entity_translations=info".parse()?),
        )
        .init();

    let config = Config::from_env()?;
    info!(
        model = ?config.model,
        table = %config.table,
        languages = ?config.languages,
        "Starting translations service"
    );

    match config.model {
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL not set")?;
            let store = PgTranslationStore::connect(url, &config.table)
                .await
                .context("Failed to connect translation store")?;
            serve(&config, store).await
        }
        StoreBackend::Memory => serve(&config, MemoryTranslationStore::new()).await,
    }
}

async fn serve<S>(config: &Config, store: S) -> Result<()>
where
    S: TranslationStore + Clone + 'static,
{
    let state = AppState::new(store, ArticleCatalog::new(), &config.base_locale);
    let app = router(state, Localization::from_config(config));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context(format!("Failed to bind {}", addr))?;
    info!("✓ Listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
