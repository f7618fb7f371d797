use crate::locale::BASE_LOCALE;
use crate::store::DEFAULT_TABLE;
use anyhow::{bail, Context, Result};
use std::str::FromStr;

/// Which translation store binding to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "memory" | "mem" => Ok(Self::Memory),
            other => bail!("Unknown translations model: '{}'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // Translations
    pub model: StoreBackend,
    pub table: String,
    pub base_locale: String,

    // Localization
    pub app_locale: String,
    pub languages: Vec<String>,

    // Database
    pub database_url: Option<String>,

    // Server
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let model: StoreBackend = std::env::var("TRANSLATIONS_MODEL")
            .unwrap_or_else(|_| "postgres".to_string())
            .parse()
            .context("Invalid TRANSLATIONS_MODEL")?;

        let database_url = std::env::var("DATABASE_URL").ok();
        if model == StoreBackend::Postgres && database_url.is_none() {
            bail!("DATABASE_URL not set (required when TRANSLATIONS_MODEL=postgres)");
        }

        Ok(Self {
            model,
            table: std::env::var("TRANSLATIONS_TABLE").unwrap_or_else(|_| DEFAULT_TABLE.to_string()),
            base_locale: std::env::var("TRANSLATIONS_BASE_LOCALE")
                .unwrap_or_else(|_| BASE_LOCALE.to_string()),

            app_locale: std::env::var("APP_LOCALE").unwrap_or_else(|_| BASE_LOCALE.to_string()),
            languages: parse_languages(
                &std::env::var("APP_LANGUAGES").unwrap_or_else(|_| BASE_LOCALE.to_string()),
            ),

            database_url,

            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
        })
    }
}

/// Split a comma-separated allow-list, dropping blanks.
fn parse_languages(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
