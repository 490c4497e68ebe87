use crate::constants::*;
use crate::error::{PipelineError, Result};
use crate::pipeline::storage::IdRecovery;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{error, info};

static SQL_IDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static identifier pattern"));

/// Process settings, read once at startup. There is no reload.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Listing URL for page 0; only needed when crawling.
    pub url_base: Option<String>,
    pub site_origin: String,
    pub entity: String,
    /// Keyword to regulation-type id, in declaration order.
    pub rtype_keywords: Vec<(String, i64)>,
    pub fixed_classification_id: i64,
    pub default_rtype_id: i64,
    pub default_component_id: i64,
    pub title_max_chars: usize,
    pub db_path: PathBuf,
    pub regulations_table: String,
    pub components_table: String,
    pub schema_file: PathBuf,
    pub rules_file: PathBuf,
    pub id_recovery: IdRecovery,
    pub http_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            url_base: None,
            site_origin: DEFAULT_SITE_ORIGIN.to_string(),
            entity: DEFAULT_ENTITY.to_string(),
            rtype_keywords: Vec::new(),
            fixed_classification_id: DEFAULT_FIXED_CLASSIFICATION_ID,
            default_rtype_id: DEFAULT_RTYPE_ID,
            default_component_id: DEFAULT_COMPONENT_ID,
            title_max_chars: DEFAULT_TITLE_MAX_CHARS,
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            regulations_table: DEFAULT_REGULATIONS_TABLE.to_string(),
            components_table: DEFAULT_COMPONENTS_TABLE.to_string(),
            schema_file: PathBuf::from(DEFAULT_SCHEMA_FILE),
            rules_file: PathBuf::from(DEFAULT_RULES_FILE),
            id_recovery: IdRecovery::default(),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

impl Settings {
    /// Loads `.env` (if any) and reads settings from the process environment.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from an arbitrary key lookup; missing keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Settings::default();

        let rtype_keywords = match get("RTYPE_KEYWORDS") {
            Some(raw) => match parse_keywords(&raw) {
                Ok(keywords) => {
                    info!(count = keywords.len(), "Loaded classification keywords");
                    keywords
                }
                Err(e) => {
                    error!("Ignoring RTYPE_KEYWORDS: {}", e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let settings = Settings {
            url_base: get("SCRAPER_URL_BASE"),
            site_origin: get("SITE_ORIGIN").unwrap_or(defaults.site_origin),
            entity: get("ENTITY_VALUE").unwrap_or(defaults.entity),
            rtype_keywords,
            fixed_classification_id: parse_or(
                "FIXED_CLASSIFICATION_ID",
                get("FIXED_CLASSIFICATION_ID"),
                defaults.fixed_classification_id,
            )?,
            default_rtype_id: parse_or(
                "DEFAULT_RTYPE_ID",
                get("DEFAULT_RTYPE_ID"),
                defaults.default_rtype_id,
            )?,
            default_component_id: parse_or(
                "DEFAULT_COMPONENT_ID",
                get("DEFAULT_COMPONENT_ID"),
                defaults.default_component_id,
            )?,
            title_max_chars: parse_or(
                "TITLE_MAX_CHARS",
                get("TITLE_MAX_CHARS"),
                defaults.title_max_chars,
            )?,
            db_path: get("DB_PATH").map(PathBuf::from).unwrap_or(defaults.db_path),
            regulations_table: get("DB_REGULATIONS_TABLE_NAME")
                .unwrap_or(defaults.regulations_table),
            components_table: get("DB_COMPONENTS_TABLE_NAME")
                .unwrap_or(defaults.components_table),
            schema_file: get("DB_SCHEMA_FILE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.schema_file),
            rules_file: get("VALIDATION_CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.rules_file),
            id_recovery: parse_or("ID_RECOVERY", get("ID_RECOVERY"), defaults.id_recovery)?,
            http_timeout_secs: parse_or(
                "HTTP_TIMEOUT_SECS",
                get("HTTP_TIMEOUT_SECS"),
                defaults.http_timeout_secs,
            )?,
        };

        check_identifier("DB_REGULATIONS_TABLE_NAME", &settings.regulations_table)?;
        check_identifier("DB_COMPONENTS_TABLE_NAME", &settings.components_table)?;
        Ok(settings)
    }
}

/// Log directory, resolved before anything else so settings errors are logged too.
pub fn log_dir_from_env() -> PathBuf {
    let _ = dotenv::dotenv();
    log_dir_from_lookup(|key| std::env::var(key).ok())
}

pub fn log_dir_from_lookup<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    lookup("LOG_DIR")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR))
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(value) => value
            .parse()
            .map_err(|e| PipelineError::Config(format!("{}='{}': {}", key, value, e))),
        None => Ok(default),
    }
}

fn check_identifier(key: &str, value: &str) -> Result<()> {
    if SQL_IDENT.is_match(value) {
        Ok(())
    } else {
        Err(PipelineError::Config(format!(
            "{}='{}' is not a plain SQL identifier",
            key, value
        )))
    }
}

/// Parses a JSON object of keyword -> id, keeping the declared key order.
pub fn parse_keywords(raw: &str) -> Result<Vec<(String, i64)>> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let object = value
        .as_object()
        .ok_or_else(|| PipelineError::Config("keyword table must be a JSON object".to_string()))?;

    object
        .iter()
        .map(|(keyword, id)| {
            id.as_i64()
                .map(|id| (keyword.clone(), id))
                .ok_or_else(|| {
                    PipelineError::Config(format!("keyword '{}' maps to a non-integer id", keyword))
                })
        })
        .collect()
}
