/// Defaults for the settings read from the environment at startup.
/// Each constant pairs with the variable of the same name in `config.rs`.

pub const DEFAULT_SITE_ORIGIN: &str = "https://www.ani.gov.co";
pub const DEFAULT_ENTITY: &str = "Agencia Nacional de Infraestructura";

pub const DEFAULT_FIXED_CLASSIFICATION_ID: i64 = 13;
pub const DEFAULT_RTYPE_ID: i64 = 14;
pub const DEFAULT_COMPONENT_ID: i64 = 7;

// Business rule: longer titles are listing teasers, not regulation names
pub const DEFAULT_TITLE_MAX_CHARS: usize = 65;

pub const DEFAULT_DB_PATH: &str = "data/regulations.db";
pub const DEFAULT_REGULATIONS_TABLE: &str = "regulations";
pub const DEFAULT_COMPONENTS_TABLE: &str = "regulations_component";
pub const DEFAULT_SCHEMA_FILE: &str = "sql/create_tables.sql";
pub const DEFAULT_RULES_FILE: &str = "config/validation_rules.yml";

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_LOG_DIR: &str = "logs";

/// `gtype` value stamped on every record that carries an external link.
pub const LINK_GTYPE: &str = "link";
