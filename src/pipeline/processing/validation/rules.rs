use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::{error, info};

use crate::error::{PipelineError, Result};

/// How one field is checked. Patterns only exist on string fields.
#[derive(Debug, Clone)]
pub enum FieldRule {
    Str { pattern: Option<Regex> },
    Int,
    Bool,
    Date,
}

impl FieldRule {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldRule::Str { .. } => "str",
            FieldRule::Int => "int",
            FieldRule::Bool => "bool",
            FieldRule::Date => "date",
        }
    }
}

/// Declared field types, required fields and patterns, loaded once per validation run.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub fields: BTreeMap<String, FieldRule>,
    pub required: BTreeSet<String>,
}

/// On-disk shape of the rule document.
#[derive(Debug, Default, Deserialize)]
struct RuleDocument {
    #[serde(default)]
    types: Option<BTreeMap<String, String>>,
    #[serde(default)]
    required: Option<Vec<String>>,
    #[serde(default)]
    regex: Option<BTreeMap<String, String>>,
}

impl RuleSet {
    /// Reads and parses a YAML rule document. A missing or malformed file is fatal.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            error!("Rule file {} could not be read: {}", path.display(), e);
            e
        })?;
        let rules = Self::parse(&text).map_err(|e| {
            error!("Rule file {} is invalid: {}", path.display(), e);
            e
        })?;
        info!(
            path = %path.display(),
            fields = rules.fields.len(),
            required = rules.required.len(),
            "Validation rules loaded"
        );
        Ok(rules)
    }

    pub fn parse(yaml: &str) -> Result<Self> {
        let doc: RuleDocument = serde_yaml::from_str(yaml)?;
        let mut fields = BTreeMap::new();

        for (field, type_name) in doc.types.unwrap_or_default() {
            let rule = match type_name.trim() {
                "str" | "string" => FieldRule::Str { pattern: None },
                "int" | "integer" => FieldRule::Int,
                "bool" | "boolean" => FieldRule::Bool,
                "date" => FieldRule::Date,
                other => {
                    return Err(PipelineError::Rules(format!(
                        "field '{}' has unknown type '{}'",
                        field, other
                    )))
                }
            };
            fields.insert(field, rule);
        }

        for (field, pattern) in doc.regex.unwrap_or_default() {
            // Patterns must match from the start of the value
            let compiled = Regex::new(&format!("^(?:{})", pattern)).map_err(|e| {
                PipelineError::Rules(format!("field '{}' has an invalid pattern: {}", field, e))
            })?;

            match fields.get_mut(&field) {
                None => {
                    fields.insert(field, FieldRule::Str { pattern: Some(compiled) });
                }
                Some(FieldRule::Str { pattern }) => *pattern = Some(compiled),
                Some(other) => {
                    return Err(PipelineError::Rules(format!(
                        "field '{}' is declared {} and cannot carry a pattern",
                        field,
                        other.type_name()
                    )))
                }
            }
        }

        Ok(Self {
            fields,
            required: doc.required.unwrap_or_default().into_iter().collect(),
        })
    }

    pub fn is_required(&self, field: &str) -> bool {
        self.required.contains(field)
    }
}
