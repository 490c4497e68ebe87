//! Rule-driven validation with single-shot repair.
//!
//! A record missing a required field is dropped outright. Otherwise every field
//! is checked against its rule in one pass; violated optional fields are nulled
//! and the record is checked exactly once more.

pub mod rules;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::metrics::ValidationMetrics;
use crate::types::{FieldValue, Record};
pub use rules::{FieldRule, RuleSet};

/// One field failing its type or pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub field: String,
    pub message: String,
}

/// Why a record did not survive validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    MissingRequired(Vec<String>),
    Unrepairable(Vec<Violation>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accepted(Record),
    /// Accepted after nulling the listed optional fields.
    Repaired(Record, Vec<String>),
    Rejected(Rejection),
}

#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub accepted: Vec<Record>,
    pub rejected: usize,
    pub repaired: usize,
}

pub struct ValidationEngine {
    rules: RuleSet,
}

impl ValidationEngine {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    #[instrument(skip(self, records), fields(stage = "validate", total = records.len()))]
    pub fn validate(&self, records: Vec<Record>) -> ValidationReport {
        let total = records.len();
        let mut report = ValidationReport::default();

        for (row, record) in records.into_iter().enumerate() {
            let title = record.display_title().to_string();
            match self.validate_record(record) {
                Verdict::Accepted(record) => report.accepted.push(record),
                Verdict::Repaired(record, nulled) => {
                    debug!(row, title = %title, nulled = ?nulled, "Nulled optional fields");
                    report.repaired += 1;
                    report.accepted.push(record);
                }
                Verdict::Rejected(Rejection::MissingRequired(fields)) => {
                    warn!(
                        row,
                        title = %title,
                        missing = ?fields,
                        "Discarded: required fields missing"
                    );
                    report.rejected += 1;
                }
                Verdict::Rejected(Rejection::Unrepairable(violations)) => {
                    warn!(
                        row,
                        title = %title,
                        violations = ?violations,
                        "Discarded after repair attempt"
                    );
                    report.rejected += 1;
                }
            }
        }

        ValidationMetrics::record_outcome(report.accepted.len(), report.rejected, report.repaired);
        info!(
            total,
            valid = report.accepted.len(),
            discarded = report.rejected,
            repaired = report.repaired,
            "Validation complete"
        );
        report
    }

    pub fn validate_record(&self, mut record: Record) -> Verdict {
        coerce(&mut record);

        let missing: Vec<String> = self
            .rules
            .required
            .iter()
            .filter(|field| record.field(field).is_none())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Verdict::Rejected(Rejection::MissingRequired(missing));
        }

        let violations = self.check(&record);
        if violations.is_empty() {
            return Verdict::Accepted(record);
        }

        let mut nulled = Vec::new();
        for violation in &violations {
            if !self.rules.is_required(&violation.field) && record.clear_field(&violation.field) {
                nulled.push(violation.field.clone());
            }
        }

        let remaining = self.check(&record);
        if remaining.is_empty() {
            Verdict::Repaired(record, nulled)
        } else {
            Verdict::Rejected(Rejection::Unrepairable(remaining))
        }
    }

    /// Checks every declared field and returns all violations found.
    pub fn check(&self, record: &Record) -> Vec<Violation> {
        self.rules
            .fields
            .iter()
            .filter_map(|(field, rule)| {
                let value = record.field(field)?;
                check_value(rule, &value).err().map(|message| Violation {
                    field: field.clone(),
                    message,
                })
            })
            .collect()
    }
}

/// Unparsable dates become null before the required-field check runs.
fn coerce(record: &mut Record) {
    if let Some(raw) = record.created_at.take() {
        record.created_at = parse_date(&raw).map(|d| d.format("%Y-%m-%d").to_string());
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
                .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
                .map(|dt| dt.date())
                .ok()
        })
}

fn check_value(rule: &FieldRule, value: &FieldValue) -> Result<(), String> {
    match (rule, value) {
        (
            FieldRule::Str { pattern },
            FieldValue::Text(_) | FieldValue::Date(_) | FieldValue::Timestamp(_),
        ) => match pattern {
            Some(re) if !re.is_match(&value.render()) => {
                Err(format!("does not match pattern {}", re.as_str()))
            }
            _ => Ok(()),
        },
        (FieldRule::Int, FieldValue::Int(_)) => Ok(()),
        (FieldRule::Int, FieldValue::Text(s)) if s.trim().parse::<i64>().is_ok() => Ok(()),
        (FieldRule::Bool, FieldValue::Bool(_)) => Ok(()),
        (FieldRule::Bool, FieldValue::Text(s)) if parse_bool(s).is_some() => Ok(()),
        (FieldRule::Date, FieldValue::Date(_) | FieldValue::Timestamp(_)) => Ok(()),
        (FieldRule::Date, FieldValue::Text(s)) if parse_date(s).is_some() => Ok(()),
        (rule, value) => Err(format!(
            "expected {}, got '{}'",
            rule.type_name(),
            value.render()
        )),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
