use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One listing row as handed over by the extraction source.
///
/// Nothing is guaranteed to be present: the normalizer decides what is usable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    /// The cell that should hold the regulation name; `None` when the row has no such cell.
    pub title_cell: Option<TitleCell>,
    pub summary: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TitleCell {
    pub link: Option<RawLink>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawLink {
    pub text: String,
    pub href: Option<String>,
}

impl RawItem {
    /// Convenience constructor for a row whose title cell holds a link.
    pub fn linked(title: &str, href: Option<&str>) -> Self {
        Self {
            title_cell: Some(TitleCell {
                link: Some(RawLink {
                    text: title.to_string(),
                    href: href.map(str::to_string),
                }),
            }),
            summary: None,
            date: None,
        }
    }

    pub fn with_summary(mut self, summary: &str) -> Self {
        self.summary = Some(summary.to_string());
        self
    }

    pub fn with_date(mut self, date: &str) -> Self {
        self.date = Some(date.to_string());
        self
    }
}

/// Why the normalizer refused a raw item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    MissingTitleCell,
    MissingLink,
    TitleTooLong,
    NoExternalLink,
    InvalidCreationDate,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MissingTitleCell => "missing_title_cell",
            RejectReason::MissingLink => "missing_link",
            RejectReason::TitleTooLong => "title_too_long",
            RejectReason::NoExternalLink => "no_external_link",
            RejectReason::InvalidCreationDate => "invalid_creation_date",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A canonical regulation record flowing from normalization to persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub title: Option<String>,
    pub summary: Option<String>,
    /// `YYYY-MM-DD` once validated; may hold an unparsable source string before that.
    pub created_at: Option<String>,
    pub updated_at: NaiveDateTime,
    pub is_active: bool,
    pub gtype: Option<String>,
    pub entity: String,
    pub external_link: Option<String>,
    pub rtype_id: Option<i64>,
    pub classification_id: i64,
}

/// Column order used for persistence and rule lookups.
pub const RECORD_FIELDS: [&str; 10] = [
    "title",
    "summary",
    "created_at",
    "updated_at",
    "is_active",
    "gtype",
    "entity",
    "external_link",
    "rtype_id",
    "classification_id",
];

/// A present (non-null) field value as seen by the validation engine.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Int(i64),
    Bool(bool),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl FieldValue {
    /// Textual rendering used for pattern checks.
    pub fn render(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Int(i) => i.to_string(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            FieldValue::Timestamp(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

impl Record {
    /// Looks up a field by column name. Null and unknown fields both yield `None`.
    pub fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "title" => self.title.clone().map(FieldValue::Text),
            "summary" => self.summary.clone().map(FieldValue::Text),
            "created_at" => self.created_at.as_deref().map(|raw| {
                match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
                    Ok(date) => FieldValue::Date(date),
                    Err(_) => FieldValue::Text(raw.to_string()),
                }
            }),
            "updated_at" => Some(FieldValue::Timestamp(self.updated_at)),
            "is_active" => Some(FieldValue::Bool(self.is_active)),
            "gtype" => self.gtype.clone().map(FieldValue::Text),
            "entity" => Some(FieldValue::Text(self.entity.clone())),
            "external_link" => self.external_link.clone().map(FieldValue::Text),
            "rtype_id" => self.rtype_id.map(FieldValue::Int),
            "classification_id" => Some(FieldValue::Int(self.classification_id)),
            _ => None,
        }
    }

    /// Nulls a nullable field. Returns `false` for columns that cannot hold null.
    pub fn clear_field(&mut self, name: &str) -> bool {
        match name {
            "title" => self.title = None,
            "summary" => self.summary = None,
            "created_at" => self.created_at = None,
            "gtype" => self.gtype = None,
            "external_link" => self.external_link = None,
            "rtype_id" => self.rtype_id = None,
            _ => return false,
        }
        true
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("<untitled>")
    }
}
