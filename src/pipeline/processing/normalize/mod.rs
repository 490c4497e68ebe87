use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

use crate::config::Settings;
use crate::constants::LINK_GTYPE;
use crate::metrics::NormalizeMetrics;
use crate::types::{RawItem, Record, RejectReason};

/// Quotation marks stripped from free text: straight, curly, angled, low and prime variants.
const QUOTE_CHARS: &[char] = &[
    '"', '\'', '\u{201C}', '\u{201D}', '\u{2018}', '\u{2019}', '\u{00AB}', '\u{00BB}',
    '\u{201E}', '\u{201A}', '\u{2039}', '\u{203A}', '\u{00B4}', '`', '\u{2032}', '\u{2033}',
];

/// Static inputs of the normalizer, fixed for the lifetime of one pipeline run.
#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    pub site_origin: String,
    pub entity: String,
    pub classification_id: i64,
    pub default_rtype_id: i64,
    /// Checked in order; the first keyword found in the title wins.
    pub rtype_keywords: Vec<(String, i64)>,
    pub title_max_chars: usize,
}

impl NormalizerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            site_origin: settings.site_origin.clone(),
            entity: settings.entity.clone(),
            classification_id: settings.fixed_classification_id,
            default_rtype_id: settings.default_rtype_id,
            rtype_keywords: settings.rtype_keywords.clone(),
            title_max_chars: settings.title_max_chars,
        }
    }
}

/// Outcome of normalizing a batch: the usable records and rejection counts per reason.
#[derive(Debug, Default, Serialize)]
pub struct NormalizeReport {
    pub records: Vec<Record>,
    pub rejected: BTreeMap<RejectReason, usize>,
}

impl NormalizeReport {
    pub fn rejected_total(&self) -> usize {
        self.rejected.values().sum()
    }
}

/// Converts raw listing rows into canonical records. Pure: no I/O.
pub struct Normalizer {
    config: NormalizerConfig,
    updated_at: NaiveDateTime,
}

impl Normalizer {
    /// `updated_at` is stamped on every record produced by this normalizer.
    pub fn new(mut config: NormalizerConfig, updated_at: NaiveDateTime) -> Self {
        for (keyword, _) in config.rtype_keywords.iter_mut() {
            *keyword = keyword.to_lowercase();
        }
        Self { config, updated_at }
    }

    pub fn normalize(&self, raw: &RawItem) -> Result<Record, RejectReason> {
        let cell = raw.title_cell.as_ref().ok_or(RejectReason::MissingTitleCell)?;
        let link = cell.link.as_ref().ok_or(RejectReason::MissingLink)?;

        let title = clean_text(&link.text);
        if title.is_empty() {
            return Err(RejectReason::MissingTitleCell);
        }
        if title.chars().count() > self.config.title_max_chars {
            return Err(RejectReason::TitleTooLong);
        }

        let external_link = link
            .href
            .as_deref()
            .and_then(|href| absolutize(&self.config.site_origin, href))
            .ok_or(RejectReason::NoExternalLink)?;

        let summary = raw
            .summary
            .as_deref()
            .map(clean_text)
            .filter(|s| !s.is_empty())
            .map(|s| capitalize_first(&s));

        let created_at = raw
            .date
            .as_deref()
            .and_then(resolve_created_at)
            .ok_or(RejectReason::InvalidCreationDate)?;

        let rtype_id = self.classify(&title);

        Ok(Record {
            title: Some(title),
            summary,
            created_at: Some(created_at),
            updated_at: self.updated_at,
            is_active: true,
            gtype: Some(LINK_GTYPE.to_string()),
            entity: self.config.entity.clone(),
            external_link: Some(external_link),
            rtype_id: Some(rtype_id),
            classification_id: self.config.classification_id,
        })
    }

    /// Normalizes every item; a bad item is counted and skipped, never fatal.
    #[instrument(skip(self, items), fields(entity = %self.config.entity, stage = "normalize"))]
    pub fn normalize_batch(&self, items: &[RawItem]) -> NormalizeReport {
        let mut report = NormalizeReport::default();

        for (row, item) in items.iter().enumerate() {
            match self.normalize(item) {
                Ok(record) => report.records.push(record),
                Err(reason) => {
                    debug!(row, reason = %reason, "Skipping raw item");
                    NormalizeMetrics::record_rejected(reason);
                    *report.rejected.entry(reason).or_insert(0) += 1;
                }
            }
        }

        if report.rejected_total() > 0 {
            warn!(rejected = ?report.rejected, "Some raw items were rejected during normalization");
        }
        info!(
            extracted = items.len(),
            normalized = report.records.len(),
            "Normalization complete"
        );
        report
    }

    /// Maps a title to a regulation-type id using the keyword table.
    pub fn classify(&self, title: &str) -> i64 {
        let lower = title.to_lowercase();
        self.config
            .rtype_keywords
            .iter()
            .find(|(keyword, _)| lower.contains(keyword.as_str()))
            .map(|(_, id)| *id)
            .unwrap_or(self.config.default_rtype_id)
    }
}

/// Removes quotation marks, trims, and collapses whitespace runs to one space.
pub fn clean_text(text: &str) -> String {
    let stripped: String = text.chars().filter(|c| !QUOTE_CHARS.contains(c)).collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn capitalize_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Resolves a link against the site origin. Empty links resolve to nothing.
pub fn absolutize(origin: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }

    let origin = origin.trim_end_matches('/');
    if href.starts_with('/') {
        Some(format!("{}{}", origin, href))
    } else {
        Some(format!("{}/{}", origin, href))
    }
}

/// Resolves the creation date text.
///
/// `2024-03-15T10:00:00` keeps the part before `T`, `15/03/2024` becomes
/// `2024-03-15`, anything else passes through unchanged. Blank input yields `None`.
pub fn resolve_created_at(raw: &str) -> Option<String> {
    let raw = raw.trim();

    let resolved = if let Some((date, _)) = raw.split_once('T') {
        date.trim().to_string()
    } else if raw.contains('/') {
        match NaiveDate::parse_from_str(raw, "%d/%m/%Y") {
            Ok(date) => date.format("%Y-%m-%d").to_string(),
            Err(_) => raw.to_string(),
        }
    } else {
        raw.to_string()
    };

    if resolved.is_empty() {
        None
    } else {
        Some(resolved)
    }
}
