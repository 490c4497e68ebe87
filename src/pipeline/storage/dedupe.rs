use std::collections::HashSet;

use crate::types::Record;

/// `title|created_at|external_link`, with the title trimmed and nulls as empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn from_parts(
        title: Option<&str>,
        created_at: Option<&str>,
        external_link: Option<&str>,
    ) -> Self {
        Self(format!(
            "{}|{}|{}",
            title.unwrap_or("").trim(),
            created_at.unwrap_or(""),
            external_link.unwrap_or("")
        ))
    }

    pub fn of(record: &Record) -> Self {
        Self::from_parts(
            record.title.as_deref(),
            record.created_at.as_deref(),
            record.external_link.as_deref(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Candidates split into genuinely new records and the duplicates dropped.
#[derive(Debug, Default)]
pub struct Partition {
    pub new: Vec<Record>,
    /// Already persisted by an earlier run.
    pub existing_duplicates: usize,
    /// Repeated within the incoming batch; the first occurrence is kept.
    pub batch_duplicates: usize,
}

impl Partition {
    pub fn duplicates(&self) -> usize {
        self.existing_duplicates + self.batch_duplicates
    }
}

/// Known identities for one entity.
#[derive(Debug, Default)]
pub struct DeduplicationIndex {
    known: HashSet<IdentityKey>,
}

impl DeduplicationIndex {
    pub fn new<I>(persisted: I) -> Self
    where
        I: IntoIterator<Item = IdentityKey>,
    {
        Self {
            known: persisted.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    pub fn contains(&self, key: &IdentityKey) -> bool {
        self.known.contains(key)
    }

    /// Splits candidates into new and duplicate, checking prior runs and the batch itself.
    pub fn partition(&self, candidates: Vec<Record>) -> Partition {
        let mut seen: HashSet<IdentityKey> = HashSet::new();
        let mut partition = Partition::default();

        for record in candidates {
            let key = IdentityKey::of(&record);
            if self.contains(&key) {
                partition.existing_duplicates += 1;
            } else if !seen.insert(key) {
                partition.batch_duplicates += 1;
            } else {
                partition.new.push(record);
            }
        }

        partition
    }
}
