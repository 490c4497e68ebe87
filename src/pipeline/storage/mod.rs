// Persistence stage: deduplication against prior runs and batched writes

pub mod dedupe;
pub mod sqlite;
pub mod writer;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Result;
use crate::types::Record;
pub use dedupe::{DeduplicationIndex, IdentityKey, Partition};
pub use sqlite::SqliteStore;
pub use writer::{PersistenceCoordinator, WriteOutcome};

/// How identifiers of freshly inserted regulation rows are recovered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdRecovery {
    /// `INSERT .. RETURNING id` inside the insert transaction. Safe with concurrent writers.
    #[default]
    Returning,
    /// Re-query the newest N rows of the entity after commit.
    /// Only correct while a single writer inserts for the entity.
    MostRecent,
}

impl FromStr for IdRecovery {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "returning" => Ok(IdRecovery::Returning),
            "most_recent" | "most-recent" => Ok(IdRecovery::MostRecent),
            other => Err(format!("unknown id recovery mode '{}'", other)),
        }
    }
}

impl fmt::Display for IdRecovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdRecovery::Returning => f.write_str("returning"),
            IdRecovery::MostRecent => f.write_str("most_recent"),
        }
    }
}

/// Storage seam used by the persistence coordinator.
pub trait RegulationStore {
    /// Identity keys of every regulation already persisted for `entity`.
    fn existing_identities(&self, entity: &str) -> Result<Vec<IdentityKey>>;

    /// Inserts all records in one unit of work and returns their assigned ids.
    /// Nothing is kept if any row fails. When the rows were committed but their ids
    /// cannot be read back, the error is `PipelineError::IdRecovery`.
    fn insert_regulations(&mut self, entity: &str, records: &[Record]) -> Result<Vec<i64>>;

    /// Links each regulation id to `component_id`. Returns the number of rows written.
    fn insert_association_links(
        &mut self,
        regulation_ids: &[i64],
        component_id: i64,
    ) -> Result<usize>;
}
