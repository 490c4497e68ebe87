use anyhow::Result;
use chrono::NaiveDate;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

use reg_ingest::pipeline::ingestion::{JsonFileSource, RawSource};
use reg_ingest::pipeline::processing::validation::RuleSet;
use reg_ingest::pipeline::storage::sqlite::StoreOptions;
use reg_ingest::pipeline::storage::{
    IdRecovery, IdentityKey, PersistenceCoordinator, RegulationStore, SqliteStore,
};
use reg_ingest::pipeline::{run_stage, Pipeline, RunStatus, RunSummary};
use reg_ingest::{RawItem, Record, Settings};

const DDL: &str = include_str!("../sql/create_tables.sql");
const RULES: &str = include_str!("../config/validation_rules.yml");

const REGULATIONS_ONLY_DDL: &str = "
CREATE TABLE IF NOT EXISTS regulations (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at        TEXT,
    updated_at        TEXT NOT NULL,
    is_active         INTEGER NOT NULL DEFAULT 1,
    title             TEXT,
    gtype             TEXT,
    entity            TEXT NOT NULL,
    external_link     TEXT,
    rtype_id          INTEGER,
    summary           TEXT,
    classification_id INTEGER NOT NULL
);";

struct VecSource(Vec<RawItem>);

impl RawSource for VecSource {
    fn name(&self) -> &str {
        "vec"
    }

    fn fetch(&mut self) -> reg_ingest::Result<Vec<RawItem>> {
        Ok(self.0.clone())
    }
}

/// Hides persisted identities so only the store's unique index can catch duplicates.
struct BlindStore(SqliteStore);

impl RegulationStore for BlindStore {
    fn existing_identities(&self, _entity: &str) -> reg_ingest::Result<Vec<IdentityKey>> {
        Ok(Vec::new())
    }

    fn insert_regulations(
        &mut self,
        entity: &str,
        records: &[Record],
    ) -> reg_ingest::Result<Vec<i64>> {
        self.0.insert_regulations(entity, records)
    }

    fn insert_association_links(
        &mut self,
        ids: &[i64],
        component_id: i64,
    ) -> reg_ingest::Result<usize> {
        self.0.insert_association_links(ids, component_id)
    }
}

fn settings(dir: &Path) -> Settings {
    Settings {
        db_path: dir.join("regulations.db"),
        rtype_keywords: vec![("resolución".to_string(), 15), ("decreto".to_string(), 16)],
        ..Settings::default()
    }
}

fn pipeline(settings: &Settings) -> Pipeline {
    let started = NaiveDate::from_ymd_opt(2024, 3, 20)
        .unwrap()
        .and_hms_opt(8, 0, 0)
        .unwrap();
    Pipeline::started_at(settings, started)
}

fn rules() -> Result<RuleSet> {
    Ok(RuleSet::parse(RULES)?)
}

fn listing() -> Vec<RawItem> {
    vec![
        RawItem::linked("Resolución 123 de 2024", Some("/normativa/res-123"))
            .with_summary("por la cual se adopta el manual")
            .with_date("15/03/2024"),
        RawItem::linked("Decreto 45 de 2024", Some("https://www.ani.gov.co/normativa/dec-45"))
            .with_date("2024-02-01T00:00:00"),
        RawItem::linked("Circular 7", Some("/normativa/circ-7")).with_date("2024-01-10"),
    ]
}

fn schema_store(settings: &Settings, ddl: &str) -> Result<SqliteStore> {
    let mut store = SqliteStore::open(&settings.db_path, StoreOptions::from_settings(settings))?;
    store.ensure_schema(ddl)?;
    Ok(store)
}

fn writer(settings: &Settings) -> Result<PersistenceCoordinator<SqliteStore>> {
    let store = SqliteStore::open(&settings.db_path, StoreOptions::from_settings(settings))?;
    Ok(PersistenceCoordinator::new(store, settings.default_component_id))
}

/// One full run of `items` with the default rules through a fresh writer connection.
fn run_items(settings: &Settings, items: Vec<RawItem>) -> Result<RunSummary> {
    let summary = pipeline(settings).run(&mut VecSource(items), rules()?, &mut writer(settings)?)?;
    Ok(summary)
}

#[test]
fn test_second_run_inserts_nothing() -> Result<()> {
    let dir = tempdir()?;
    let settings = settings(dir.path());
    let check = schema_store(&settings, DDL)?;

    let first = run_items(&settings, listing())?;
    assert_eq!(first.status, RunStatus::Completed);
    assert_eq!(first.extracted, 3);
    assert_eq!(first.validated, 3);
    assert_eq!(first.inserted, 3);
    assert_eq!(first.associations, 3);

    let second = run_items(&settings, listing())?;
    assert_eq!(second.status, RunStatus::Skipped);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.duplicates, 3);
    assert!(second.message.contains("after duplicate validation"));

    assert_eq!(check.regulation_count(&settings.entity)?, 3);
    assert_eq!(check.association_ids()?.len(), 3);
    Ok(())
}

#[test]
fn test_records_are_classified_and_linked_to_default_component() -> Result<()> {
    let dir = tempdir()?;
    let settings = settings(dir.path());
    let check = schema_store(&settings, DDL)?;

    run_items(&settings, listing())?;

    let mut stmt = check.connection().prepare(
        "SELECT title, created_at, external_link, rtype_id, gtype FROM regulations ORDER BY id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    assert_eq!(
        rows[0],
        (
            "Resolución 123 de 2024".to_string(),
            "2024-03-15".to_string(),
            "https://www.ani.gov.co/normativa/res-123".to_string(),
            15,
            "link".to_string()
        )
    );
    assert_eq!(rows[1].1, "2024-02-01");
    assert_eq!(rows[1].3, 16);
    assert_eq!(rows[2].3, settings.default_rtype_id);

    assert!(check
        .association_ids()?
        .iter()
        .all(|(_, component)| *component == settings.default_component_id));
    Ok(())
}

#[test]
fn test_repeated_rows_in_one_batch_are_written_once() -> Result<()> {
    let dir = tempdir()?;
    let settings = settings(dir.path());
    let check = schema_store(&settings, DDL)?;

    let mut items = listing();
    // Same identity once the title is trimmed
    items.push(
        RawItem::linked("  Circular 7 ", Some("/normativa/circ-7")).with_date("2024-01-10"),
    );

    let summary = run_items(&settings, items)?;
    assert_eq!(summary.inserted, 3);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(check.regulation_count(&settings.entity)?, 3);
    Ok(())
}

#[test]
fn test_missing_component_table_keeps_regulations() -> Result<()> {
    let dir = tempdir()?;
    let settings = settings(dir.path());
    let check = schema_store(&settings, REGULATIONS_ONLY_DDL)?;

    let summary = run_items(&settings, listing())?;
    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.inserted, 3);
    assert_eq!(summary.associations, 0);
    assert!(summary.message.contains("Error inserting regulation components"));
    assert_eq!(check.regulation_count(&settings.entity)?, 3);
    Ok(())
}

#[test]
fn test_store_unique_index_catches_duplicates_missed_by_the_index() -> Result<()> {
    let dir = tempdir()?;
    let settings = settings(dir.path());
    let check = schema_store(&settings, DDL)?;

    run_items(&settings, listing())?;

    let blind = SqliteStore::open(&settings.db_path, StoreOptions::from_settings(&settings))?;
    let mut coordinator =
        PersistenceCoordinator::new(BlindStore(blind), settings.default_component_id);
    let summary = pipeline(&settings).run(&mut VecSource(listing()), rules()?, &mut coordinator)?;

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.inserted, 0);
    assert_eq!(
        summary.message,
        format!("Some records for entity {} were duplicates and skipped", settings.entity)
    );
    assert_eq!(check.regulation_count(&settings.entity)?, 3);
    assert_eq!(check.association_ids()?.len(), 3);
    Ok(())
}

#[test]
fn test_most_recent_recovery_links_the_inserted_rows() -> Result<()> {
    let dir = tempdir()?;
    let settings = Settings {
        id_recovery: IdRecovery::MostRecent,
        ..settings(dir.path())
    };
    let check = schema_store(&settings, DDL)?;

    let summary = run_items(&settings, listing())?;
    assert_eq!(summary.associations, 3);

    let mut stmt = check.connection().prepare("SELECT id FROM regulations ORDER BY id")?;
    let ids = stmt
        .query_map([], |row| row.get::<_, i64>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let linked: Vec<i64> = check.association_ids()?.into_iter().map(|(id, _)| id).collect();
    assert_eq!(linked, ids);
    Ok(())
}

#[test]
fn test_json_source_end_to_end() -> Result<()> {
    let dir = tempdir()?;
    let settings = settings(dir.path());
    let check = schema_store(&settings, DDL)?;

    let raw = dir.path().join("raw.json");
    fs::write(&raw, serde_json::to_string(&listing())?)?;

    let summary = pipeline(&settings).run(
        &mut JsonFileSource::new(&raw),
        rules()?,
        &mut writer(&settings)?,
    )?;
    assert_eq!(summary.inserted, 3);
    assert_eq!(check.regulation_count(&settings.entity)?, 3);
    Ok(())
}

#[test]
fn test_unusable_listing_skips_the_run() -> Result<()> {
    let dir = tempdir()?;
    let settings = settings(dir.path());
    let check = schema_store(&settings, DDL)?;

    let items = vec![
        RawItem::default(),
        RawItem::linked("Resolución sin fecha", Some("/normativa/x")),
        RawItem::linked(&"x".repeat(70), Some("/normativa/y")).with_date("2024-01-01"),
    ];
    let summary = run_items(&settings, items)?;
    assert_eq!(summary.status, RunStatus::Skipped);
    assert_eq!(summary.message, "No usable records after normalization.");
    assert_eq!(summary.normalization_rejected, 3);
    assert_eq!(check.regulation_count(&settings.entity)?, 0);
    Ok(())
}

#[test]
fn test_empty_validation_output_skips_the_write() -> Result<()> {
    let dir = tempdir()?;
    let settings = settings(dir.path());
    let check = schema_store(&settings, DDL)?;

    let strict = RuleSet::parse("types:\n  summary: str\nrequired:\n  - summary\n")?;
    let items =
        vec![RawItem::linked("Circular 7", Some("/normativa/circ-7")).with_date("2024-01-10")];
    let summary =
        pipeline(&settings).run(&mut VecSource(items), strict, &mut writer(&settings)?)?;
    assert_eq!(summary.status, RunStatus::Skipped);
    assert_eq!(summary.discarded, 1);
    assert_eq!(summary.message, "No valid data left after validation.");
    assert_eq!(check.regulation_count(&settings.entity)?, 0);
    Ok(())
}

#[test]
fn test_store_without_schema_fails_the_write_stage() -> Result<()> {
    let dir = tempdir()?;
    let settings = settings(dir.path());

    let failure = pipeline(&settings)
        .run(&mut VecSource(listing()), rules()?, &mut writer(&settings)?)
        .unwrap_err();
    assert_eq!(failure.stage, "write");
    assert_eq!(failure.summary.status, RunStatus::Failed);
    assert_eq!(failure.summary.validated, 3);
    assert_eq!(failure.summary.inserted, 0);
    Ok(())
}

#[test]
fn test_staged_write_failure_reports_counts() -> Result<()> {
    let dir = tempdir()?;
    let settings = settings(dir.path());
    let run = pipeline(&settings);

    let mut extracted = RunSummary::new(&settings.entity);
    let records = run.extract(&mut VecSource(listing()), &mut extracted)?;

    let mut coordinator = writer(&settings)?;
    let summary = run_stage("write", RunSummary::new(&settings.entity), |summary| {
        summary.validated = records.len();
        run.write(&mut coordinator, records, summary)
    });
    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.validated, 3);
    assert_eq!(summary.inserted, 0);
    assert!(summary.message.contains("no such table"));
    Ok(())
}
