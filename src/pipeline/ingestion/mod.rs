// Pipeline ingestion: the sources that hand raw listing rows to the normalizer

pub mod html_table;

use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::Result;
use crate::types::RawItem;
pub use html_table::HtmlTableSource;

/// Anything that can yield a batch of raw listing rows.
pub trait RawSource {
    fn name(&self) -> &str;

    fn fetch(&mut self) -> Result<Vec<RawItem>>;
}

/// Replays a saved JSON array of raw rows.
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl RawSource for JsonFileSource {
    fn name(&self) -> &str {
        "json_file"
    }

    fn fetch(&mut self) -> Result<Vec<RawItem>> {
        let text = fs::read_to_string(&self.path)?;
        let items: Vec<RawItem> = serde_json::from_str(&text)?;
        info!(path = %self.path.display(), items = items.len(), "Loaded raw items");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_json_source_reads_partial_rows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"title_cell": {{"link": {{"text": "Decreto 1", "href": "/d1"}}}}, "date": "15/03/2024"}},
                {{"title_cell": null}}
            ]"#
        )
        .unwrap();

        let items = JsonFileSource::new(file.path()).fetch().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], RawItem::linked("Decreto 1", Some("/d1")).with_date("15/03/2024"));
        assert_eq!(items[1], RawItem::default());
    }
}
