//! On-disk format of the local record collection.
//!
//! The whole collection is one JSON document. Writes go to a temporary file in
//! the target directory which is then renamed over the previous document, so a
//! crash mid-write leaves the last committed state readable.

use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::models::{LocalId, Record};

const STORE_FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct StoreDocumentRef<'a> {
    version: u32,
    records: Vec<&'a Record>,
}

#[derive(Deserialize)]
struct StoreDocument {
    version: u32,
    records: Vec<Record>,
}

/// Load the collection at `path`; a missing file is an empty collection.
pub fn load(path: &Path) -> Result<BTreeMap<LocalId, Record>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Ok(BTreeMap::new());
        }
        Err(error) => return Err(error.into()),
    };

    let document: StoreDocument = serde_json::from_slice(&bytes)?;
    if document.version != STORE_FORMAT_VERSION {
        return Err(Error::InvalidInput(format!(
            "unsupported record store version {} (expected {STORE_FORMAT_VERSION})",
            document.version
        )));
    }

    let mut records = BTreeMap::new();
    for record in document.records {
        if records.insert(record.local_id, record).is_some() {
            return Err(Error::InvalidInput(
                "record store contains a duplicate local id".to_string(),
            ));
        }
    }
    Ok(records)
}

/// Atomically replace the collection at `path`.
pub fn save(path: &Path, records: &BTreeMap<LocalId, Record>) -> Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let document = StoreDocumentRef {
        version: STORE_FORMAT_VERSION,
        records: records.values().collect(),
    };

    let temp = NamedTempFile::new_in(parent)?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        serde_json::to_writer(&mut writer, &document)?;
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|error| Error::Io(error.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordFields;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn sample_records() -> BTreeMap<LocalId, Record> {
        let mut records = BTreeMap::new();
        for text in ["breakfast", "lunch"] {
            let record = Record::new(RecordFields::new(text).logged_at(100), 100);
            records.insert(record.local_id, record);
        }
        records
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let records = load(&dir.path().join("records.json")).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn save_then_load_preserves_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("records.json");
        let records = sample_records();

        save(&path, &records).unwrap();

        assert_eq!(load(&path).unwrap(), records);
    }

    #[test]
    fn save_leaves_no_temporary_files_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.json");

        save(&path, &sample_records()).unwrap();
        save(&path, &BTreeMap::new()).unwrap();

        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
        assert!(load(&path).unwrap().is_empty());
    }

    #[test]
    fn load_rejects_unknown_version() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.json");
        std::fs::write(&path, r#"{"version":99,"records":[]}"#).unwrap();

        match load(&path).unwrap_err() {
            Error::InvalidInput(message) => assert!(message.contains("version")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn load_rejects_corrupted_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.json");
        std::fs::write(&path, b"{\"version\":1,\"rec").unwrap();

        assert!(matches!(load(&path), Err(Error::Serialization(_))));
    }
}
