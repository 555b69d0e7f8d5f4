use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::backend::Store;

/// Writes every backend collection to a gzip-compressed JSON file.
pub fn save_snapshot(store: &Store, path: impl AsRef<Path>) -> std::io::Result<()> {
    let file = File::create(path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut writer = std::io::BufWriter::new(encoder);

    serde_json::to_writer(&mut writer, store)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    let encoder = writer.into_inner().map_err(|e| e.into_error())?;
    encoder.finish()?.flush()?;
    Ok(())
}

pub fn load_snapshot(path: impl AsRef<Path>) -> std::io::Result<Store> {
    let file = File::open(path)?;
    let decoder = GzDecoder::new(file);
    let reader = std::io::BufReader::new(decoder);

    let store: Store = serde_json::from_reader(reader)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    Ok(store)
}

/// Loads a snapshot if the file exists, or starts empty.
pub fn load_or_default(path: impl AsRef<Path>) -> std::io::Result<Store> {
    match load_snapshot(path) {
        Ok(store) => Ok(store),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Store::default()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spreadsheet::Dataset;

    #[test]
    fn snapshot_survives_a_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json.gz");
        let mut store = Store::default();
        let dataset = Dataset::new("Inventory", "u1");
        store.tables.insert(dataset.id.clone(), dataset.clone());

        save_snapshot(&store, &path).unwrap();
        let loaded = load_snapshot(&path).unwrap();
        assert_eq!(loaded.tables.get(&dataset.id), Some(&dataset));
    }

    #[test]
    fn missing_snapshot_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = load_or_default(dir.path().join("absent.gz")).unwrap();
        assert!(store.tables.is_empty());
    }
}
