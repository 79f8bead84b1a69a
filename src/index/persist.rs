//! On-disk artifacts for a partition
//!
//! Each partition is two files under `<root>/<tenant>/`:
//! - `<source>.index`: bincode-encoded [`VectorFile`] (dimension, count,
//!   BLAKE3 checksum, row-major f32 data)
//! - `<source>.ids.json`: JSON array of chunk identifiers
//!
//! Writes go to temporary siblings that are fsynced and then renamed, vectors
//! first. An interrupted write can therefore leave more vectors than ids, never
//! the reverse.

use super::key::IndexKey;
use super::partition::IndexPartition;
use crate::error::{Result, SourcegateError};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct VectorFile {
    version: u32,
    dimension: u32,
    count: u64,
    checksum: [u8; 32],
    data: Vec<f32>,
}

/// Paths of one partition's artifacts
#[derive(Debug, Clone)]
pub(crate) struct PartitionFiles {
    pub vectors: PathBuf,
    pub ids: PathBuf,
}

impl PartitionFiles {
    pub fn new(root: &Path, key: &IndexKey) -> Self {
        let dir = root.join(key.tenant_component());
        let stem = key.source_component();
        Self {
            vectors: dir.join(format!("{}.index", stem)),
            ids: dir.join(format!("{}.ids.json", stem)),
        }
    }
}

fn checksum(data: &[f32]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    for value in data {
        hasher.update(&value.to_le_bytes());
    }
    *hasher.finalize().as_bytes()
}

/// Load a partition, treating anything missing or unreadable as empty
pub(crate) fn load_partition(files: &PartitionFiles, key: &IndexKey) -> IndexPartition {
    let has_vectors = files.vectors.exists();
    let has_ids = files.ids.exists();

    match (has_vectors, has_ids) {
        (false, false) => return IndexPartition::empty(),
        (true, false) | (false, true) => {
            tracing::warn!(
                "Partition {} has only one of its two files (vectors: {}, ids: {}); starting empty",
                key,
                has_vectors,
                has_ids
            );
            return IndexPartition::empty();
        }
        (true, true) => {}
    }

    match read_partition(files) {
        Ok(partition) => {
            if partition.vector_count() != partition.ids().len() {
                tracing::warn!(
                    "Partition {} loaded with {} vectors and {} ids",
                    key,
                    partition.vector_count(),
                    partition.ids().len()
                );
            }
            tracing::debug!(
                "Loaded partition {} ({} vectors)",
                key,
                partition.vector_count()
            );
            partition
        }
        Err(e) => {
            tracing::warn!("Partition {} is unreadable, starting empty: {}", key, e);
            IndexPartition::empty()
        }
    }
}

fn read_partition(files: &PartitionFiles) -> Result<IndexPartition> {
    let file = File::open(&files.vectors).map_err(|e| SourcegateError::Io {
        source: e,
        context: format!("Failed to open vector file: {}", files.vectors.display()),
    })?;
    let stored: VectorFile = bincode::deserialize_from(BufReader::new(file))
        .map_err(|e| SourcegateError::Config(format!("Failed to decode vector file: {}", e)))?;

    if stored.version != FORMAT_VERSION {
        return Err(SourcegateError::Config(format!(
            "Unsupported vector file version {}",
            stored.version
        )));
    }

    let dimension = stored.dimension as usize;
    let expected_len = (stored.count as usize).checked_mul(dimension);
    if dimension == 0 || expected_len != Some(stored.data.len()) {
        return Err(SourcegateError::Config(format!(
            "Vector file shape mismatch: {} x {} but {} values",
            stored.count,
            dimension,
            stored.data.len()
        )));
    }

    if checksum(&stored.data) != stored.checksum {
        return Err(SourcegateError::Config(
            "Vector file checksum mismatch".to_string(),
        ));
    }

    let ids_file = File::open(&files.ids).map_err(|e| SourcegateError::Io {
        source: e,
        context: format!("Failed to open id file: {}", files.ids.display()),
    })?;
    let ids: Vec<String> =
        serde_json::from_reader(BufReader::new(ids_file)).map_err(|e| SourcegateError::Json {
            source: e,
            context: format!("Failed to parse id file: {}", files.ids.display()),
        })?;

    Ok(IndexPartition::from_parts(dimension, stored.data, ids))
}

/// Durably write both artifacts of a partition
pub(crate) fn save_partition(files: &PartitionFiles, partition: &IndexPartition) -> Result<()> {
    let dimension = partition.dimension().ok_or_else(|| {
        SourcegateError::InvalidBatch("cannot persist a partition with no vectors".to_string())
    })?;

    let parent = files
        .vectors
        .parent()
        .ok_or_else(|| SourcegateError::Config("Invalid partition path".to_string()))?;
    fs::create_dir_all(parent).map_err(|e| SourcegateError::Io {
        source: e,
        context: format!("Failed to create partition directory: {}", parent.display()),
    })?;

    let data = partition.raw_vectors();
    let stored = VectorFile {
        version: FORMAT_VERSION,
        dimension: dimension as u32,
        count: partition.vector_count() as u64,
        checksum: checksum(data),
        data: data.to_vec(),
    };

    let vectors_tmp = temp_path(&files.vectors);
    let ids_tmp = temp_path(&files.ids);

    let written = write_synced(&vectors_tmp, |writer| {
        bincode::serialize_into(writer, &stored)
            .map_err(|e| SourcegateError::Config(format!("Failed to encode vector file: {}", e)))
    })
    .and_then(|_| {
        write_synced(&ids_tmp, |writer| {
            serde_json::to_writer(writer, partition.ids()).map_err(|e| SourcegateError::Json {
                source: e,
                context: "Failed to serialize chunk ids".to_string(),
            })
        })
    })
    .and_then(|_| rename(&vectors_tmp, &files.vectors))
    .and_then(|_| rename(&ids_tmp, &files.ids));

    if let Err(e) = written {
        remove_temp(&vectors_tmp);
        remove_temp(&ids_tmp);
        return Err(e);
    }

    // Both renames are done; a failed directory sync only weakens durability
    if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
        tracing::warn!(
            "Failed to sync partition directory {}: {}",
            parent.display(),
            e
        );
    }

    Ok(())
}

fn remove_temp(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove temp file {}: {}", path.display(), e),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_synced<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let file = File::create(path).map_err(|e| SourcegateError::Io {
        source: e,
        context: format!("Failed to create temp file: {}", path.display()),
    })?;
    let mut writer = BufWriter::new(file);
    write(&mut writer)?;
    writer.flush().map_err(|e| SourcegateError::Io {
        source: e,
        context: format!("Failed to flush temp file: {}", path.display()),
    })?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| SourcegateError::Io {
            source: e,
            context: format!("Failed to sync temp file: {}", path.display()),
        })
}

fn rename(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).map_err(|e| SourcegateError::Io {
        source: e,
        context: format!(
            "Failed to move {} into place at {}",
            from.display(),
            to.display()
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_partition() -> IndexPartition {
        let mut partition = IndexPartition::empty();
        partition
            .append(
                &[vec![1.0, 0.0], vec![0.0, 2.0]],
                &["c1".to_string(), "c2".to_string()],
            )
            .unwrap();
        partition
    }

    #[test]
    fn test_paths_are_keyed_by_tenant_and_source() {
        let files = PartitionFiles::new(Path::new("/data"), &IndexKey::new("acme", "finance"));
        assert_eq!(files.vectors, PathBuf::from("/data/acme/finance.index"));
        assert_eq!(files.ids, PathBuf::from("/data/acme/finance.ids.json"));
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let key = IndexKey::new("acme", "finance");
        let files = PartitionFiles::new(temp.path(), &key);

        let partition = sample_partition();
        save_partition(&files, &partition).unwrap();
        assert!(files.vectors.exists());
        assert!(files.ids.exists());
        assert!(!temp_path(&files.vectors).exists());

        let loaded = load_partition(&files, &key);
        assert_eq!(loaded.dimension(), Some(2));
        assert_eq!(loaded.vector_count(), 2);
        assert_eq!(loaded.ids(), partition.ids());
        assert_eq!(loaded.raw_vectors(), partition.raw_vectors());
    }

    #[test]
    fn test_missing_files_load_empty() {
        let temp = TempDir::new().unwrap();
        let key = IndexKey::new("acme", "hr");
        let files = PartitionFiles::new(temp.path(), &key);
        assert!(load_partition(&files, &key).is_empty());
    }

    #[test]
    fn test_one_file_missing_loads_empty() {
        let temp = TempDir::new().unwrap();
        let key = IndexKey::new("acme", "finance");
        let files = PartitionFiles::new(temp.path(), &key);

        save_partition(&files, &sample_partition()).unwrap();
        fs::remove_file(&files.ids).unwrap();
        assert!(load_partition(&files, &key).is_empty());

        save_partition(&files, &sample_partition()).unwrap();
        fs::remove_file(&files.vectors).unwrap();
        assert!(load_partition(&files, &key).is_empty());
    }

    #[test]
    fn test_corrupt_vector_file_loads_empty() {
        let temp = TempDir::new().unwrap();
        let key = IndexKey::new("acme", "finance");
        let files = PartitionFiles::new(temp.path(), &key);

        save_partition(&files, &sample_partition()).unwrap();
        fs::write(&files.vectors, b"not a vector file").unwrap();
        assert!(load_partition(&files, &key).is_empty());
    }

    #[test]
    fn test_checksum_detects_changed_values() {
        let temp = TempDir::new().unwrap();
        let key = IndexKey::new("acme", "finance");
        let files = PartitionFiles::new(temp.path(), &key);
        save_partition(&files, &sample_partition()).unwrap();

        let bytes = fs::read(&files.vectors).unwrap();
        let mut stored: VectorFile = bincode::deserialize(&bytes).unwrap();
        stored.data[0] = 0.25;
        fs::write(&files.vectors, bincode::serialize(&stored).unwrap()).unwrap();

        assert!(load_partition(&files, &key).is_empty());
    }

    #[test]
    fn test_empty_partition_not_persisted() {
        let temp = TempDir::new().unwrap();
        let files = PartitionFiles::new(temp.path(), &IndexKey::new("acme", "x"));
        assert!(save_partition(&files, &IndexPartition::empty()).is_err());
    }

    #[test]
    fn test_failed_save_leaves_no_temp_files() {
        let temp = TempDir::new().unwrap();
        let files = PartitionFiles::new(temp.path(), &IndexKey::new("acme", "finance"));
        // A directory where the id file belongs makes the second rename fail
        fs::create_dir_all(&files.ids).unwrap();
        fs::write(files.ids.join("keep"), "x").unwrap();

        assert!(save_partition(&files, &sample_partition()).is_err());

        assert!(!temp_path(&files.vectors).exists());
        assert!(!temp_path(&files.ids).exists());
    }
}
