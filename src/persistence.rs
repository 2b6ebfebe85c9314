//! Persistence layer for per-submission vector indexes.
//!
//! Each index lives in its own directory. Supports both JSON (human-readable)
//! and bincode (efficient binary) formats; bincode is the default. Writes go
//! to a temporary file that is renamed into place, and stale files of the
//! other format are removed, so a location only ever holds the latest build.

use crate::error::{GraderError, Result};
use crate::index::VectorIndex;
use std::fs;
use std::path::{Path, PathBuf};

/// Filename for bincode-encoded indexes.
pub const BINCODE_FILENAME: &str = "index.bin";
/// Filename for JSON-encoded indexes.
pub const JSON_FILENAME: &str = "index.json";

/// Save format for vector indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveFormat {
    /// JSON format (human-readable, larger).
    Json,
    /// Bincode format (binary, compact).
    #[default]
    Bincode,
}

impl SaveFormat {
    /// Filename used for this format inside an index directory.
    pub fn filename(self) -> &'static str {
        match self {
            SaveFormat::Json => JSON_FILENAME,
            SaveFormat::Bincode => BINCODE_FILENAME,
        }
    }

    fn other(self) -> Self {
        match self {
            SaveFormat::Json => SaveFormat::Bincode,
            SaveFormat::Bincode => SaveFormat::Json,
        }
    }
}

/// Maps submission keys to index directories under a root.
#[derive(Debug, Clone)]
pub struct IndexStore {
    root: PathBuf,
}

impl IndexStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for a submission key.
    ///
    /// Keys may contain `/` to nest (e.g. `assignment/student`). Bytes other
    /// than ASCII alphanumerics, `-`, `_` and `.` are percent-encoded, `%`
    /// included, so distinct keys always map to distinct directories. Empty
    /// segments and `.`/`..` segments are rejected.
    pub fn location(&self, key: &str) -> Result<PathBuf> {
        let invalid = |reason: &str| GraderError::InvalidKey {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        if key.is_empty() {
            return Err(invalid("key is empty"));
        }

        let mut path = self.root.clone();
        for segment in key.split('/') {
            match segment {
                "" => return Err(invalid("empty path segment")),
                "." | ".." => return Err(invalid("relative path segment")),
                _ => path.push(encode_segment(segment)),
            }
        }
        Ok(path)
    }
}

fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

/// Save an index to a directory in the default format.
pub fn save_index(index: &VectorIndex, dir: &Path) -> Result<()> {
    save_index_with_format(index, dir, SaveFormat::default())
}

/// Save an index with specific format, replacing whatever the directory held.
pub fn save_index_with_format(index: &VectorIndex, dir: &Path, format: SaveFormat) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| GraderError::io(dir, e))?;

    let data = match format {
        SaveFormat::Json => serde_json::to_string_pretty(index)
            .map_err(|e| GraderError::Serialization(e.to_string()))?
            .into_bytes(),
        SaveFormat::Bincode => {
            let config = bincode::config::standard();
            bincode::encode_to_vec(index, config)
                .map_err(|e| GraderError::Serialization(e.to_string()))?
        }
    };

    let path = dir.join(format.filename());
    let tmp = dir.join(format!("{}.tmp", format.filename()));
    fs::write(&tmp, &data).map_err(|e| GraderError::io(&tmp, e))?;
    fs::rename(&tmp, &path).map_err(|e| GraderError::io(&path, e))?;

    let stale = dir.join(format.other().filename());
    if stale.exists() {
        fs::remove_file(&stale).map_err(|e| GraderError::io(&stale, e))?;
    }

    tracing::debug!("Saved index ({} entries) to {}", index.len(), path.display());
    Ok(())
}

/// Load an index from a directory, whichever format it was saved in.
pub fn load_index(dir: &Path) -> Result<VectorIndex> {
    for format in [SaveFormat::Bincode, SaveFormat::Json] {
        let path = dir.join(format.filename());
        if path.is_file() {
            return load_index_file(&path, format);
        }
    }
    Err(GraderError::IndexNotFound(dir.to_path_buf()))
}

fn load_index_file(path: &Path, format: SaveFormat) -> Result<VectorIndex> {
    let data = fs::read(path).map_err(|e| GraderError::io(path, e))?;

    let index = match format {
        SaveFormat::Json => serde_json::from_slice(&data)
            .map_err(|e| GraderError::Serialization(e.to_string()))?,
        SaveFormat::Bincode => {
            let config = bincode::config::standard();
            let (index, _): (VectorIndex, usize) = bincode::decode_from_slice(&data, config)
                .map_err(|e| GraderError::Serialization(e.to_string()))?;
            index
        }
    };

    Ok(index)
}

/// Check if an index exists in the directory.
pub fn index_exists(dir: &Path) -> bool {
    dir.join(BINCODE_FILENAME).is_file() || dir.join(JSON_FILENAME).is_file()
}

/// Get the size of the stored index in bytes.
pub fn index_size(dir: &Path) -> Result<u64> {
    for name in [BINCODE_FILENAME, JSON_FILENAME] {
        let path = dir.join(name);
        if path.is_file() {
            let metadata = fs::metadata(&path).map_err(|e| GraderError::io(&path, e))?;
            return Ok(metadata.len());
        }
    }
    Err(GraderError::IndexNotFound(dir.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::embedding::HashEmbedder;
    use tempfile::TempDir;

    fn create_test_index(texts: &[&str]) -> VectorIndex {
        let embedder = HashEmbedder::new(32).unwrap();
        let docs = texts
            .iter()
            .enumerate()
            .map(|(i, t)| Document::new(*t).with_chunk_index(i))
            .collect();
        VectorIndex::build(docs, &embedder).unwrap()
    }

    #[test]
    fn test_save_and_load_bincode() {
        let dir = TempDir::new().unwrap();
        let location = dir.path().join("sub-1");

        let original = create_test_index(&["alpha", "beta"]);
        save_index(&original, &location).unwrap();

        assert!(index_exists(&location));
        assert!(location.join(BINCODE_FILENAME).is_file());

        let loaded = load_index(&location).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.model_name(), original.model_name());
        assert_eq!(loaded.entries()[1].document.content, "beta");
        assert_eq!(loaded.entries()[0].embedding, original.entries()[0].embedding);
    }

    #[test]
    fn test_save_and_load_json() {
        let dir = TempDir::new().unwrap();
        let location = dir.path().join("sub-json");

        let original = create_test_index(&["gamma"]);
        save_index_with_format(&original, &location, SaveFormat::Json).unwrap();

        let content = fs::read_to_string(location.join(JSON_FILENAME)).unwrap();
        assert!(content.contains("gamma"));

        let loaded = load_index(&location).unwrap();
        assert_eq!(loaded.entries()[0].document.content, "gamma");
    }

    #[test]
    fn test_overwrite_replaces_previous() {
        let dir = TempDir::new().unwrap();
        let location = dir.path().join("sub");

        save_index_with_format(&create_test_index(&["old"]), &location, SaveFormat::Json).unwrap();
        save_index(&create_test_index(&["new", "newer"]), &location).unwrap();

        assert!(!location.join(JSON_FILENAME).exists());
        let loaded = load_index(&location).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.entries()[0].document.content, "new");
    }

    #[test]
    fn test_load_nonexistent() {
        let result = load_index(Path::new("/nonexistent/index"));
        assert!(matches!(result, Err(GraderError::IndexNotFound(_))));
    }

    #[test]
    fn test_load_corrupt() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(BINCODE_FILENAME), b"\xff\xff\xff").unwrap();
        assert!(matches!(
            load_index(dir.path()),
            Err(GraderError::Serialization(_))
        ));
    }

    #[test]
    fn test_index_size() {
        let dir = TempDir::new().unwrap();
        save_index(&create_test_index(&["x"]), dir.path()).unwrap();
        assert!(index_size(dir.path()).unwrap() > 0);
    }

    #[test]
    fn test_store_locations_are_scoped() {
        let store = IndexStore::new("/data/indexes");
        assert_eq!(
            store.location("hw1/alice").unwrap(),
            PathBuf::from("/data/indexes/hw1/alice")
        );
        assert_eq!(
            store.location("student 42:final").unwrap(),
            PathBuf::from("/data/indexes/student%2042%3Afinal")
        );
        assert_eq!(
            store.location("hw1/jos\u{e9}").unwrap(),
            PathBuf::from("/data/indexes/hw1/jos%C3%A9")
        );
    }

    #[test]
    fn test_distinct_keys_get_distinct_locations() {
        let store = IndexStore::new("/idx");
        let keys = [
            "hw1/student 42",
            "hw1/student_42",
            "hw1/student%2042",
            "a:b",
            "a?b",
            "a_b",
            "hw1/alice",
            "hw1alice",
        ];
        let locations: Vec<PathBuf> = keys.iter().map(|k| store.location(k).unwrap()).collect();
        for (i, a) in locations.iter().enumerate() {
            for b in &locations[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_traversal_and_empty_segments_rejected() {
        let store = IndexStore::new("/idx");
        for key in ["", "..", "hw1/../alice", "../../etc/passwd", "./alice", "/abs", "hw1//alice", "hw1/"] {
            let err = store.location(key).unwrap_err();
            assert!(matches!(err, GraderError::InvalidKey { .. }), "key {key:?}");
            assert_eq!(err.stage(), crate::error::Stage::Indexing);
        }
    }
}
