//! Atomic JSON file persistence.
//!
//! Documents are written to a temporary file in the destination directory and
//! renamed into place, so readers never observe a partially written file.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::errors::StoreError;

/// Read a JSON document, returning `None` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })
}

/// Replace `path` with the pretty-printed JSON of `value`.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let tmp = serialize_to_temp(path, value)?;
    tmp.persist(path).map_err(|e| StoreError::Io {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    debug!(path = %path.display(), "wrote json document");
    Ok(())
}

/// Write `value` to `<dir>/<stem>.json` without overwriting an existing file.
///
/// On a name collision `-1`, `-2`, ... is appended to the stem. Returns the
/// path that was written.
pub fn write_json_new<T: Serialize>(dir: &Path, stem: &str, value: &T) -> Result<PathBuf, StoreError> {
    let first = dir.join(format!("{}.json", stem));
    let mut tmp = serialize_to_temp(&first, value)?;
    let mut attempt = 0u32;
    loop {
        let candidate = if attempt == 0 {
            first.clone()
        } else {
            dir.join(format!("{}-{}.json", stem, attempt))
        };
        match tmp.persist_noclobber(&candidate) {
            Ok(_) => {
                debug!(path = %candidate.display(), "wrote new json document");
                return Ok(candidate);
            }
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                tmp = e.file;
                attempt += 1;
            }
            Err(e) => {
                return Err(StoreError::Io {
                    path: candidate,
                    source: e.error,
                })
            }
        }
    }
}

fn serialize_to_temp<T: Serialize>(path: &Path, value: &T) -> Result<NamedTempFile, StoreError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(&dir).map_err(io_err)?;

    let mut tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;
    serde_json::to_writer_pretty(tmp.as_file_mut(), value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    tmp.write_all(b"\n").map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    Ok(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        name: String,
        count: u32,
    }

    #[test]
    fn test_read_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let doc: Option<Doc> = read_json(&dir.path().join("missing.json")).unwrap();
        assert!(doc.is_none());
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/doc.json");
        let doc = Doc {
            name: "a".into(),
            count: 2,
        };
        write_json(&path, &doc).unwrap();
        assert_eq!(read_json::<Doc>(&path).unwrap(), Some(doc));

        let replaced = Doc {
            name: "b".into(),
            count: 3,
        };
        write_json(&path, &replaced).unwrap();
        assert_eq!(read_json::<Doc>(&path).unwrap(), Some(replaced));
    }

    #[test]
    fn test_write_new_never_clobbers() {
        let dir = tempfile::tempdir().unwrap();
        let doc = Doc {
            name: "a".into(),
            count: 1,
        };
        let first = write_json_new(dir.path(), "merge-s1-x", &doc).unwrap();
        let second = write_json_new(dir.path(), "merge-s1-x", &doc).unwrap();
        assert_eq!(first, dir.path().join("merge-s1-x.json"));
        assert_eq!(second, dir.path().join("merge-s1-x-1.json"));
    }

    #[test]
    fn test_corrupt_file_is_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            read_json::<Doc>(&path),
            Err(StoreError::Json { .. })
        ));
    }
}
