use std::fs::{self, OpenOptions, create_dir_all};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    MetricsRepository, REPOSITORY_FORMAT_VERSION, RangeQuery, RepositoryEntry, RepositoryError,
    RepositoryResult, ResultKey, sort_entries,
};

/// Directory of JSON documents, one per result key.
///
/// File names are the SHA-256 of the key so concurrent writers for
/// different keys never touch the same file; each write goes through a
/// uniquely named temp file and a rename.
#[derive(Debug, Clone)]
pub struct FileSystemRepository {
    root: PathBuf,
}

#[derive(Serialize)]
struct StoredEntryRef<'a> {
    format_version: &'a str,
    entry: &'a RepositoryEntry,
}

#[derive(Deserialize)]
struct StoredEntry {
    format_version: String,
    entry: RepositoryEntry,
}

impl FileSystemRepository {
    pub fn new(root: impl Into<PathBuf>) -> RepositoryResult<Self> {
        let root = root.into();
        create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &ResultKey) -> RepositoryResult<PathBuf> {
        let canonical = serde_json::to_vec(key)?;
        let digest = hex::encode(Sha256::digest(&canonical));
        Ok(self.root.join(format!("{digest}.json")))
    }

    fn read_entry(path: &Path) -> RepositoryResult<RepositoryEntry> {
        let data = fs::read(path)?;
        let stored: StoredEntry = serde_json::from_slice(&data)?;
        if stored.format_version != REPOSITORY_FORMAT_VERSION {
            return Err(RepositoryError::UnsupportedFormat {
                path: path.to_path_buf(),
                version: stored.format_version,
            });
        }
        Ok(stored.entry)
    }
}

impl MetricsRepository for FileSystemRepository {
    fn save(&self, entry: &RepositoryEntry) -> RepositoryResult<()> {
        let path = self.path_for(&entry.key)?;
        let data = serde_json::to_vec_pretty(&StoredEntryRef {
            format_version: REPOSITORY_FORMAT_VERSION,
            entry,
        })?;
        write_bytes_atomic(&path, &data)?;
        debug!(key = %entry.key, path = %path.display(), "saved repository entry");
        Ok(())
    }

    fn load(&self, key: &ResultKey) -> RepositoryResult<Option<RepositoryEntry>> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let entry = Self::read_entry(&path)?;
        if &entry.key != key {
            warn!(path = %path.display(), "repository entry key does not match its file name");
            return Ok(None);
        }
        Ok(Some(entry))
    }

    fn load_range(&self, query: &RangeQuery) -> RepositoryResult<Vec<RepositoryEntry>> {
        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&self.root)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let entry = Self::read_entry(&path)?;
            if query.matches(&entry.key) {
                entries.push(query.project(entry));
            }
        }
        sort_entries(&mut entries);
        Ok(entries)
    }
}

/// Replace `path` with `data` so readers see either the old or the new bytes.
pub fn write_bytes_atomic(path: &Path, data: &[u8]) -> RepositoryResult<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .ok_or_else(|| RepositoryError::Invalid("invalid path for atomic write".to_string()))?;
    create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .ok_or_else(|| RepositoryError::Invalid("invalid path for atomic write".to_string()))?;
    let tmp_path = parent.join(format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        Uuid::new_v4()
    ));

    let mut file = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    sync_dir(parent)?;
    Ok(())
}

fn sync_dir(path: &Path) -> io::Result<()> {
    let dir = OpenOptions::new().read(true).open(path)?;
    dir.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_format_versions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repository = FileSystemRepository::new(dir.path()).expect("repository");
        let key = ResultKey::new(1_000).with_tag("env", "test");
        repository
            .save(&RepositoryEntry::new(key.clone()))
            .expect("save");

        let path = repository.path_for(&key).expect("path");
        let text = fs::read_to_string(&path).expect("read");
        fs::write(&path, text.replace("\"format_version\": \"1\"", "\"format_version\": \"9\""))
            .expect("write");

        let err = repository.load(&key).unwrap_err();
        assert!(matches!(err, RepositoryError::UnsupportedFormat { version, .. } if version == "9"));
    }

    #[test]
    fn leaves_no_temp_files_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repository = FileSystemRepository::new(dir.path()).expect("repository");
        for date in 0..3 {
            repository
                .save(&RepositoryEntry::new(ResultKey::new(date)))
                .expect("save");
        }
        let names: Vec<String> = fs::read_dir(dir.path())
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 3);
        assert!(names.iter().all(|name| name.ends_with(".json") && !name.starts_with('.')));
    }
}
