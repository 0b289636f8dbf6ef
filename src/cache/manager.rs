//! Disk-backed named cache stores
//!
//! Provides `DiskCacheStorage`, which keeps one directory per cache name and
//! one file per cached request. Each entry file holds a single line of JSON
//! metadata followed by the raw response body.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::debug;

use super::{CacheError, CacheStorage, EntrySummary};
use crate::data::{Request, RequestKey, Response};

/// File extension of committed cache entries
const ENTRY_EXTENSION: &str = "entry";

/// Marker file identifying a directory as a cache store created by this storage
const STORE_MARKER: &str = ".pcd-cache";

/// Counter that keeps concurrent temporary file names distinct
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Metadata line stored at the top of every entry file
#[derive(Debug, Serialize, Deserialize)]
struct EntryHeader {
    /// The request this entry answers
    key: RequestKey,
    /// Response status code
    status: u16,
    /// Response headers
    headers: Vec<(String, String)>,
    /// When the entry was written
    cached_at: DateTime<Utc>,
}

/// Manages named cache stores on disk
///
/// The storage root defaults to an XDG-compliant cache directory
/// (`~/.cache/pcd-cache/` on Linux). Every cache name is a subdirectory of
/// the root carrying a `.pcd-cache` marker file; anything else in the root
/// (plain files, unmarked directories) is never listed or deleted.
#[derive(Debug, Clone)]
pub struct DiskCacheStorage {
    /// Directory holding one subdirectory per cache name
    root: PathBuf,
}

impl DiskCacheStorage {
    /// Creates a new DiskCacheStorage using the XDG-compliant cache directory
    ///
    /// Returns `None` if the cache directory cannot be determined (e.g., no home directory).
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "pcd-cache")?;
        let root = project_dirs.cache_dir().to_path_buf();
        Some(Self { root })
    }

    /// Creates a new DiskCacheStorage rooted at a custom directory
    pub fn with_dir(root: PathBuf) -> Self {
        Self { root }
    }

    /// Returns the storage root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the directory of a cache name, rejecting names that would
    /// escape the storage root
    fn cache_dir(&self, name: &str) -> Result<PathBuf, CacheError> {
        let invalid = name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\'])
            || name.contains('\0');
        if invalid {
            return Err(CacheError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    /// Creates the store directory and its marker file
    async fn ensure_store(dir: &Path) -> Result<(), CacheError> {
        fs::create_dir_all(dir).await?;
        let marker = dir.join(STORE_MARKER);
        if !fs::try_exists(&marker).await? {
            fs::write(&marker, b"").await?;
        }
        Ok(())
    }

    /// Whether `dir` is a store created by this storage
    async fn is_store(dir: &Path) -> Result<bool, CacheError> {
        Ok(fs::try_exists(dir.join(STORE_MARKER)).await?)
    }

    /// Returns the entry file path for a request key inside a cache directory
    fn entry_path(dir: &Path, key: &RequestKey) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.method.as_bytes());
        hasher.update(b" ");
        hasher.update(key.url.as_bytes());
        dir.join(format!("{:x}.{}", hasher.finalize(), ENTRY_EXTENSION))
    }

    /// Splits an entry file into its header and body
    fn decode_entry(bytes: &[u8]) -> Result<(EntryHeader, &[u8]), CacheError> {
        let split = bytes
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| CacheError::Corrupt("missing header line".to_string()))?;
        let header: EntryHeader = serde_json::from_slice(&bytes[..split])?;
        Ok((header, &bytes[split + 1..]))
    }

    /// Reads and decodes an entry file, returning `None` if it doesn't exist
    async fn read_entry(path: &Path) -> Result<Option<(EntryHeader, Vec<u8>)>, CacheError> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let (header, body) = Self::decode_entry(&bytes)?;
        let body = body.to_vec();
        Ok(Some((header, body)))
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        let dir = self.cache_dir(name)?;
        Self::ensure_store(&dir).await
    }

    async fn put(&self, name: &str, request: &Request, response: &Response) -> Result<bool, CacheError> {
        let Some(key) = request.cache_key() else {
            debug!(cache = name, method = %request.method, url = %request.url, "Request is not cacheable");
            return Ok(false);
        };
        let dir = self.cache_dir(name)?;
        Self::ensure_store(&dir).await?;

        let header = EntryHeader {
            key: key.clone(),
            status: response.status,
            headers: response.headers.clone(),
            cached_at: Utc::now(),
        };
        let mut contents = serde_json::to_vec(&header)?;
        contents.push(b'\n');
        contents.extend_from_slice(&response.body);

        // Write aside, then rename over the live entry so readers never see a partial file
        let path = Self::entry_path(&dir, &key);
        let temp = dir.join(format!(
            ".{}.{}.tmp",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&temp, &contents).await?;
        if let Err(e) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }

        debug!(cache = name, key = %key, status = response.status, "Stored response");
        Ok(true)
    }

    async fn match_request(&self, name: &str, request: &Request) -> Result<Option<Response>, CacheError> {
        let Some(key) = request.cache_key() else {
            return Ok(None);
        };
        let dir = self.cache_dir(name)?;
        let Some((header, body)) = Self::read_entry(&Self::entry_path(&dir, &key)).await? else {
            return Ok(None);
        };
        if header.key != key {
            return Ok(None);
        }

        Ok(Some(Response {
            status: header.status,
            headers: header.headers,
            body,
        }))
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() || !Self::is_store(&entry.path()).await? {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let dir = self.cache_dir(name)?;
        if !Self::is_store(&dir).await? {
            return Ok(false);
        }
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(cache = name, "Deleted cache");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn entries(&self, name: &str) -> Result<Vec<EntrySummary>, CacheError> {
        let dir_path = self.cache_dir(name)?;
        let mut dir = match fs::read_dir(&dir_path).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            // An entry removed between listing and reading is simply skipped
            if let Some((header, body)) = Self::read_entry(&path).await? {
                summaries.push(EntrySummary {
                    key: header.key,
                    status: header.status,
                    size: body.len(),
                    cached_at: header.cached_at,
                });
            }
        }
        summaries.sort_by(|a, b| a.key.url.cmp(&b.key.url));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use url::Url;

    fn create_test_storage() -> (DiskCacheStorage, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let storage = DiskCacheStorage::with_dir(temp_dir.path().to_path_buf());
        (storage, temp_dir)
    }

    fn get(path: &str) -> Request {
        Request::get(Url::parse("http://localhost:5000").unwrap().join(path).unwrap())
    }

    #[tokio::test]
    async fn test_open_creates_cache_directory() {
        let (storage, temp_dir) = create_test_storage();

        storage.open("pcd-v1").await.expect("Open should succeed");

        assert!(temp_dir.path().join("pcd-v1").is_dir());
        assert_eq!(storage.keys().await.unwrap(), vec!["pcd-v1".to_string()]);
    }

    #[tokio::test]
    async fn test_match_returns_none_for_missing_entry() {
        let (storage, _temp_dir) = create_test_storage();
        storage.open("pcd-v1").await.unwrap();

        let result = storage.match_request("pcd-v1", &get("/missing.js")).await.unwrap();

        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_match_on_missing_cache_is_none() {
        let (storage, _temp_dir) = create_test_storage();

        let result = storage.match_request("never-opened", &get("/")).await.unwrap();

        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_put_then_match_returns_exact_response() {
        let (storage, _temp_dir) = create_test_storage();
        let body: Vec<u8> = vec![0, 159, 146, 150, b'\n', b'{', 255];
        let response = Response::new(200, body)
            .with_header("content-type", "application/octet-stream")
            .with_header("etag", "\"abc\"");

        let stored = storage.put("pcd-v1", &get("/blob.bin"), &response).await.unwrap();
        let cached = storage.match_request("pcd-v1", &get("/blob.bin")).await.unwrap();

        assert!(stored);
        assert_eq!(cached, Some(response));
    }

    #[tokio::test]
    async fn test_put_overwrites_existing_entry() {
        let (storage, _temp_dir) = create_test_storage();

        storage.put("pcd-v1", &get("/app.js"), &Response::new(200, "first")).await.unwrap();
        storage.put("pcd-v1", &get("/app.js"), &Response::new(200, "second")).await.unwrap();

        let cached = storage.match_request("pcd-v1", &get("/app.js")).await.unwrap().unwrap();
        assert_eq!(cached.body, b"second");
        assert_eq!(storage.entries("pcd-v1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_put_ignores_non_get_requests() {
        let (storage, _temp_dir) = create_test_storage();
        let url = Url::parse("http://localhost:5000/form").unwrap();
        let post = Request::new("POST", url.clone());

        let stored = storage.put("pcd-v1", &post, &Response::new(200, "ok")).await.unwrap();

        assert!(!stored);
        assert!(storage.match_request("pcd-v1", &Request::get(url)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_caches_are_isolated_by_name() {
        let (storage, _temp_dir) = create_test_storage();

        storage.put("pcd-v0", &get("/"), &Response::new(200, "old")).await.unwrap();

        assert!(storage.match_request("pcd-v1", &get("/")).await.unwrap().is_none());
        assert!(storage.match_request("pcd-v0", &get("/")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_removes_whole_cache() {
        let (storage, _temp_dir) = create_test_storage();
        storage.put("pcd-v0", &get("/"), &Response::new(200, "old")).await.unwrap();
        storage.put("pcd-v0", &get("/app.js"), &Response::new(200, "old")).await.unwrap();

        let deleted = storage.delete("pcd-v0").await.unwrap();

        assert!(deleted);
        assert!(storage.keys().await.unwrap().is_empty());
        assert!(storage.match_request("pcd-v0", &get("/")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_missing_cache_returns_false() {
        let (storage, _temp_dir) = create_test_storage();

        assert!(!storage.delete("pcd-v9").await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_ignores_plain_files_in_root() {
        let (storage, temp_dir) = create_test_storage();
        storage.open("pcd-v1").await.unwrap();
        std::fs::write(temp_dir.path().join("registration.json"), "{}").unwrap();

        assert_eq!(storage.keys().await.unwrap(), vec!["pcd-v1".to_string()]);
    }

    #[tokio::test]
    async fn test_keys_and_delete_skip_unmarked_directories() {
        let (storage, temp_dir) = create_test_storage();
        storage.open("pcd-v1").await.unwrap();
        let project = temp_dir.path().join("my-project");
        std::fs::create_dir_all(project.join("src")).unwrap();
        std::fs::write(project.join("src").join("main.rs"), "fn main() {}").unwrap();

        assert_eq!(storage.keys().await.unwrap(), vec!["pcd-v1".to_string()]);
        assert!(!storage.delete("my-project").await.unwrap());
        assert!(project.join("src").join("main.rs").exists());
    }

    #[tokio::test]
    async fn test_put_marks_store_as_owned() {
        let (storage, temp_dir) = create_test_storage();

        storage.put("pcd-v0", &get("/"), &Response::new(200, "old")).await.unwrap();

        assert!(temp_dir.path().join("pcd-v0").join(STORE_MARKER).exists());
        assert_eq!(storage.keys().await.unwrap(), vec!["pcd-v0".to_string()]);
    }

    #[tokio::test]
    async fn test_keys_on_missing_root_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let storage = DiskCacheStorage::with_dir(temp_dir.path().join("not").join("yet"));

        assert!(storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_cache_names_are_rejected() {
        let (storage, _temp_dir) = create_test_storage();

        for name in ["", ".", "..", "../escape", "a/b", "a\\b"] {
            let result = storage.open(name).await;
            assert!(
                matches!(result, Err(CacheError::InvalidName(_))),
                "name {:?} should be rejected",
                name
            );
        }
    }

    #[tokio::test]
    async fn test_entries_lists_stored_requests() {
        let (storage, _temp_dir) = create_test_storage();
        let before = Utc::now();
        storage.put("pcd-v1", &get("/"), &Response::new(200, "<html>")).await.unwrap();
        storage.put("pcd-v1", &get("/styles.css"), &Response::new(200, "body{}")).await.unwrap();

        let entries = storage.entries("pcd-v1").await.unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key.url, "http://localhost:5000/");
        assert_eq!(entries[0].size, 6);
        assert_eq!(entries[1].key.url, "http://localhost:5000/styles.css");
        assert!(entries.iter().all(|e| e.status == 200 && e.cached_at >= before));
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_reported() {
        let (storage, _temp_dir) = create_test_storage();
        let request = get("/broken.css");
        storage.put("pcd-v1", &request, &Response::new(200, "x")).await.unwrap();

        let dir = storage.root().join("pcd-v1");
        let key = request.cache_key().unwrap();
        std::fs::write(DiskCacheStorage::entry_path(&dir, &key), "not json at all").unwrap();

        let result = storage.match_request("pcd-v1", &request).await;
        assert!(matches!(result, Err(CacheError::Corrupt(_))));
    }

    #[test]
    fn test_new_creates_xdg_compliant_path() {
        if let Some(storage) = DiskCacheStorage::new() {
            let path_str = storage.root.to_string_lossy();
            assert!(path_str.contains("pcd-cache"), "Cache path should contain project name");
        }
        // Test passes if new() returns None (e.g., no home directory in CI)
    }
}
