//! Storage abstraction for input and output folders.
//!
//! Provides a unified interface over S3 and the local filesystem, built on
//! `object_store`. Paths handed to callers are always relative to the
//! configured base prefix, so listings round-trip directly into `get`/`put`.

use bytes::Bytes;
use futures::{future::ready, StreamExt};
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use regex::Regex;
use snafu::prelude::*;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::error::{InvalidUrlSnafu, IoSnafu, ObjectStoreSnafu, StorageError};

/// A reference-counted storage provider.
pub type StorageProviderRef = Arc<StorageProvider>;

/// A listed file: path relative to the provider's base prefix, plus size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
}

// URL patterns for the supported backends
const S3_URL: &str = r"^[sS]3[aA]?://(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$";
const FILE_URI: &str = r"^file://(?P<path>.*)$";
const FILE_PATH: &str = r"^/(?P<path>.*)$";

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
enum Backend {
    S3,
    Local,
}

fn matchers() -> &'static Vec<(Backend, Regex)> {
    static MATCHERS: OnceLock<Vec<(Backend, Regex)>> = OnceLock::new();
    MATCHERS.get_or_init(|| {
        vec![
            (Backend::S3, Regex::new(S3_URL).unwrap()),
            (Backend::Local, Regex::new(FILE_URI).unwrap()),
            (Backend::Local, Regex::new(FILE_PATH).unwrap()),
        ]
    })
}

/// Backend configuration parsed from a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    S3 { bucket: String, key: Option<Path> },
    Local { path: String },
}

impl BackendConfig {
    /// Parse a URL into a backend configuration.
    pub fn parse_url(url: &str) -> Result<Self, StorageError> {
        for (backend, regex) in matchers() {
            if let Some(matches) = regex.captures(url) {
                return match backend {
                    Backend::S3 => {
                        let bucket = matches
                            .name("bucket")
                            .expect("bucket group is not optional")
                            .as_str()
                            .to_string();
                        let key = matches.name("key").map(|m| m.as_str().into());
                        Ok(BackendConfig::S3 { bucket, key })
                    }
                    Backend::Local => {
                        let path = matches
                            .name("path")
                            .expect("path group is not optional")
                            .as_str();
                        let path = if path.starts_with('/') {
                            path.to_string()
                        } else {
                            format!("/{path}")
                        };
                        Ok(BackendConfig::Local { path })
                    }
                };
            }
        }

        InvalidUrlSnafu {
            url: url.to_string(),
        }
        .fail()
    }

    fn key(&self) -> Option<&Path> {
        match self {
            BackendConfig::S3 { key, .. } => key.as_ref(),
            BackendConfig::Local { .. } => None,
        }
    }
}

/// Storage provider that abstracts over S3 and the local filesystem.
#[derive(Clone)]
pub struct StorageProvider {
    config: BackendConfig,
    object_store: Arc<dyn ObjectStore>,
    canonical_url: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

impl StorageProvider {
    /// Create a storage provider for the given URL.
    ///
    /// For local paths the directory is created if it does not exist, so
    /// output folders can be pointed at fresh locations.
    pub fn for_url(url: &str, options: &HashMap<String, String>) -> Result<Self, StorageError> {
        let config = BackendConfig::parse_url(url)?;

        let object_store: Arc<dyn ObjectStore> = match &config {
            BackendConfig::S3 { bucket, .. } => {
                let mut builder = object_store::aws::AmazonS3Builder::from_env()
                    .with_bucket_name(bucket.clone());
                for (k, v) in options {
                    builder = builder.with_config(k.parse().map_err(|source| {
                        StorageError::ObjectStore { source }
                    })?, v.clone());
                }
                Arc::new(builder.build().context(ObjectStoreSnafu)?)
            }
            BackendConfig::Local { path } => {
                std::fs::create_dir_all(path).context(IoSnafu)?;
                Arc::new(
                    LocalFileSystem::new_with_prefix(path).context(ObjectStoreSnafu)?,
                )
            }
        };

        Ok(Self {
            config,
            object_store,
            canonical_url: url.to_string(),
        })
    }

    /// The URL this provider was built from.
    pub fn url(&self) -> &str {
        &self.canonical_url
    }

    /// List all files under the configured prefix, recursively.
    ///
    /// Returned paths are relative to the prefix and sorted for
    /// deterministic enumeration.
    pub async fn list_files(&self) -> Result<Vec<FileEntry>, StorageError> {
        let key_path: Option<Path> = self.config.key().cloned();
        let key_part_count = key_path
            .as_ref()
            .map(|key| key.parts().count())
            .unwrap_or_default();

        let mut entries: Vec<FileEntry> = self
            .object_store
            .list(key_path.as_ref())
            .filter_map(move |meta| {
                let result = match meta {
                    Ok(metadata) => {
                        // Strip the prefix so callers get relative paths that
                        // round-trip into get/put.
                        let relative: Path =
                            metadata.location.parts().skip(key_part_count).collect();
                        Some(Ok(FileEntry {
                            path: relative.to_string(),
                            size: metadata.size as u64,
                        }))
                    }
                    Err(err) => Some(Err(err)),
                };
                ready(result)
            })
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .context(ObjectStoreSnafu)?;

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        debug!("Listed {} files under {}", entries.len(), self.canonical_url);
        Ok(entries)
    }

    /// Get the contents of a file.
    pub async fn get(&self, path: &str) -> Result<Bytes, StorageError> {
        let path = Path::from(path);
        let bytes = self
            .object_store
            .get(&self.qualify_path(&path))
            .await
            .context(ObjectStoreSnafu)?
            .bytes()
            .await
            .context(ObjectStoreSnafu)?;
        Ok(bytes)
    }

    /// Put bytes to a path.
    pub async fn put(&self, path: &str, bytes: Bytes) -> Result<(), StorageError> {
        let path = Path::from(path);
        self.object_store
            .put(&self.qualify_path(&path), PutPayload::from(bytes))
            .await
            .context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Check whether a file exists.
    pub async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let path = Path::from(path);
        match self.object_store.head(&self.qualify_path(&path)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(source) => Err(StorageError::ObjectStore { source }),
        }
    }

    /// Qualify a path with the configured key prefix.
    fn qualify_path<'a>(&self, path: &'a Path) -> Cow<'a, Path> {
        match self.config.key() {
            Some(prefix) => Cow::Owned(prefix.parts().chain(path.parts()).collect()),
            None => Cow::Borrowed(path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_s3_url_parsing() {
        let config = BackendConfig::parse_url("s3://mybucket/path/to/data").unwrap();
        assert_eq!(
            config,
            BackendConfig::S3 {
                bucket: "mybucket".to_string(),
                key: Some(Path::from("path/to/data")),
            }
        );
    }

    #[test]
    fn test_local_url_parsing() {
        let config = BackendConfig::parse_url("/local/path/to/data").unwrap();
        assert_eq!(
            config,
            BackendConfig::Local {
                path: "/local/path/to/data".to_string()
            }
        );
    }

    #[test]
    fn test_file_uri_parsing() {
        let config = BackendConfig::parse_url("file:///local/data").unwrap();
        assert_eq!(
            config,
            BackendConfig::Local {
                path: "/local/data".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_url() {
        assert!(BackendConfig::parse_url("ftp://nope").is_err());
    }

    #[tokio::test]
    async fn test_list_get_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();

        let nested = base.join("partition=a");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("one.parquet"), b"first").unwrap();
        std::fs::write(base.join("two.parquet"), b"second!").unwrap();

        let storage =
            StorageProvider::for_url(base.to_str().unwrap(), &HashMap::new()).unwrap();

        let entries = storage.list_files().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "partition=a/one.parquet");
        assert_eq!(entries[0].size, 5);
        assert_eq!(entries[1].path, "two.parquet");
        assert_eq!(entries[1].size, 7);

        for entry in &entries {
            let content = storage.get(&entry.path).await.unwrap();
            assert_eq!(content.len() as u64, entry.size);
        }
    }

    #[tokio::test]
    async fn test_put_exists() {
        let temp_dir = TempDir::new().unwrap();
        let storage =
            StorageProvider::for_url(temp_dir.path().to_str().unwrap(), &HashMap::new()).unwrap();

        assert!(!storage.exists("out/data.parquet").await.unwrap());
        storage
            .put("out/data.parquet", Bytes::from_static(b"payload"))
            .await
            .unwrap();
        assert!(storage.exists("out/data.parquet").await.unwrap());
        let content = storage.get("out/data.parquet").await.unwrap();
        assert_eq!(content.as_ref(), b"payload");
    }
}
