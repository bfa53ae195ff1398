//! Archive storage on S3 (or any `object_store` backend).
//!
//! Archives are stored flat under the location's prefix as
//! `<prefix>/<backup_id>.tar.gz` (or `.tar.zst`).

pub mod location;

use crate::archive::Compression;
use crate::{BackupError, Result};
use chrono::{DateTime, Utc};
use futures_util::{StreamExt, TryStreamExt};
use object_store::buffered::BufWriter;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

pub use self::location::StorageLocation;

/// An archive found in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupObject {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

impl BackupObject {
    /// File name part of the key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

/// Order listings newest first. Ties keep key order so output is stable.
pub fn sort_newest_first(objects: &mut [BackupObject]) {
    objects.sort_by(|a, b| {
        b.last_modified
            .cmp(&a.last_modified)
            .then_with(|| a.key.cmp(&b.key))
    });
}

fn is_archive_key(key: &str) -> bool {
    Compression::from_path(Path::new(key)).is_some()
}

pub struct ObjectStoreGateway {
    inner: Arc<dyn ObjectStore>,
    location: StorageLocation,
}

impl ObjectStoreGateway {
    /// Open the store named by a storage URI.
    ///
    /// S3 credentials and region come from the standard AWS environment.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let location = StorageLocation::parse(uri)?;
        let inner: Arc<dyn ObjectStore> = match &location {
            StorageLocation::S3 { bucket, .. } => Arc::new(
                object_store::aws::AmazonS3Builder::from_env()
                    .with_bucket_name(bucket)
                    .build()?,
            ),
            StorageLocation::Local { root } => {
                std::fs::create_dir_all(root)?;
                Arc::new(object_store::local::LocalFileSystem::new_with_prefix(root)?)
            }
        };
        Ok(Self::new(inner, location))
    }

    pub fn new(inner: Arc<dyn ObjectStore>, location: StorageLocation) -> Self {
        Self { inner, location }
    }

    pub fn location(&self) -> &StorageLocation {
        &self.location
    }

    /// Upload a local archive under its file name. Returns the object key.
    pub async fn upload(&self, local: &Path) -> Result<String> {
        let name = local
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| BackupError::Config(format!("cannot upload {}", local.display())))?;
        let key = self.location.object_key(name);

        let mut file = tokio::fs::File::open(local).await?;
        let mut writer = BufWriter::new(Arc::clone(&self.inner), ObjectPath::from(key.as_str()));
        let bytes = tokio::io::copy(&mut file, &mut writer).await?;
        writer.shutdown().await?;

        info!("Uploaded {} to {}/{} ({} bytes)", local.display(), self.location, name, bytes);
        Ok(key)
    }

    /// Download the object `key` to `dest`. Returns the bytes written.
    pub async fn download(&self, key: &str, dest: &Path) -> Result<u64> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let result = self.inner.get(&ObjectPath::from(key)).await?;
        let mut stream = result.into_stream();
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!("Downloaded {} to {} ({} bytes)", key, dest.display(), written);
        Ok(written)
    }

    /// Every archive under the prefix, newest first.
    pub async fn list(&self) -> Result<Vec<BackupObject>> {
        let prefix = self.location.prefix().map(ObjectPath::from);
        let entries: Vec<_> = self.inner.list(prefix.as_ref()).try_collect().await?;

        let mut objects: Vec<BackupObject> = entries
            .into_iter()
            .filter(|meta| is_archive_key(meta.location.as_ref()))
            .map(|meta| BackupObject {
                key: meta.location.to_string(),
                size: meta.size as u64,
                last_modified: meta.last_modified,
            })
            .collect();
        sort_newest_first(&mut objects);
        Ok(objects)
    }

    /// Newest archive, if any.
    pub async fn latest(&self) -> Result<Option<BackupObject>> {
        Ok(self.list().await?.into_iter().next())
    }

    /// Archive of the backup with this id, in any supported compression.
    pub async fn find(&self, backup_id: &str) -> Result<Option<BackupObject>> {
        Ok(self.select_by_id(self.list().await?, backup_id))
    }

    /// Pick the archive of `backup_id` out of a listing already fetched.
    pub fn select_by_id(&self, objects: Vec<BackupObject>, backup_id: &str) -> Option<BackupObject> {
        let candidates: Vec<String> = [Compression::Gzip, Compression::Zstd]
            .iter()
            .map(|c| self.location.object_key(&format!("{}.{}", backup_id, c.extension())))
            .collect();
        objects
            .into_iter()
            .find(|object| candidates.contains(&object.key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use object_store::memory::InMemory;
    use object_store::PutPayload;
    use tempfile::TempDir;

    fn memory_gateway(uri: &str) -> (ObjectStoreGateway, Arc<InMemory>) {
        let store = Arc::new(InMemory::new());
        let gateway = ObjectStoreGateway::new(store.clone(), StorageLocation::parse(uri).unwrap());
        (gateway, store)
    }

    async fn put(store: &InMemory, key: &str, body: &'static [u8]) {
        store
            .put(&ObjectPath::from(key), PutPayload::from_static(body))
            .await
            .unwrap();
    }

    #[test]
    fn test_sort_newest_first() {
        let at = |h| Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap();
        let object = |key: &str, h| BackupObject {
            key: key.into(),
            size: 1,
            last_modified: at(h),
        };
        let mut objects = vec![object("b1", 1), object("b3", 3), object("b2", 2)];
        sort_newest_first(&mut objects);

        let keys: Vec<_> = objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["b3", "b2", "b1"]);
    }

    #[tokio::test]
    async fn test_list_filters_archives_under_prefix() {
        let (gateway, store) = memory_gateway("s3://bucket/redis");
        put(&store, "redis/b1.tar.gz", b"one").await;
        put(&store, "redis/b2.tar.zst", b"two").await;
        put(&store, "redis/notes.txt", b"x").await;
        put(&store, "other/b3.tar.gz", b"x").await;

        let objects = gateway.list().await.unwrap();
        let mut keys: Vec<_> = objects.iter().map(|o| o.key.clone()).collect();
        keys.sort();
        assert_eq!(keys, vec!["redis/b1.tar.gz", "redis/b2.tar.zst"]);
        assert!(objects.iter().all(|o| o.size == 3));
    }

    #[tokio::test]
    async fn test_empty_store_lists_nothing() {
        let (gateway, _) = memory_gateway("s3://bucket");
        assert!(gateway.list().await.unwrap().is_empty());
        assert!(gateway.latest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upload_download_and_find() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("redis-backup-local-x.tar.gz");
        std::fs::write(&archive, b"archive bytes").unwrap();

        let (gateway, _) = memory_gateway("s3://bucket/prefix");
        let key = gateway.upload(&archive).await.unwrap();
        assert_eq!(key, "prefix/redis-backup-local-x.tar.gz");

        let found = gateway.find("redis-backup-local-x").await.unwrap().unwrap();
        assert_eq!(found.key, key);
        assert_eq!(found.file_name(), "redis-backup-local-x.tar.gz");
        assert!(gateway.find("redis-backup-local-y").await.unwrap().is_none());

        // Selection works on a listing already in hand.
        let listing = gateway.list().await.unwrap();
        let picked = gateway.select_by_id(listing.clone(), "redis-backup-local-x").unwrap();
        assert_eq!(picked.key, key);
        assert!(gateway.select_by_id(listing, "redis-backup-local").is_none());

        let dest = temp.path().join("work/copy.tar.gz");
        let bytes = gateway.download(&key, &dest).await.unwrap();
        assert_eq!(bytes, 13);
        assert_eq!(std::fs::read(&dest).unwrap(), b"archive bytes");
    }

    #[tokio::test]
    async fn test_download_missing_object() {
        let temp = TempDir::new().unwrap();
        let (gateway, _) = memory_gateway("s3://bucket");
        let err = gateway
            .download("nope.tar.gz", &temp.path().join("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::ObjectStore(_)));
    }

    #[tokio::test]
    async fn test_local_directory_store() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("store");
        let uri = format!("file://{}", root.display());
        let gateway = ObjectStoreGateway::from_uri(&uri).unwrap();

        let archive = temp.path().join("b1.tar.zst");
        std::fs::write(&archive, b"zst").unwrap();
        gateway.upload(&archive).await.unwrap();

        assert!(root.join("b1.tar.zst").is_file());
        let latest = gateway.latest().await.unwrap().unwrap();
        assert_eq!(latest.key, "b1.tar.zst");
    }
}
