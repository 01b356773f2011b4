use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::{
    encode_key, validate_key, BucketInfo, BucketOptions, ObjectStore, StoreConfig, StoreError,
    UploadOptions,
};

/// Filesystem store: one directory per bucket under `base_dir`.
/// Public URLs are `file://` URLs of the stored files.
pub struct LocalStore {
    base_dir: PathBuf,
}

impl LocalStore {
    pub fn new(config: &StoreConfig) -> Self {
        let base_dir = config
            .local_data_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);
        Self {
            base_dir: absolute(base_dir),
        }
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.base_dir.join(bucket)
    }

    fn resolve(&self, bucket: &str, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.bucket_dir(bucket).join(key))
    }
}

fn default_data_dir() -> PathBuf {
    let base = if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(xdg)
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".local/share")
    } else {
        PathBuf::from(".")
    };
    base.join("taskboard").join("storage")
}

fn absolute(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(&path))
        .unwrap_or(path)
}

async fn require_bucket(dir: &Path, bucket: &str) -> Result<(), StoreError> {
    match tokio::fs::try_exists(dir).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(StoreError::NotFound(format!("bucket {bucket}"))),
        Err(e) => Err(StoreError::Internal(format!("bucket {bucket}: {e}"))),
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        options: &UploadOptions,
    ) -> Result<(), StoreError> {
        let path = self.resolve(bucket, key)?;
        require_bucket(&self.bucket_dir(bucket), bucket).await?;
        if !options.upsert && self.exists(bucket, key).await? {
            return Err(StoreError::Conflict(format!("{bucket}/{key}")));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Internal(format!("mkdir: {e}")))?;
        }
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| StoreError::Internal(format!("write {}: {e}", path.display())))
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        match url::Url::from_directory_path(&self.base_dir) {
            Ok(base) => format!("{base}{}/{}", encode_key(bucket), encode_key(key)),
            Err(()) => format!(
                "file://{}/{}/{}",
                self.base_dir.display(),
                encode_key(bucket),
                encode_key(key)
            ),
        }
    }

    async fn remove(&self, bucket: &str, keys: &[String]) -> Result<(), StoreError> {
        let paths = keys
            .iter()
            .map(|key| self.resolve(bucket, key))
            .collect::<Result<Vec<_>, _>>()?;
        for path in paths {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("remove {}: already absent", path.display());
                }
                Err(e) => {
                    return Err(StoreError::Internal(format!(
                        "delete {}: {e}",
                        path.display()
                    )))
                }
            }
        }
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
        let path = self.resolve(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(format!("{bucket}/{key}")))
            }
            Err(e) => Err(StoreError::Internal(format!(
                "read {}: {e}",
                path.display()
            ))),
        }
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        let path = self.resolve(bucket, key)?;
        match tokio::fs::try_exists(&path).await {
            Ok(exists) => Ok(exists),
            Err(e) => Err(StoreError::Internal(format!(
                "exists {}: {e}",
                path.display()
            ))),
        }
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let root = self.bucket_dir(bucket);
        let prefix = prefix.trim_end_matches('/');
        if !prefix.is_empty() {
            validate_key(prefix)?;
        }
        let dir = root.join(prefix);
        if !dir.exists() {
            return Ok(vec![]);
        }
        let mut keys = Vec::new();
        let mut stack = vec![dir];
        while let Some(current) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(e) => e,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(StoreError::Internal(format!(
                        "list {}: {e}",
                        current.display()
                    )))
                }
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StoreError::Internal(format!("read_dir entry: {e}")))?
            {
                let path = entry.path();
                let ft = entry
                    .file_type()
                    .await
                    .map_err(|e| StoreError::Internal(format!("file_type: {e}")))?;
                if ft.is_dir() {
                    stack.push(path);
                } else if let Ok(rel) = path.strip_prefix(&root) {
                    keys.push(rel.to_string_lossy().to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn list_buckets(&self) -> Result<Vec<BucketInfo>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(StoreError::Internal(format!("list buckets: {e}"))),
        };
        let mut buckets = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Internal(format!("read_dir entry: {e}")))?
        {
            let ft = entry
                .file_type()
                .await
                .map_err(|e| StoreError::Internal(format!("file_type: {e}")))?;
            if ft.is_dir() {
                let name = entry.file_name().to_string_lossy().to_string();
                buckets.push(BucketInfo {
                    id: name.clone(),
                    name,
                    public: true,
                });
            }
        }
        buckets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(buckets)
    }

    async fn create_bucket(&self, name: &str, _options: &BucketOptions) -> Result<(), StoreError> {
        let dir = self.bucket_dir(name);
        if tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(StoreError::Conflict(format!("bucket {name}")));
        }
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::Internal(format!("create bucket {name}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_from_public_url;

    const BUCKET: &str = "task-attachments";

    async fn test_store(dir: &std::path::Path) -> LocalStore {
        let config = StoreConfig {
            local_data_dir: Some(dir.to_string_lossy().to_string()),
            ..Default::default()
        };
        let store = LocalStore::new(&config);
        store
            .create_bucket(BUCKET, &BucketOptions::default())
            .await
            .unwrap();
        store
    }

    fn upsert() -> UploadOptions {
        UploadOptions {
            upsert: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn upload_then_get_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = test_store(tmp.path()).await;

        store
            .upload(BUCKET, "t1/1-a.txt", Bytes::from("hello world"), &upsert())
            .await
            .unwrap();
        let data = store.get(BUCKET, "t1/1-a.txt").await.unwrap();
        assert_eq!(data.as_ref(), b"hello world");
    }

    #[tokio::test]
    async fn upload_into_missing_bucket_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let store = test_store(tmp.path()).await;

        let err = store
            .upload("nope", "k", Bytes::from("x"), &upsert())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn upsert_overwrites_and_plain_upload_conflicts() {
        let tmp = tempfile::tempdir().unwrap();
        let store = test_store(tmp.path()).await;

        store
            .upload(BUCKET, "key", Bytes::from("first"), &upsert())
            .await
            .unwrap();
        store
            .upload(BUCKET, "key", Bytes::from("second"), &upsert())
            .await
            .unwrap();
        assert_eq!(store.get(BUCKET, "key").await.unwrap().as_ref(), b"second");
        assert_eq!(store.list(BUCKET, "").await.unwrap().len(), 1);

        let err = store
            .upload(BUCKET, "key", Bytes::from("third"), &UploadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn remove_deletes_and_ignores_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let store = test_store(tmp.path()).await;

        store
            .upload(BUCKET, "t1/a", Bytes::from("data"), &upsert())
            .await
            .unwrap();
        store
            .remove(BUCKET, &["t1/a".to_string(), "t1/missing".to_string()])
            .await
            .unwrap();
        assert!(!store.exists(BUCKET, "t1/a").await.unwrap());
    }

    #[tokio::test]
    async fn list_returns_keys_with_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let store = test_store(tmp.path()).await;

        for key in ["t1/1-a.png", "t1/2-b.pdf", "t2/3-c.txt"] {
            store
                .upload(BUCKET, key, Bytes::from("x"), &upsert())
                .await
                .unwrap();
        }

        let keys = store.list(BUCKET, "t1").await.unwrap();
        assert_eq!(keys, vec!["t1/1-a.png".to_string(), "t1/2-b.pdf".to_string()]);
        assert!(store.list(BUCKET, "nonexistent").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn public_url_maps_back_to_key() {
        let tmp = tempfile::tempdir().unwrap();
        let store = test_store(tmp.path()).await;

        let url = store.public_url(BUCKET, "t1/9-z.png");
        assert!(url.starts_with("file://"));
        assert_eq!(key_from_public_url(&url, BUCKET).as_deref(), Some("t1/9-z.png"));
    }

    #[tokio::test]
    async fn escaped_public_url_maps_back_to_stored_key() {
        let tmp = tempfile::tempdir().unwrap();
        let store = test_store(tmp.path()).await;
        let key = "t1/9-z file.jpé";

        store
            .upload(BUCKET, key, Bytes::from("x"), &upsert())
            .await
            .unwrap();
        let url = store.public_url(BUCKET, key);
        assert!(url.ends_with("/t1/9-z%20file.jp%C3%A9"));

        let derived = key_from_public_url(&url, BUCKET).unwrap();
        assert_eq!(derived, key);
        store.remove(BUCKET, &[derived]).await.unwrap();
        assert!(store.list(BUCKET, "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn keys_outside_the_bucket_are_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let store = test_store(tmp.path()).await;
        store
            .create_bucket("other", &BucketOptions::default())
            .await
            .unwrap();

        let err = store
            .upload(BUCKET, "../other/1-a.txt", Bytes::from("x"), &upsert())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
        assert!(store.list("other", "").await.unwrap().is_empty());

        let err = store
            .remove(BUCKET, &["../other/1-a.txt".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
        assert!(store.list(BUCKET, "..").await.is_err());
    }

    #[tokio::test]
    async fn buckets_are_listed_and_duplicates_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = test_store(tmp.path()).await;

        store
            .create_bucket("avatars", &BucketOptions::default())
            .await
            .unwrap();
        let names: Vec<String> = store
            .list_buckets()
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, vec!["avatars".to_string(), BUCKET.to_string()]);

        let err = store
            .create_bucket(BUCKET, &BucketOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }
}
