#[cfg(feature = "http")]
mod http;
mod local;

#[cfg(feature = "http")]
pub use http::HttpStore;
pub use local::LocalStore;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Conflict(String),

    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    #[error("store error: {0}")]
    Internal(String),
}

/// Options for a single upload.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub content_type: String,
    /// Overwrite an existing object under the same key.
    pub upsert: bool,
    pub cache_control: Option<String>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            content_type: "application/octet-stream".into(),
            upsert: false,
            cache_control: Some("3600".into()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BucketOptions {
    pub public: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_mime_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub public: bool,
}

/// Bucketed blob storage with publicly resolvable URLs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write an object. With `upsert` unset, an existing key is a `Conflict`.
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        options: &UploadOptions,
    ) -> Result<(), StoreError>;

    /// Public URL for a key. Does not check that the object exists.
    fn public_url(&self, bucket: &str, key: &str) -> String;

    /// Delete objects. Missing keys are ignored.
    async fn remove(&self, bucket: &str, keys: &[String]) -> Result<(), StoreError>;

    /// Read an object. Returns `StoreError::NotFound` if absent.
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError>;

    /// Check if an object exists.
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        match self.get(bucket, key).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// List object keys in a bucket under a prefix.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError>;

    async fn list_buckets(&self) -> Result<Vec<BucketInfo>, StoreError>;

    async fn create_bucket(&self, name: &str, options: &BucketOptions) -> Result<(), StoreError>;
}

// -- Key helpers --

/// Storage key for a task attachment: `{task_id}/{millis}-{token}.{ext}`.
/// The extension comes from the file name; without one the key has no suffix.
pub fn attachment_key(task_id: &str, millis: i64, token: &str, filename: &str) -> String {
    match file_extension(filename) {
        Some(ext) => format!("{task_id}/{millis}-{token}.{ext}"),
        None => format!("{task_id}/{millis}-{token}"),
    }
}

fn file_extension(filename: &str) -> Option<&str> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.contains('/') {
        return None;
    }
    Some(ext)
}

/// Characters escaped inside one URL path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Refuse keys that would leave their bucket once joined onto a path or URL:
/// empty, `.` or `..` segments, backslashes and control characters.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let bad_char = |c: char| c.is_control() || c == '\\';
    let bad_segment = |s: &str| s.is_empty() || s == "." || s == "..";
    if key.chars().any(bad_char) || key.split('/').any(bad_segment) {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Percent-encode each `/`-separated segment of a key for use in a URL path.
pub fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Recover the storage key from a public URL: everything after the first
/// `/{bucket}/` path segment, percent-decoded.
pub fn key_from_public_url(public_url: &str, bucket: &str) -> Option<String> {
    let parsed = url::Url::parse(public_url).ok()?;
    let marker = format!("/{}/", encode_key(bucket));
    let (_, encoded) = parsed.path().split_once(&marker)?;
    let key = percent_decode_str(encoded).decode_utf8().ok()?;
    if key.is_empty() {
        None
    } else {
        Some(key.into_owned())
    }
}

// -- Configuration --

/// Configuration for the object store backend.
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    /// Base URL of the hosted backend (e.g. "https://project.example.co").
    /// When `None`, use the local filesystem.
    pub backend_url: Option<String>,
    /// Key sent as both `apikey` and bearer token to the storage API.
    pub api_key: Option<String>,
    /// Local filesystem base directory (used when no backend is configured).
    pub local_data_dir: Option<String>,
}

impl StoreConfig {
    /// Build from environment variables.
    /// `TASKBOARD_BACKEND_URL` plus a key selects the hosted store; the
    /// service-role key is preferred over the anon key.
    pub fn from_env() -> Self {
        Self {
            backend_url: std::env::var("TASKBOARD_BACKEND_URL").ok(),
            api_key: std::env::var("TASKBOARD_SERVICE_ROLE_KEY")
                .or_else(|_| std::env::var("TASKBOARD_ANON_KEY"))
                .ok(),
            local_data_dir: std::env::var("TASKBOARD_STORE_DIR").ok(),
        }
    }

    pub fn is_http(&self) -> bool {
        self.backend_url.is_some() && self.api_key.is_some()
    }
}

// -- Factory --

/// Create an `ObjectStore` from configuration.
pub fn create_store(config: &StoreConfig) -> Result<Arc<dyn ObjectStore>, StoreError> {
    if config.is_http() {
        #[cfg(feature = "http")]
        {
            Ok(Arc::new(HttpStore::new(config)?))
        }
        #[cfg(not(feature = "http"))]
        {
            Err(StoreError::Internal(
                "backend URL configured but the 'http' feature is not enabled".into(),
            ))
        }
    } else {
        Ok(Arc::new(LocalStore::new(config)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_key_uses_last_extension() {
        assert_eq!(
            attachment_key("t1", 1700000000000, "abc123", "report.final.pdf"),
            "t1/1700000000000-abc123.pdf"
        );
    }

    #[test]
    fn attachment_key_without_extension_has_no_dot() {
        assert_eq!(attachment_key("t1", 5, "tok", "Makefile"), "t1/5-tok");
        assert_eq!(attachment_key("t1", 5, "tok", ".env"), "t1/5-tok");
        assert_eq!(attachment_key("t1", 5, "tok", "trailing."), "t1/5-tok");
    }

    #[test]
    fn key_from_public_url_takes_path_after_bucket() {
        let url = "https://proj.example.co/storage/v1/object/public/task-attachments/t1/5-tok.png";
        assert_eq!(
            key_from_public_url(url, "task-attachments").as_deref(),
            Some("t1/5-tok.png")
        );
        assert_eq!(
            key_from_public_url("file:///data/task-attachments/t9/1-x.txt", "task-attachments")
                .as_deref(),
            Some("t9/1-x.txt")
        );
    }

    #[test]
    fn key_from_public_url_rejects_foreign_urls() {
        assert!(key_from_public_url("https://cdn.test/other/a.png", "task-attachments").is_none());
        assert!(key_from_public_url("not a url", "task-attachments").is_none());
        assert!(
            key_from_public_url("https://x.test/task-attachments/", "task-attachments").is_none()
        );
    }

    #[test]
    fn key_from_public_url_decodes_escaped_segments() {
        let key = "t1/5-tok.jpé";
        let url = format!(
            "https://proj.example.co/storage/v1/object/public/task-attachments/{}",
            encode_key(key)
        );
        assert_eq!(url.rsplit('/').next(), Some("5-tok.jp%C3%A9"));
        assert_eq!(key_from_public_url(&url, "task-attachments").as_deref(), Some(key));

        // A raw, unescaped URL still maps back to the same key.
        let raw = "https://proj.example.co/storage/v1/object/public/task-attachments/t1/5-a b.png";
        assert_eq!(
            key_from_public_url(raw, "task-attachments").as_deref(),
            Some("t1/5-a b.png")
        );
    }

    #[test]
    fn encode_key_keeps_separators_and_escapes_the_rest() {
        assert_eq!(encode_key("t1/5-a.png"), "t1/5-a.png");
        assert_eq!(encode_key("t 1/5-a?.png"), "t%201/5-a%3F.png");
        assert_eq!(encode_key("t1/50%.txt"), "t1/50%25.txt");
    }

    #[test]
    fn validate_key_rejects_traversal_and_control_characters() {
        assert!(validate_key("t1/5-tok.png").is_ok());
        assert!(validate_key("t1/5-tok.jpé").is_ok());
        for key in ["", "../x/1-a.png", "t1/../../x", "t1/./a", "/t1/a", "t1//a", "t1\\a", "t1/a\nb"] {
            assert!(
                matches!(validate_key(key), Err(StoreError::InvalidKey(_))),
                "{key:?} should be rejected"
            );
        }
    }

    #[test]
    fn store_config_is_http_requires_url_and_key() {
        let config = StoreConfig {
            backend_url: Some("https://proj.example.co".into()),
            api_key: Some("key".into()),
            local_data_dir: None,
        };
        assert!(config.is_http());

        let config = StoreConfig {
            backend_url: Some("https://proj.example.co".into()),
            api_key: None,
            local_data_dir: None,
        };
        assert!(!config.is_http());

        assert!(!StoreConfig::default().is_http());
    }

    #[test]
    fn create_store_local_fallback() {
        let tmp = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            local_data_dir: Some(tmp.path().to_string_lossy().to_string()),
            ..Default::default()
        };
        let store = create_store(&config);
        assert!(store.is_ok(), "local store creation should succeed");
    }

    // These subtests mutate global env vars and must run sequentially
    // in a single test to avoid races with parallel test execution.
    #[test]
    fn store_config_from_env_scenarios() {
        use std::sync::Mutex;
        static ENV_LOCK: Mutex<()> = Mutex::new(());
        let _guard = ENV_LOCK.lock().unwrap();

        let clear_all = || {
            for var in [
                "TASKBOARD_BACKEND_URL",
                "TASKBOARD_SERVICE_ROLE_KEY",
                "TASKBOARD_ANON_KEY",
                "TASKBOARD_STORE_DIR",
            ] {
                std::env::remove_var(var);
            }
        };

        clear_all();
        let config = StoreConfig::from_env();
        assert!(config.backend_url.is_none());
        assert!(config.api_key.is_none());
        assert!(!config.is_http());

        // Anon key is used when no service-role key is set
        clear_all();
        std::env::set_var("TASKBOARD_BACKEND_URL", "https://proj.example.co");
        std::env::set_var("TASKBOARD_ANON_KEY", "anon");
        let config = StoreConfig::from_env();
        assert_eq!(config.api_key.as_deref(), Some("anon"));
        assert!(config.is_http());

        // Service-role key takes precedence
        std::env::set_var("TASKBOARD_SERVICE_ROLE_KEY", "service");
        std::env::set_var("TASKBOARD_STORE_DIR", "/tmp/tb");
        let config = StoreConfig::from_env();
        assert_eq!(config.api_key.as_deref(), Some("service"));
        assert_eq!(config.local_data_dir.as_deref(), Some("/tmp/tb"));

        clear_all();
    }
}
