use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::json;
use tracing::warn;

use crate::{
    encode_key, validate_key, BucketInfo, BucketOptions, ObjectStore, StoreConfig, StoreError,
    UploadOptions,
};

/// Client for the hosted storage API (`/storage/v1`).
pub struct HttpStore {
    base_url: String,
    api_key: String,
    client: Client,
}

impl std::fmt::Debug for HttpStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpStore")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let base_url = config
            .backend_url
            .as_deref()
            .ok_or_else(|| StoreError::Internal("backend url required".into()))?
            .trim_end_matches('/')
            .to_string();
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| StoreError::Internal("storage api key required".into()))?;
        Ok(Self {
            base_url,
            api_key,
            client: Client::new(),
        })
    }

    fn object_url(&self, bucket: &str, key: &str) -> Result<String, StoreError> {
        validate_key(key)?;
        Ok(format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url,
            encode_key(bucket),
            encode_key(key)
        ))
    }

    fn with_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, StoreError> {
        self.with_auth(builder)
            .send()
            .await
            .map_err(|e| StoreError::Internal(format!("storage request: {e}")))
    }
}

async fn parse_error(what: &str, resp: reqwest::Response) -> StoreError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let msg = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            v["message"]
                .as_str()
                .or_else(|| v["error"].as_str())
                .map(String::from)
        })
        .unwrap_or(body);
    match status {
        StatusCode::NOT_FOUND => StoreError::NotFound(format!("{what}: {msg}")),
        StatusCode::CONFLICT => StoreError::Conflict(format!("{what}: {msg}")),
        _ => StoreError::Internal(format!("{what}: {status} {msg}")),
    }
}

#[async_trait]
impl ObjectStore for HttpStore {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        options: &UploadOptions,
    ) -> Result<(), StoreError> {
        let mut builder = self
            .client
            .post(self.object_url(bucket, key)?)
            .header("Content-Type", options.content_type.as_str())
            .header("x-upsert", if options.upsert { "true" } else { "false" })
            .body(data);
        if let Some(cache) = &options.cache_control {
            builder = builder.header("Cache-Control", format!("max-age={cache}"));
        }
        let resp = self.send(builder).await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            let err = parse_error(&format!("upload {bucket}/{key}"), resp).await;
            warn!("{err}");
            Err(err)
        }
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url,
            encode_key(bucket),
            encode_key(key)
        )
    }

    async fn remove(&self, bucket: &str, keys: &[String]) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        for key in keys {
            validate_key(key)?;
        }
        let builder = self
            .client
            .delete(format!("{}/storage/v1/object/{bucket}", self.base_url))
            .json(&json!({ "prefixes": keys }));
        let resp = self.send(builder).await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            let err = parse_error(&format!("remove from {bucket}"), resp).await;
            warn!("{err}");
            Err(err)
        }
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
        let resp = self
            .send(self.client.get(self.object_url(bucket, key)?))
            .await?;
        // The storage API reports missing objects as 400 on some versions.
        if resp.status() == StatusCode::NOT_FOUND || resp.status() == StatusCode::BAD_REQUEST {
            return Err(StoreError::NotFound(format!("{bucket}/{key}")));
        }
        if !resp.status().is_success() {
            return Err(parse_error(&format!("get {bucket}/{key}"), resp).await);
        }
        resp.bytes()
            .await
            .map_err(|e| StoreError::Internal(format!("read body: {e}")))
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let builder = self
            .client
            .post(format!("{}/storage/v1/object/list/{bucket}", self.base_url))
            .json(&json!({ "prefix": prefix, "limit": 1000, "offset": 0 }));
        let resp = self.send(builder).await?;
        if !resp.status().is_success() {
            return Err(parse_error(&format!("list {bucket}"), resp).await);
        }
        let entries: Vec<serde_json::Value> = resp
            .json()
            .await
            .map_err(|e| StoreError::Internal(format!("json decode: {e}")))?;
        let prefix = prefix.trim_end_matches('/');
        let mut keys: Vec<String> = entries
            .iter()
            .filter_map(|e| e["name"].as_str())
            .map(|name| {
                if prefix.is_empty() {
                    name.to_string()
                } else {
                    format!("{prefix}/{name}")
                }
            })
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn list_buckets(&self) -> Result<Vec<BucketInfo>, StoreError> {
        let resp = self
            .send(
                self.client
                    .get(format!("{}/storage/v1/bucket", self.base_url)),
            )
            .await?;
        if !resp.status().is_success() {
            return Err(parse_error("list buckets", resp).await);
        }
        resp.json()
            .await
            .map_err(|e| StoreError::Internal(format!("json decode: {e}")))
    }

    async fn create_bucket(&self, name: &str, options: &BucketOptions) -> Result<(), StoreError> {
        let mut body = json!({ "id": name, "name": name, "public": options.public });
        if let Some(limit) = options.file_size_limit {
            body["file_size_limit"] = json!(limit);
        }
        if !options.allowed_mime_types.is_empty() {
            body["allowed_mime_types"] = json!(options.allowed_mime_types);
        }
        let builder = self
            .client
            .post(format!("{}/storage/v1/bucket", self.base_url))
            .json(&body);
        let resp = self.send(builder).await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(parse_error(&format!("create bucket {name}"), resp).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> StoreConfig {
        StoreConfig {
            backend_url: Some("https://proj.example.co/".into()),
            api_key: Some("service".into()),
            local_data_dir: None,
        }
    }

    #[test]
    fn missing_key_produces_error() {
        let config = StoreConfig {
            api_key: None,
            ..config()
        };
        let err = HttpStore::new(&config).unwrap_err();
        assert!(err.to_string().contains("storage api key required"));
    }

    #[test]
    fn public_url_layout() {
        let store = HttpStore::new(&config()).unwrap();
        assert_eq!(
            store.public_url("task-attachments", "t1/5-a.png"),
            "https://proj.example.co/storage/v1/object/public/task-attachments/t1/5-a.png"
        );
        assert_eq!(
            crate::key_from_public_url(&store.public_url("task-attachments", "t1/5-a.png"), "task-attachments")
                .as_deref(),
            Some("t1/5-a.png")
        );
    }

    #[test]
    fn urls_escape_key_segments() {
        let store = HttpStore::new(&config()).unwrap();
        assert_eq!(
            store.object_url("task-attachments", "t1/5-a b.jpé").unwrap(),
            "https://proj.example.co/storage/v1/object/task-attachments/t1/5-a%20b.jp%C3%A9"
        );
        let url = store.public_url("task-attachments", "t1/5-a b.jpé");
        assert_eq!(
            crate::key_from_public_url(&url, "task-attachments").as_deref(),
            Some("t1/5-a b.jpé")
        );
    }

    #[test]
    fn traversal_keys_never_become_urls() {
        let store = HttpStore::new(&config()).unwrap();
        let err = store
            .object_url("task-attachments", "../other-bucket/1-a.png")
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn remove_refuses_traversal_keys_before_any_request() {
        let store = HttpStore::new(&StoreConfig {
            backend_url: Some("http://127.0.0.1:9".into()),
            ..config()
        })
        .unwrap();
        let err = store
            .remove("task-attachments", &["t1/../../x".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }
}
