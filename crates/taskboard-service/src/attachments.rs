//! Task attachments: object uploads kept consistent with the `attachments`
//! list stored on the task row.
//!
//! Every add uploads first and then rewrites the whole list; a failed write
//! removes the uploaded object again. Deletes remove the object and the
//! list entry in the order chosen by [`DeleteOrder`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use taskboard_core::attachment::{decode_attachment_list, random_token, MAX_ATTACHMENT_BYTES};
use taskboard_core::metrics::percentage;
use taskboard_core::Attachment;
use taskboard_gateway::{AccessToken, Collection, DataGateway, Filter, GatewayError, Query};
use taskboard_store::{attachment_key, key_from_public_url, ObjectStore, UploadOptions};

use crate::BoardError;

pub const DEFAULT_BUCKET: &str = "task-attachments";
pub const DEFAULT_FALLBACK_PROCEDURE: &str = "update_task_attachments";

/// Which side of an attachment is removed first on delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeleteOrder {
    /// Remove the object, then the list entry. A failed list write leaves a
    /// dangling reference.
    #[default]
    StorageFirst,
    /// Remove the list entry, then the object. A failed object removal
    /// leaves an orphaned object.
    MetadataFirst,
}

impl DeleteOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeleteOrder::StorageFirst => "storage-first",
            DeleteOrder::MetadataFirst => "metadata-first",
        }
    }
}

impl fmt::Display for DeleteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeleteOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "storage-first" => Ok(DeleteOrder::StorageFirst),
            "metadata-first" => Ok(DeleteOrder::MetadataFirst),
            other => Err(format!(
                "unknown delete order '{other}' (expected storage-first or metadata-first)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttachmentConfig {
    pub bucket: String,
    pub max_bytes: u64,
    /// Stored procedure taking `(task_id, attachments_json)`, used when the
    /// direct row update fails.
    pub fallback_procedure: String,
    pub delete_order: DeleteOrder,
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            bucket: DEFAULT_BUCKET.into(),
            max_bytes: MAX_ATTACHMENT_BYTES,
            fallback_procedure: DEFAULT_FALLBACK_PROCEDURE.into(),
            delete_order: DeleteOrder::default(),
        }
    }
}

/// Task ids become the first segment of storage keys, so they must be a
/// single plain path segment.
pub fn check_task_id(task_id: &str) -> Result<(), BoardError> {
    let plain = !task_id.is_empty()
        && task_id != "."
        && task_id != ".."
        && !task_id.chars().any(|c| c.is_control() || c == '/' || c == '\\');
    if plain {
        Ok(())
    } else {
        Err(BoardError::Validation(format!("invalid task id {task_id:?}")))
    }
}

/// One file submitted for upload.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub name: String,
    pub content_type: String,
    pub data: Bytes,
}

impl NewFile {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            data: data.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Progress after each processed file. `percent` counts successes only,
/// so it never decreases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    pub processed: usize,
    pub succeeded: usize,
    pub total: usize,
    pub percent: u32,
}

#[derive(Debug)]
pub struct FileOutcome {
    pub file_name: String,
    pub result: Result<Attachment, BoardError>,
}

impl FileOutcome {
    /// Human-readable line naming the file.
    pub fn message(&self) -> String {
        match &self.result {
            Ok(_) => format!("{} uploaded", self.file_name),
            Err(e) => format!("{}: {e}", self.file_name),
        }
    }
}

/// Result of a batch add: one outcome per submitted file, in submission order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<FileOutcome>,
}

impl BatchReport {
    pub fn added(&self) -> Vec<&Attachment> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .collect()
    }

    pub fn failures(&self) -> Vec<&FileOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err()).collect()
    }

    pub fn succeeded(&self) -> usize {
        self.added().len()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn progress(&self) -> u32 {
        percentage(self.succeeded() as u64, self.outcomes.len() as u64)
    }
}

pub struct AttachmentManager {
    gateway: Arc<dyn DataGateway>,
    store: Arc<dyn ObjectStore>,
    config: AttachmentConfig,
}

impl AttachmentManager {
    pub fn new(
        gateway: Arc<dyn DataGateway>,
        store: Arc<dyn ObjectStore>,
        config: AttachmentConfig,
    ) -> Self {
        Self {
            gateway,
            store,
            config,
        }
    }

    pub fn config(&self) -> &AttachmentConfig {
        &self.config
    }

    pub async fn list_attachments(
        &self,
        token: &AccessToken,
        task_id: &str,
    ) -> Result<Vec<Attachment>, BoardError> {
        self.fetch_list(token, task_id).await
    }

    pub async fn add_attachments(
        &self,
        token: &AccessToken,
        task_id: &str,
        files: Vec<NewFile>,
    ) -> BatchReport {
        self.add_attachments_with_progress(token, task_id, files, |_| {})
            .await
    }

    /// Upload files one at a time in submission order. Failures are recorded
    /// per file and never stop the batch.
    pub async fn add_attachments_with_progress<F>(
        &self,
        token: &AccessToken,
        task_id: &str,
        files: Vec<NewFile>,
        mut on_progress: F,
    ) -> BatchReport
    where
        F: FnMut(BatchProgress) + Send,
    {
        let total = files.len();
        let mut report = BatchReport::default();
        let mut succeeded = 0;

        for file in files {
            let result = self.add_one(token, task_id, &file).await;
            if result.is_ok() {
                succeeded += 1;
            }
            report.outcomes.push(FileOutcome {
                file_name: file.name,
                result,
            });
            on_progress(BatchProgress {
                processed: report.outcomes.len(),
                succeeded,
                total,
                percent: percentage(succeeded as u64, total as u64),
            });
        }

        info!(
            "attachments for task {task_id}: {} added, {} failed",
            report.succeeded(),
            report.failed()
        );
        report
    }

    async fn add_one(
        &self,
        token: &AccessToken,
        task_id: &str,
        file: &NewFile,
    ) -> Result<Attachment, BoardError> {
        check_task_id(task_id)?;
        if file.size() > self.config.max_bytes {
            return Err(BoardError::Validation(format!(
                "{} is {} bytes; the limit is {} bytes",
                file.name,
                file.size(),
                self.config.max_bytes
            )));
        }

        let now = Utc::now();
        let key = attachment_key(task_id, now.timestamp_millis(), &random_token(9), &file.name);
        let options = UploadOptions {
            content_type: file.content_type.clone(),
            upsert: true,
            ..Default::default()
        };
        if let Err(e) = self
            .store
            .upload(&self.config.bucket, &key, file.data.clone(), &options)
            .await
        {
            warn!("upload of {} for task {task_id} failed: {e}", file.name);
            return Err(e.into());
        }

        let url = self.store.public_url(&self.config.bucket, &key);
        let attachment = Attachment::new(&file.name, &file.content_type, file.size(), url, now);

        match self.append(token, task_id, &attachment).await {
            Ok(()) => {
                debug!("attached {} to task {task_id} as {key}", file.name);
                Ok(attachment)
            }
            Err(write_err) => Err(self.compensate(&key, task_id, write_err).await),
        }
    }

    /// Remove an object whose metadata write failed.
    async fn compensate(&self, key: &str, task_id: &str, cause: BoardError) -> BoardError {
        warn!("removing {key} after metadata write for task {task_id} failed: {cause}");
        match self
            .store
            .remove(&self.config.bucket, &[key.to_string()])
            .await
        {
            Ok(()) => cause,
            Err(remove_err) => {
                error!("cleanup of {key} failed, object is orphaned: {remove_err}");
                BoardError::OrphanedObject {
                    key: key.to_string(),
                    reason: format!("{cause}; cleanup failed: {remove_err}"),
                }
            }
        }
    }

    async fn append(
        &self,
        token: &AccessToken,
        task_id: &str,
        attachment: &Attachment,
    ) -> Result<(), BoardError> {
        let mut list = self.fetch_list(token, task_id).await?;
        list.push(attachment.clone());
        self.write_list(token, task_id, &list).await
    }

    /// Delete the attachment with `attachment_id` from a task.
    pub async fn delete_attachment_by_id(
        &self,
        token: &AccessToken,
        task_id: &str,
        attachment_id: &str,
    ) -> Result<String, BoardError> {
        let list = self.fetch_list(token, task_id).await?;
        let attachment = list
            .into_iter()
            .find(|a| a.id == attachment_id)
            .ok_or_else(|| {
                BoardError::NotFound(format!("attachment {attachment_id} on task {task_id}"))
            })?;
        self.delete_attachment(token, task_id, &attachment).await
    }

    /// Remove an attachment's object and its list entry. Returns the removed id.
    pub async fn delete_attachment(
        &self,
        token: &AccessToken,
        task_id: &str,
        attachment: &Attachment,
    ) -> Result<String, BoardError> {
        check_task_id(task_id)?;
        let key = key_from_public_url(&attachment.url, &self.config.bucket).ok_or_else(|| {
            BoardError::Validation(format!(
                "cannot derive a storage key from {} (bucket {})",
                attachment.url, self.config.bucket
            ))
        })?;

        match self.config.delete_order {
            DeleteOrder::StorageFirst => {
                if let Err(e) = self
                    .store
                    .remove(&self.config.bucket, &[key.clone()])
                    .await
                {
                    warn!("removing {key} for task {task_id} failed, metadata untouched: {e}");
                    return Err(e.into());
                }
                if let Err(e) = self.remove_entry(token, task_id, &attachment.id).await {
                    error!(
                        "object {key} deleted but task {task_id} still lists attachment {}: {e}",
                        attachment.id
                    );
                    return Err(BoardError::DanglingReference {
                        task_id: task_id.to_string(),
                        attachment_id: attachment.id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
            DeleteOrder::MetadataFirst => {
                self.remove_entry(token, task_id, &attachment.id).await?;
                if let Err(e) = self
                    .store
                    .remove(&self.config.bucket, &[key.clone()])
                    .await
                {
                    error!("attachment {} removed from task {task_id} but {key} remains: {e}", attachment.id);
                    return Err(BoardError::OrphanedObject {
                        key,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!("deleted attachment {} from task {task_id}", attachment.id);
        Ok(attachment.id.clone())
    }

    async fn remove_entry(
        &self,
        token: &AccessToken,
        task_id: &str,
        attachment_id: &str,
    ) -> Result<(), BoardError> {
        let list = self.fetch_list(token, task_id).await?;
        let before = list.len();
        let kept: Vec<Attachment> = list.into_iter().filter(|a| a.id != attachment_id).collect();
        if kept.len() == before {
            debug!("task {task_id} does not list attachment {attachment_id}");
            return Ok(());
        }
        self.write_list(token, task_id, &kept).await
    }

    /// Read the list fresh. The column is named explicitly because a `*`
    /// selection may omit it.
    async fn fetch_list(
        &self,
        token: &AccessToken,
        task_id: &str,
    ) -> Result<Vec<Attachment>, BoardError> {
        let query = Query::rows(Collection::Tasks)
            .select(&["id", "attachments"])
            .filter(Filter::eq("id", task_id))
            .limit(1);
        let rows = self.gateway.query(token, &query).await?.into_rows()?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| BoardError::NotFound(format!("task {task_id}")))?;
        Ok(decode_attachment_list(
            row.get("attachments").unwrap_or(&Value::Null),
        )?)
    }

    /// Write the whole list: direct row update first, stored procedure second.
    async fn write_list(
        &self,
        token: &AccessToken,
        task_id: &str,
        list: &[Attachment],
    ) -> Result<(), BoardError> {
        let value = serde_json::to_value(list)
            .map_err(|e| BoardError::Decode(format!("attachments for task {task_id}: {e}")))?;

        let direct = self
            .gateway
            .update(
                token,
                Collection::Tasks,
                &[Filter::eq("id", task_id)],
                &json!({ "attachments": value }),
            )
            .await;
        let direct_err = match direct {
            Ok(rows) if !rows.is_empty() => return Ok(()),
            Ok(_) => "no rows updated".to_string(),
            Err(e) => e.to_string(),
        };
        warn!(
            "direct attachment update for task {task_id} failed ({direct_err}); calling {}",
            self.config.fallback_procedure
        );

        let text = serde_json::to_string(list)
            .map_err(|e| BoardError::Decode(format!("attachments for task {task_id}: {e}")))?;
        let args = json!({ "task_id": task_id, "attachments_json": text });
        match self
            .gateway
            .rpc(token, &self.config.fallback_procedure, &args)
            .await
        {
            Ok(result) if !updated_nothing(&result) => Ok(()),
            Ok(result) => {
                error!(
                    "fallback {} for task {task_id} updated nothing ({result})",
                    self.config.fallback_procedure
                );
                Err(BoardError::Gateway(GatewayError::Internal(format!(
                    "attachments for task {task_id} not saved: direct update: {direct_err}; {}: no rows updated",
                    self.config.fallback_procedure
                ))))
            }
            Err(e) => {
                error!(
                    "fallback {} for task {task_id} failed: {e}",
                    self.config.fallback_procedure
                );
                Err(BoardError::Gateway(GatewayError::Internal(format!(
                    "attachments for task {task_id} not saved: direct update: {direct_err}; {}: {e}",
                    self.config.fallback_procedure
                ))))
            }
        }
    }
}

/// A procedure result reporting zero affected rows: `0`, `false` or `[]`.
fn updated_nothing(result: &Value) -> bool {
    match result {
        Value::Number(n) => n.as_u64() == Some(0),
        Value::Bool(updated) => !updated,
        Value::Array(rows) => rows.is_empty(),
        _ => false,
    }
}
