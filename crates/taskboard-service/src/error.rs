use taskboard_core::CoreError;
use taskboard_gateway::GatewayError;
use taskboard_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("backend error: {0}")]
    Gateway(GatewayError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Metadata still lists an attachment whose object was deleted.
    #[error("task {task_id} still references deleted attachment {attachment_id}: {reason}")]
    DanglingReference {
        task_id: String,
        attachment_id: String,
        reason: String,
    },

    /// A stored object is no longer referenced by any task.
    #[error("object {key} is orphaned: {reason}")]
    OrphanedObject { key: String, reason: String },

    #[error("decode error: {0}")]
    Decode(String),
}

impl From<GatewayError> for BoardError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::NotFound(msg) => BoardError::NotFound(msg),
            GatewayError::InvalidInput(msg) => BoardError::Validation(msg),
            GatewayError::Unauthorized(msg) => BoardError::Auth(msg),
            GatewayError::Shape(msg) => BoardError::Decode(msg),
            other => BoardError::Gateway(other),
        }
    }
}

impl From<CoreError> for BoardError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::NotFound(msg) => BoardError::NotFound(msg),
            CoreError::InvalidInput(msg) => BoardError::Validation(msg),
            CoreError::Decode(msg) => BoardError::Decode(msg),
        }
    }
}
