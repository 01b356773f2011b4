pub mod attachment;
pub mod column;
pub mod error;
pub mod metrics;
pub mod project;
pub mod task;
pub mod user;

pub use attachment::Attachment;
pub use column::Column;
pub use error::CoreError;
pub use metrics::{DashboardMetrics, DashboardState, StatusBucket, TaskBucket};
pub use project::Project;
pub use task::Task;
pub use user::{Role, User};
