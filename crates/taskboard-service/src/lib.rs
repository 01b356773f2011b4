pub mod admin;
pub mod attachments;
pub mod board;
pub mod dashboard;
mod error;
pub mod notify;
pub mod session;

pub use admin::AdminService;
pub use attachments::{AttachmentConfig, AttachmentManager, BatchReport, DeleteOrder, NewFile};
pub use board::BoardService;
pub use dashboard::DashboardAggregator;
pub use error::BoardError;
pub use notify::{GatewayNotifier, NotificationOutcome, Notifier};
pub use session::{AuthState, Session, SessionFacade, SignupOutcome};
