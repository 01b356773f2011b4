pub mod auth;
mod routes;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{info, warn};

use taskboard_gateway::{create_backend, AccessToken, Backend, BackendConfig};
use taskboard_service::{
    AdminService, AttachmentConfig, AttachmentManager, BoardService, DashboardAggregator,
    GatewayNotifier, SessionFacade,
};
use taskboard_store::{create_store, ObjectStore, StoreConfig};

use auth::AdminAuth;
pub use routes::{build_router, AppState, InnerAppState};

/// Service credential used for admin calls against the in-memory backend.
const LOCAL_SERVICE_TOKEN: &str = "local-service-role";

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub backend: BackendConfig,
    pub store: StoreConfig,
    pub admin_key: Option<String>,
    pub attachments: AttachmentConfig,
}

/// Build the application state from configuration.
pub fn build_state(config: &ServerConfig) -> Result<AppState> {
    let backend = create_backend(&config.backend);
    let store = create_store(&config.store)?;
    Ok(assemble_state(backend, store, config))
}

/// Wire services over already-constructed backend clients.
pub fn assemble_state(
    backend: Backend,
    store: Arc<dyn ObjectStore>,
    config: &ServerConfig,
) -> AppState {
    let remote = config.backend.is_remote();
    let notifier = Arc::new(GatewayNotifier::new(backend.gateway.clone()));
    let public_token = AccessToken::new(
        config
            .backend
            .anon_key
            .clone()
            .unwrap_or_else(|| "anon".into()),
    );

    let service_token = if remote {
        config.backend.service_role_key.clone().map(AccessToken::new)
    } else {
        Some(AccessToken::new(LOCAL_SERVICE_TOKEN))
    };
    if service_token.is_none() {
        warn!("no service-role key; admin operations disabled");
    }
    let admin = service_token.map(|token| {
        AdminService::new(
            backend.gateway.clone(),
            backend.auth.clone(),
            store.clone(),
            token,
        )
    });

    let admin_auth = config.admin_key.as_deref().and_then(AdminAuth::from_key);
    if admin_auth.is_none() {
        info!("no admin key configured; admin endpoints refuse all requests");
    }

    Arc::new(InnerAppState {
        board: BoardService::new(backend.gateway.clone(), notifier.clone()),
        attachments: AttachmentManager::new(
            backend.gateway.clone(),
            store,
            config.attachments.clone(),
        ),
        dashboard: DashboardAggregator::new(backend.gateway.clone()),
        sessions: SessionFacade::new(backend.auth.clone(), backend.gateway, notifier, public_token),
        admin,
        admin_auth,
        backend_kind: if remote { "remote" } else { "memory" },
    })
}

pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    let app = routes::build_router(state);
    axum::serve(listener, app).await?;
    Ok(())
}
