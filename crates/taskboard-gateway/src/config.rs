use std::sync::Arc;

use tracing::warn;

use crate::{AuthBackend, DataGateway, HttpAuth, HttpGateway, MemoryAuth, MemoryGateway};

/// Connection settings for the hosted backend.
#[derive(Debug, Clone, Default)]
pub struct BackendConfig {
    /// Base URL (e.g. "https://project.example.co").
    pub url: Option<String>,
    /// Public key sent as `apikey` on every request.
    pub anon_key: Option<String>,
    /// Privileged key used by admin operations.
    pub service_role_key: Option<String>,
}

impl BackendConfig {
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("TASKBOARD_BACKEND_URL").ok(),
            anon_key: std::env::var("TASKBOARD_ANON_KEY").ok(),
            service_role_key: std::env::var("TASKBOARD_SERVICE_ROLE_KEY").ok(),
        }
    }

    pub fn is_remote(&self) -> bool {
        self.url.is_some() && self.anon_key.is_some()
    }
}

pub struct Backend {
    pub gateway: Arc<dyn DataGateway>,
    pub auth: Arc<dyn AuthBackend>,
}

/// Build gateway and auth clients. Without a remote configuration, fall
/// back to in-memory doubles.
pub fn create_backend(config: &BackendConfig) -> Backend {
    match (&config.url, &config.anon_key) {
        (Some(url), Some(anon_key)) => Backend {
            gateway: Arc::new(HttpGateway::new(url, anon_key)),
            auth: Arc::new(HttpAuth::new(url, anon_key)),
        },
        _ => {
            warn!("no backend configured; using in-memory gateway");
            Backend {
                gateway: Arc::new(MemoryGateway::new()),
                auth: Arc::new(MemoryAuth::new()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_requires_url_and_anon_key() {
        let config = BackendConfig {
            url: Some("https://proj.example.co".into()),
            anon_key: Some("anon".into()),
            service_role_key: None,
        };
        assert!(config.is_remote());
        assert!(!BackendConfig::default().is_remote());
        assert!(!BackendConfig {
            anon_key: None,
            ..config
        }
        .is_remote());
    }
}
