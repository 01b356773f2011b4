use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use taskboard_core::User;
use taskboard_gateway::{AccessToken, DataGateway};

pub const INVITATION_FUNCTION: &str = "send-project-invitation";
pub const WELCOME_FUNCTION: &str = "send-welcome-email";

/// Delivery result. Transport failures are folded in rather than raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NotificationOutcome {
    pub fn sent() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    pub email: String,
    pub project_id: String,
    pub project_name: String,
    #[serde(default)]
    pub invited_by: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_project_invitation(
        &self,
        token: &AccessToken,
        invitation: &Invitation,
    ) -> NotificationOutcome;

    async fn send_welcome_email(&self, token: &AccessToken, user: &User) -> NotificationOutcome;
}

/// Sends notifications through the backend's serverless functions.
pub struct GatewayNotifier {
    gateway: Arc<dyn DataGateway>,
}

impl GatewayNotifier {
    pub fn new(gateway: Arc<dyn DataGateway>) -> Self {
        Self { gateway }
    }

    async fn invoke(&self, token: &AccessToken, function: &str, body: Value) -> NotificationOutcome {
        match self.gateway.invoke_function(token, function, &body).await {
            Ok(response) => match response.get("success").and_then(Value::as_bool) {
                Some(false) => {
                    let error = response
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or("function reported failure")
                        .to_string();
                    warn!("{function} failed: {error}");
                    NotificationOutcome::failed(error)
                }
                _ => NotificationOutcome::sent(),
            },
            Err(e) => {
                warn!("{function} failed: {e}");
                NotificationOutcome::failed(e.to_string())
            }
        }
    }
}

#[async_trait]
impl Notifier for GatewayNotifier {
    async fn send_project_invitation(
        &self,
        token: &AccessToken,
        invitation: &Invitation,
    ) -> NotificationOutcome {
        let body = json!({
            "email": invitation.email,
            "projectId": invitation.project_id,
            "projectName": invitation.project_name,
            "invitedBy": invitation.invited_by,
            "message": invitation.message,
        });
        self.invoke(token, INVITATION_FUNCTION, body).await
    }

    async fn send_welcome_email(&self, token: &AccessToken, user: &User) -> NotificationOutcome {
        let body = json!({
            "email": user.email,
            "name": user.name,
            "userId": user.id,
        });
        self.invoke(token, WELCOME_FUNCTION, body).await
    }
}

#[cfg(test)]
mod tests {
    use taskboard_core::Role;
    use taskboard_gateway::{FailPoint, MemoryGateway};

    use super::*;

    fn user() -> User {
        User {
            id: "u1".into(),
            email: "ann@example.com".into(),
            name: "Ann".into(),
            role: Role::User,
        }
    }

    #[tokio::test]
    async fn welcome_email_invokes_function() {
        let gw = Arc::new(MemoryGateway::new());
        let notifier = GatewayNotifier::new(gw.clone());

        let outcome = notifier
            .send_welcome_email(&AccessToken::new("t"), &user())
            .await;

        assert_eq!(outcome, NotificationOutcome::sent());
        let calls = gw.function_calls();
        assert_eq!(calls[0].0, WELCOME_FUNCTION);
        assert_eq!(calls[0].1["email"], "ann@example.com");
    }

    #[tokio::test]
    async fn transport_failure_becomes_outcome() {
        let gw = Arc::new(MemoryGateway::new());
        gw.fail(FailPoint::Function(INVITATION_FUNCTION.into()));
        let notifier = GatewayNotifier::new(gw.clone());

        let outcome = notifier
            .send_project_invitation(
                &AccessToken::new("t"),
                &Invitation {
                    email: "bob@example.com".into(),
                    project_id: "p1".into(),
                    project_name: "Launch".into(),
                    invited_by: Some("Ann".into()),
                    message: None,
                },
            )
            .await;

        assert!(!outcome.success);
        assert!(outcome.error.is_some());
        assert_eq!(gw.function_calls()[0].1["projectName"], "Launch");
    }
}
