use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use taskboard_core::attachment::MAX_ATTACHMENT_BYTES;
use taskboard_core::column::CreateColumn;
use taskboard_core::user::CreateUser;
use taskboard_core::{Column, Project, Role, User};
use taskboard_gateway::{
    decode_row, AccessToken, AuthBackend, Collection, DataGateway, Filter, Query,
};
use taskboard_store::{BucketOptions, ObjectStore};

use crate::attachments::DEFAULT_BUCKET;
use crate::BoardError;

pub const MIGRATION_PROCEDURE: &str = "exec_sql";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleReset {
    /// Profiles moved from admin back to user.
    pub demoted: usize,
    pub promoted: Vec<String>,
    /// Requested admin emails with no profile.
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketSpec {
    pub name: String,
    #[serde(flatten)]
    pub options: BucketOptions,
}

/// Buckets the board needs: public attachments capped at the upload limit.
pub fn default_buckets() -> Vec<BucketSpec> {
    vec![BucketSpec {
        name: DEFAULT_BUCKET.into(),
        options: BucketOptions {
            public: true,
            file_size_limit: Some(MAX_ATTACHMENT_BYTES),
            allowed_mime_types: Vec::new(),
        },
    }]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableStatus {
    pub table: String,
    pub readable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSetupReport {
    pub profiles: TableStatus,
    pub users: TableStatus,
}

impl AuthSetupReport {
    pub fn is_ready(&self) -> bool {
        self.profiles.readable && self.users.readable
    }
}

/// Privileged maintenance operations. Every call uses the service-role token.
pub struct AdminService {
    gateway: Arc<dyn DataGateway>,
    auth: Arc<dyn AuthBackend>,
    store: Arc<dyn ObjectStore>,
    service_token: AccessToken,
}

impl AdminService {
    pub fn new(
        gateway: Arc<dyn DataGateway>,
        auth: Arc<dyn AuthBackend>,
        store: Arc<dyn ObjectStore>,
        service_token: AccessToken,
    ) -> Self {
        Self {
            gateway,
            auth,
            store,
            service_token,
        }
    }

    /// Create a confirmed account and its profile row. A failed profile
    /// insert removes the account again.
    pub async fn create_user(&self, input: &CreateUser) -> Result<User, BoardError> {
        if !input.email.contains('@') {
            return Err(BoardError::Validation(format!("invalid email address: {}", input.email)));
        }
        if input.password.len() < 6 {
            return Err(BoardError::Validation("password must be at least 6 characters".into()));
        }
        let metadata = json!({ "name": input.name, "role": input.role.as_str() });
        let auth_user = self
            .auth
            .admin_create_user(&self.service_token, &input.email, &input.password, &metadata)
            .await?;

        let user = User {
            id: auth_user.id.clone(),
            email: input.email.clone(),
            name: input.name.clone(),
            role: input.role,
        };
        let profile = serde_json::to_value(&user).map_err(|e| BoardError::Decode(e.to_string()))?;
        if let Err(e) = self
            .gateway
            .insert(&self.service_token, Collection::Profiles, &profile)
            .await
        {
            warn!("profile insert for {} failed, removing account: {e}", user.id);
            if let Err(cleanup) = self
                .auth
                .admin_delete_user(&self.service_token, &user.id)
                .await
            {
                warn!("removing account {} failed: {cleanup}", user.id);
            }
            return Err(e.into());
        }
        info!("created user {} ({})", user.id, user.role);
        Ok(user)
    }

    pub async fn delete_user(&self, id: &str) -> Result<(), BoardError> {
        self.auth
            .admin_delete_user(&self.service_token, id)
            .await?;
        self.gateway
            .delete(&self.service_token, Collection::Profiles, &[Filter::eq("id", id)])
            .await?;
        info!("deleted user {id}");
        Ok(())
    }

    /// Demote every admin, then promote the listed emails.
    pub async fn reset_roles(&self, admin_emails: &[String]) -> Result<RoleReset, BoardError> {
        let demoted = self
            .gateway
            .update(
                &self.service_token,
                Collection::Profiles,
                &[Filter::eq("role", Role::Admin.as_str())],
                &json!({ "role": Role::User.as_str() }),
            )
            .await?
            .len();

        let mut promoted = Vec::new();
        let mut missing = Vec::new();
        for email in admin_emails {
            let rows = self
                .gateway
                .update(
                    &self.service_token,
                    Collection::Profiles,
                    &[Filter::eq("email", email.as_str())],
                    &json!({ "role": Role::Admin.as_str() }),
                )
                .await?;
            if rows.is_empty() {
                warn!("no profile for {email}; not promoted");
                missing.push(email.clone());
            } else {
                promoted.push(email.clone());
            }
        }
        info!("role reset: {demoted} demoted, {} promoted", promoted.len());
        Ok(RoleReset {
            demoted,
            promoted,
            missing,
        })
    }

    /// Pass SQL through to the backend's migration procedure.
    pub async fn run_migration(&self, sql: &str) -> Result<Value, BoardError> {
        if sql.trim().is_empty() {
            return Err(BoardError::Validation("migration SQL is empty".into()));
        }
        let result = self
            .gateway
            .rpc(&self.service_token, MIGRATION_PROCEDURE, &json!({ "sql": sql }))
            .await?;
        info!("migration applied ({} bytes)", sql.len());
        Ok(result)
    }

    /// Append a "Completed" column to every project that lacks one.
    /// Returns the columns created.
    pub async fn ensure_completed_columns(&self) -> Result<Vec<Column>, BoardError> {
        let projects: Vec<Project> = self
            .gateway
            .query(
                &self.service_token,
                &Query::rows(Collection::Projects).select(&["id", "title"]),
            )
            .await?
            .decode()?;

        let mut created = Vec::new();
        for project in projects {
            let columns: Vec<Column> = self
                .gateway
                .query(
                    &self.service_token,
                    &Query::rows(Collection::Columns)
                        .filter(Filter::eq("project_id", project.id.as_str())),
                )
                .await?
                .decode()?;
            if columns.iter().any(Column::is_completed_column) {
                continue;
            }
            let next_order = columns.iter().map(|c| c.order).max().map_or(0, |m| m + 1);
            let input = CreateColumn {
                title: "Completed".into(),
                project_id: project.id.clone(),
                order: next_order,
            };
            let row = serde_json::to_value(&input).map_err(|e| BoardError::Decode(e.to_string()))?;
            let row = self
                .gateway
                .insert(&self.service_token, Collection::Columns, &row)
                .await?;
            info!("added Completed column to project {}", project.id);
            created.push(decode_row(row)?);
        }
        Ok(created)
    }

    /// Create the buckets that do not exist yet. Returns their names.
    pub async fn ensure_buckets(&self, specs: &[BucketSpec]) -> Result<Vec<String>, BoardError> {
        let existing = self.store.list_buckets().await?;
        let mut created = Vec::new();
        for spec in specs {
            if existing.iter().any(|b| b.name == spec.name || b.id == spec.name) {
                continue;
            }
            self.store.create_bucket(&spec.name, &spec.options).await?;
            info!("created bucket {}", spec.name);
            created.push(spec.name.clone());
        }
        Ok(created)
    }

    /// Probe the tables the auth flow depends on.
    pub async fn check_auth_setup(&self) -> AuthSetupReport {
        AuthSetupReport {
            profiles: self.table_status(Collection::Profiles).await,
            users: self.table_status(Collection::Users).await,
        }
    }

    async fn table_status(&self, collection: Collection) -> TableStatus {
        let result = self
            .gateway
            .query(&self.service_token, &Query::count(collection))
            .await
            .and_then(|r| r.into_count());
        match result {
            Ok(rows) => TableStatus {
                table: collection.to_string(),
                readable: true,
                rows: Some(rows),
                error: None,
            },
            Err(e) => TableStatus {
                table: collection.to_string(),
                readable: false,
                rows: None,
                error: Some(e.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use taskboard_gateway::{FailPoint, MemoryAuth, MemoryGateway};
    use taskboard_store::{LocalStore, StoreConfig};

    use super::*;

    struct Fixture {
        _dir: tempfile::TempDir,
        gateway: Arc<MemoryGateway>,
        auth: Arc<MemoryAuth>,
        admin: AdminService,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::new(&StoreConfig {
            local_data_dir: Some(dir.path().to_string_lossy().to_string()),
            ..Default::default()
        }));
        let gateway = Arc::new(MemoryGateway::new());
        let auth = Arc::new(MemoryAuth::new());
        let admin = AdminService::new(
            gateway.clone(),
            auth.clone(),
            store,
            AccessToken::new("service"),
        );
        Fixture {
            _dir: dir,
            gateway,
            auth,
            admin,
        }
    }

    fn new_user(email: &str, role: Role) -> CreateUser {
        CreateUser {
            email: email.into(),
            password: "secret1".into(),
            name: "Someone".into(),
            role,
        }
    }

    #[tokio::test]
    async fn create_user_writes_account_and_profile() {
        let fx = fixture();
        let user = fx
            .admin
            .create_user(&new_user("ann@example.com", Role::Admin))
            .await
            .unwrap();

        let profiles = fx.gateway.rows(Collection::Profiles);
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0]["role"], "admin");
        assert!(fx
            .auth
            .sign_in_with_password("ann@example.com", "secret1")
            .await
            .is_ok());

        fx.admin.delete_user(&user.id).await.unwrap();
        assert!(fx.gateway.rows(Collection::Profiles).is_empty());
        assert!(fx
            .auth
            .sign_in_with_password("ann@example.com", "secret1")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn failed_profile_insert_removes_account() {
        let fx = fixture();
        fx.gateway.fail(FailPoint::Insert(Collection::Profiles));

        let err = fx
            .admin
            .create_user(&new_user("ann@example.com", Role::User))
            .await;
        assert!(err.is_err());
        assert!(fx
            .auth
            .sign_in_with_password("ann@example.com", "secret1")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn reset_roles_demotes_then_promotes() {
        let fx = fixture();
        fx.gateway.seed(
            Collection::Profiles,
            json!({"id": "u1", "email": "old@example.com", "role": "admin"}),
        );
        fx.gateway.seed(
            Collection::Profiles,
            json!({"id": "u2", "email": "new@example.com", "role": "user"}),
        );

        let reset = fx
            .admin
            .reset_roles(&["new@example.com".into(), "ghost@example.com".into()])
            .await
            .unwrap();

        assert_eq!(reset.demoted, 1);
        assert_eq!(reset.promoted, vec!["new@example.com"]);
        assert_eq!(reset.missing, vec!["ghost@example.com"]);
        let roles: Vec<_> = fx
            .gateway
            .rows(Collection::Profiles)
            .iter()
            .map(|r| r["role"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(roles, vec!["user", "admin"]);
    }

    #[tokio::test]
    async fn migration_goes_through_procedure() {
        let fx = fixture();
        fx.gateway
            .register_procedure(MIGRATION_PROCEDURE, |_, args| Ok(json!({ "ran": args["sql"] })));

        let out = fx.admin.run_migration("select 1").await.unwrap();
        assert_eq!(out["ran"], "select 1");
        assert!(matches!(
            fx.admin.run_migration("  ").await,
            Err(BoardError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn completed_columns_added_only_where_missing() {
        let fx = fixture();
        fx.gateway
            .seed(Collection::Projects, json!({"id": "p1", "title": "Has one"}));
        fx.gateway
            .seed(Collection::Projects, json!({"id": "p2", "title": "Needs one"}));
        fx.gateway.seed(
            Collection::Columns,
            json!({"id": "c1", "title": "Completed", "project_id": "p1", "order": 0}),
        );
        fx.gateway.seed(
            Collection::Columns,
            json!({"id": "c2", "title": "Backlog", "project_id": "p2", "order": 3}),
        );

        let created = fx.admin.ensure_completed_columns().await.unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].project_id, "p2");
        assert_eq!(created[0].order, 4);

        assert!(fx.admin.ensure_completed_columns().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn buckets_created_once() {
        let fx = fixture();
        let first = fx.admin.ensure_buckets(&default_buckets()).await.unwrap();
        assert_eq!(first, vec![DEFAULT_BUCKET]);
        let second = fx.admin.ensure_buckets(&default_buckets()).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn auth_setup_reports_each_table() {
        let fx = fixture();
        fx.gateway.seed(Collection::Profiles, json!({"id": "u1"}));
        fx.gateway.fail(FailPoint::Query(Collection::Users));

        let report = fx.admin.check_auth_setup().await;
        assert_eq!(report.profiles.rows, Some(1));
        assert!(!report.users.readable);
        assert!(report.users.error.is_some());
        assert!(!report.is_ready());
    }
}
