use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use taskboard_core::column::{sort_for_display, CreateColumn, UpdateColumn};
use taskboard_core::project::{CreateProject, UpdateProject};
use taskboard_core::task::{CreateTask, UpdateTask};
use taskboard_core::{Column, Project, Task};
use taskboard_gateway::{decode_row, AccessToken, Collection, DataGateway, Filter, Query};

use crate::notify::{Invitation, NotificationOutcome, Notifier};
use crate::BoardError;

const TASK_COLUMNS: &[&str] = &[
    "id",
    "title",
    "description",
    "column_id",
    "position",
    "is_completed",
    "completed_at",
    "attachments",
];

/// Typed project, column, and task operations over the gateway.
pub struct BoardService {
    gateway: Arc<dyn DataGateway>,
    notifier: Arc<dyn Notifier>,
}

fn to_row<T: Serialize>(value: &T) -> Result<Value, BoardError> {
    serde_json::to_value(value).map_err(|e| BoardError::Decode(e.to_string()))
}

fn by_id(id: &str) -> [Filter; 1] {
    [Filter::eq("id", id)]
}

impl BoardService {
    pub fn new(gateway: Arc<dyn DataGateway>, notifier: Arc<dyn Notifier>) -> Self {
        Self { gateway, notifier }
    }

    async fn fetch_one<T: serde::de::DeserializeOwned>(
        &self,
        token: &AccessToken,
        query: Query,
        what: &str,
    ) -> Result<T, BoardError> {
        let rows = self.gateway.query(token, &query.limit(1)).await?.into_rows()?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| BoardError::NotFound(what.to_string()))?;
        Ok(decode_row(row)?)
    }

    async fn update_one<T: serde::de::DeserializeOwned>(
        &self,
        token: &AccessToken,
        collection: Collection,
        id: &str,
        patch: Value,
    ) -> Result<T, BoardError> {
        let rows = self
            .gateway
            .update(token, collection, &by_id(id), &patch)
            .await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| BoardError::NotFound(format!("{} {id}", collection)))?;
        Ok(decode_row(row)?)
    }

    // -- Projects --

    pub async fn list_projects(&self, token: &AccessToken) -> Result<Vec<Project>, BoardError> {
        let query = Query::rows(Collection::Projects).order_by("created_at", true);
        Ok(self.gateway.query(token, &query).await?.decode()?)
    }

    pub async fn get_project(&self, token: &AccessToken, id: &str) -> Result<Project, BoardError> {
        let query = Query::rows(Collection::Projects).filter(Filter::eq("id", id));
        self.fetch_one(token, query, &format!("project {id}")).await
    }

    pub async fn create_project(
        &self,
        token: &AccessToken,
        input: &CreateProject,
    ) -> Result<Project, BoardError> {
        if input.title.trim().is_empty() {
            return Err(BoardError::Validation("project title is required".into()));
        }
        let row = self
            .gateway
            .insert(token, Collection::Projects, &to_row(input)?)
            .await?;
        let project: Project = decode_row(row)?;
        info!("created project {}", project.id);
        Ok(project)
    }

    pub async fn update_project(
        &self,
        token: &AccessToken,
        id: &str,
        update: &UpdateProject,
    ) -> Result<Project, BoardError> {
        if update.is_empty() {
            return self.get_project(token, id).await;
        }
        self.update_one(token, Collection::Projects, id, to_row(update)?)
            .await
    }

    pub async fn toggle_favorite(&self, token: &AccessToken, id: &str) -> Result<Project, BoardError> {
        let project = self.get_project(token, id).await?;
        let update = UpdateProject {
            is_favorite: Some(!project.is_favorite),
            ..Default::default()
        };
        self.update_project(token, id, &update).await
    }

    /// Columns and tasks go with the project through the backend's cascade.
    pub async fn delete_project(&self, token: &AccessToken, id: &str) -> Result<(), BoardError> {
        self.gateway
            .delete(token, Collection::Projects, &by_id(id))
            .await?;
        info!("deleted project {id}");
        Ok(())
    }

    pub async fn invite_to_project(
        &self,
        token: &AccessToken,
        project_id: &str,
        email: &str,
        invited_by: Option<String>,
        message: Option<String>,
    ) -> Result<NotificationOutcome, BoardError> {
        if !email.contains('@') {
            return Err(BoardError::Validation(format!("invalid email address: {email}")));
        }
        let project = self.get_project(token, project_id).await?;
        let invitation = Invitation {
            email: email.to_string(),
            project_id: project.id,
            project_name: project.title,
            invited_by,
            message,
        };
        Ok(self
            .notifier
            .send_project_invitation(token, &invitation)
            .await)
    }

    // -- Columns --

    /// Columns in display order.
    pub async fn list_columns(
        &self,
        token: &AccessToken,
        project_id: &str,
    ) -> Result<Vec<Column>, BoardError> {
        let query = Query::rows(Collection::Columns)
            .filter(Filter::eq("project_id", project_id))
            .order_by("order", true);
        let mut columns: Vec<Column> = self.gateway.query(token, &query).await?.decode()?;
        sort_for_display(&mut columns);
        Ok(columns)
    }

    pub async fn create_column(
        &self,
        token: &AccessToken,
        input: &CreateColumn,
    ) -> Result<Column, BoardError> {
        if input.title.trim().is_empty() {
            return Err(BoardError::Validation("column title is required".into()));
        }
        let row = self
            .gateway
            .insert(token, Collection::Columns, &to_row(input)?)
            .await?;
        Ok(decode_row(row)?)
    }

    pub async fn update_column(
        &self,
        token: &AccessToken,
        id: &str,
        update: &UpdateColumn,
    ) -> Result<Column, BoardError> {
        if update.is_empty() {
            return Err(BoardError::Validation("nothing to update".into()));
        }
        self.update_one(token, Collection::Columns, id, to_row(update)?)
            .await
    }

    pub async fn delete_column(&self, token: &AccessToken, id: &str) -> Result<(), BoardError> {
        self.gateway
            .delete(token, Collection::Columns, &by_id(id))
            .await?;
        Ok(())
    }

    // -- Tasks --

    pub async fn list_tasks(
        &self,
        token: &AccessToken,
        column_id: &str,
    ) -> Result<Vec<Task>, BoardError> {
        let query = Query::rows(Collection::Tasks)
            .select(TASK_COLUMNS)
            .filter(Filter::eq("column_id", column_id))
            .order_by("position", true);
        Ok(self.gateway.query(token, &query).await?.decode()?)
    }

    pub async fn get_task(&self, token: &AccessToken, id: &str) -> Result<Task, BoardError> {
        let query = Query::rows(Collection::Tasks)
            .select(TASK_COLUMNS)
            .filter(Filter::eq("id", id));
        self.fetch_one(token, query, &format!("task {id}")).await
    }

    pub async fn create_task(&self, token: &AccessToken, input: &CreateTask) -> Result<Task, BoardError> {
        if input.title.trim().is_empty() {
            return Err(BoardError::Validation("task title is required".into()));
        }
        let mut row = to_row(input)?;
        if let Some(fields) = row.as_object_mut() {
            fields.insert("is_completed".into(), json!(false));
            fields.insert("attachments".into(), json!([]));
        }
        let row = self.gateway.insert(token, Collection::Tasks, &row).await?;
        let task: Task = decode_row(row)?;
        info!("created task {} in column {}", task.id, task.column_id);
        Ok(task)
    }

    pub async fn update_task(
        &self,
        token: &AccessToken,
        id: &str,
        update: &UpdateTask,
    ) -> Result<Task, BoardError> {
        if update.is_empty() {
            return self.get_task(token, id).await;
        }
        self.update_one(token, Collection::Tasks, id, to_row(update)?)
            .await
    }

    /// Mark a task done or reopen it; `completed_at` follows the flag.
    pub async fn set_completion(
        &self,
        token: &AccessToken,
        id: &str,
        completed: bool,
    ) -> Result<Task, BoardError> {
        self.update_task(token, id, &UpdateTask::completion(completed, Utc::now()))
            .await
    }

    pub async fn delete_task(&self, token: &AccessToken, id: &str) -> Result<(), BoardError> {
        self.gateway
            .delete(token, Collection::Tasks, &by_id(id))
            .await?;
        Ok(())
    }
}
