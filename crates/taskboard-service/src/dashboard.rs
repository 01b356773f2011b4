use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{error, info, warn};

use taskboard_core::metrics::{DailyCompletion, GrowthMetrics, WEEKDAYS};
use taskboard_core::{Column, DashboardMetrics, DashboardState, Project, StatusBucket, TaskBucket};
use taskboard_gateway::{AccessToken, Collection, DataGateway, Filter, Query};

use crate::BoardError;

/// Per-bucket task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Tally {
    backlog: u64,
    in_progress: u64,
    completed: u64,
}

impl Tally {
    fn add(&mut self, bucket: TaskBucket, count: u64) {
        match bucket {
            TaskBucket::Backlog => self.backlog += count,
            TaskBucket::InProgress => self.in_progress += count,
            TaskBucket::Completed => self.completed += count,
        }
    }

    fn merge(&mut self, other: Tally) {
        self.backlog += other.backlog;
        self.in_progress += other.in_progress;
        self.completed += other.completed;
    }

    fn get(&self, bucket: TaskBucket) -> u64 {
        match bucket {
            TaskBucket::Backlog => self.backlog,
            TaskBucket::InProgress => self.in_progress,
            TaskBucket::Completed => self.completed,
        }
    }

    fn total(&self) -> u64 {
        self.backlog + self.in_progress + self.completed
    }
}

/// Builds dashboard metrics from projects, columns, and task counts.
///
/// Individual fetch failures degrade the numbers and are logged; only an
/// unexpected response shape fails the whole aggregation.
pub struct DashboardAggregator {
    gateway: Arc<dyn DataGateway>,
    seed: Option<u64>,
}

impl DashboardAggregator {
    pub fn new(gateway: Arc<dyn DataGateway>) -> Self {
        Self {
            gateway,
            seed: None,
        }
    }

    /// Fix the random source behind the weekday series.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Run the aggregation and fold the outcome into a terminal state.
    pub async fn load(&self, token: &AccessToken) -> DashboardState {
        match self.aggregate(token).await {
            Ok(metrics) => DashboardState::Ready { metrics },
            Err(e) => {
                error!("dashboard aggregation failed: {e}");
                DashboardState::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    pub async fn aggregate(&self, token: &AccessToken) -> Result<DashboardMetrics, BoardError> {
        let projects = self.fetch_projects(token).await?;
        let team_members = self.count_members(token).await?;

        let mut tally = Tally::default();
        for project in &projects {
            if let Some(project_tally) = self.tally_project(token, project).await? {
                tally.merge(project_tally);
            }
        }

        let total = tally.total();
        let distribution = TaskBucket::ALL
            .iter()
            .map(|&bucket| StatusBucket::new(bucket, tally.get(bucket), total))
            .collect();

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        // Placeholder series; not derived from completion timestamps.
        let weekly_completion = WEEKDAYS
            .iter()
            .map(|day| DailyCompletion {
                day: day.to_string(),
                percentage: rng.gen_range(15..=75),
            })
            .collect();

        info!(
            "dashboard: {} projects, {total} tasks, {} completed",
            projects.len(),
            tally.completed
        );
        Ok(DashboardMetrics {
            total_projects: projects.len() as u64,
            total_tasks: total,
            completed_tasks: tally.completed,
            team_members,
            distribution,
            weekly_completion,
            growth: GrowthMetrics::default(),
        })
    }

    async fn fetch_projects(&self, token: &AccessToken) -> Result<Vec<Project>, BoardError> {
        let query = Query::rows(Collection::Projects).select(&["id", "title"]);
        match self.gateway.query(token, &query).await {
            Ok(result) => Ok(result.decode()?),
            Err(e) => {
                warn!("projects unavailable, counting none: {e}");
                Ok(Vec::new())
            }
        }
    }

    async fn count_members(&self, token: &AccessToken) -> Result<u64, BoardError> {
        match self
            .gateway
            .query(token, &Query::count(Collection::Profiles))
            .await
        {
            Ok(result) => Ok(result.into_count()?),
            Err(e) => {
                warn!("team members unavailable, counting zero: {e}");
                Ok(0)
            }
        }
    }

    /// Count one project's tasks by bucket. `None` when any of its reads
    /// failed; the project then contributes nothing.
    async fn tally_project(
        &self,
        token: &AccessToken,
        project: &Project,
    ) -> Result<Option<Tally>, BoardError> {
        let query = Query::rows(Collection::Columns)
            .select(&["id", "title", "project_id"])
            .filter(Filter::eq("project_id", project.id.as_str()));
        let columns: Vec<Column> = match self.gateway.query(token, &query).await {
            Ok(result) => result.decode()?,
            Err(e) => {
                warn!("columns for project {} unavailable, skipping: {e}", project.id);
                return Ok(None);
            }
        };

        let mut tally = Tally::default();
        for column in &columns {
            let query = Query::count(Collection::Tasks)
                .filter(Filter::eq("column_id", column.id.as_str()));
            match self.gateway.query(token, &query).await {
                Ok(result) => tally.add(column.bucket(), result.into_count()?),
                Err(e) => {
                    warn!(
                        "tasks for column {} of project {} unavailable, skipping project: {e}",
                        column.id, project.id
                    );
                    return Ok(None);
                }
            }
        }
        Ok(Some(tally))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use taskboard_gateway::{FailPoint, GatewayError, MemoryGateway, QueryResult};

    use super::*;

    fn token() -> AccessToken {
        AccessToken::new("user-token")
    }

    fn seed_tasks(gw: &MemoryGateway, column_id: &str, n: usize) {
        for i in 0..n {
            gw.seed(
                Collection::Tasks,
                json!({"id": format!("{column_id}-t{i}"), "title": "x", "column_id": column_id}),
            );
        }
    }

    /// One project: Backlog 2, Doing 1, Completed 3.
    fn board() -> Arc<MemoryGateway> {
        let gw = Arc::new(MemoryGateway::new());
        gw.seed(Collection::Projects, json!({"id": "p1", "title": "Launch"}));
        for (id, title) in [("c1", "Backlog"), ("c2", "Doing"), ("c3", "Completed")] {
            gw.seed(
                Collection::Columns,
                json!({"id": id, "title": title, "project_id": "p1"}),
            );
        }
        seed_tasks(&gw, "c1", 2);
        seed_tasks(&gw, "c2", 1);
        seed_tasks(&gw, "c3", 3);
        gw.seed(Collection::Profiles, json!({"id": "u1"}));
        gw.seed(Collection::Profiles, json!({"id": "u2"}));
        gw
    }

    fn percentages(metrics: &DashboardMetrics) -> Vec<u32> {
        metrics.distribution.iter().map(|b| b.percentage).collect()
    }

    #[tokio::test]
    async fn three_bucket_scenario() {
        let metrics = DashboardAggregator::new(board())
            .aggregate(&token())
            .await
            .unwrap();

        assert_eq!(metrics.total_projects, 1);
        assert_eq!(metrics.total_tasks, 6);
        assert_eq!(metrics.completed_tasks, 3);
        assert_eq!(metrics.team_members, 2);
        assert_eq!(percentages(&metrics), vec![33, 17, 50]);

        let names: Vec<_> = metrics.distribution.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["Backlog", "In Progress", "Completed"]);
        assert_eq!(metrics.bucket(TaskBucket::Completed).unwrap().color, "#22c55e");
    }

    #[tokio::test]
    async fn percentages_sum_near_hundred() {
        let gw = board();
        gw.seed(
            Collection::Columns,
            json!({"id": "c4", "title": "Review", "project_id": "p1"}),
        );
        seed_tasks(&gw, "c4", 1);

        let metrics = DashboardAggregator::new(gw).aggregate(&token()).await.unwrap();
        let sum: u32 = percentages(&metrics).iter().sum();
        assert!((98..=102).contains(&sum), "sum was {sum}");
    }

    #[tokio::test]
    async fn empty_board_reports_zeroes() {
        let gw = Arc::new(MemoryGateway::new());
        let metrics = DashboardAggregator::new(gw).aggregate(&token()).await.unwrap();
        assert_eq!(metrics.total_tasks, 0);
        assert_eq!(percentages(&metrics), vec![0, 0, 0]);
        assert_eq!(metrics.growth, GrowthMetrics::default());
    }

    #[tokio::test]
    async fn weekday_series_is_bounded_and_seedable() {
        let gw = board();
        let a = DashboardAggregator::new(gw.clone())
            .with_seed(7)
            .aggregate(&token())
            .await
            .unwrap();
        let b = DashboardAggregator::new(gw)
            .with_seed(7)
            .aggregate(&token())
            .await
            .unwrap();

        let days: Vec<_> = a.weekly_completion.iter().map(|d| d.day.as_str()).collect();
        assert_eq!(days, WEEKDAYS.to_vec());
        assert!(a
            .weekly_completion
            .iter()
            .all(|d| (15..=75).contains(&d.percentage)));
        assert_eq!(a.weekly_completion, b.weekly_completion);
    }

    #[tokio::test]
    async fn failed_project_and_member_reads_degrade_to_zero() {
        let gw = board();
        gw.fail(FailPoint::Query(Collection::Projects));
        gw.fail(FailPoint::Query(Collection::Profiles));

        let state = DashboardAggregator::new(gw).load(&token()).await;
        let DashboardState::Ready { metrics } = state else {
            panic!("expected ready state, got {state:?}");
        };
        assert_eq!(metrics.total_projects, 0);
        assert_eq!(metrics.team_members, 0);
        assert_eq!(metrics.total_tasks, 0);
    }

    #[tokio::test]
    async fn failed_task_read_drops_whole_project() {
        let gw = board();
        gw.seed(Collection::Projects, json!({"id": "p2", "title": "Other"}));
        gw.seed(
            Collection::Columns,
            json!({"id": "c9", "title": "Backlog", "project_id": "p2"}),
        );
        seed_tasks(&gw, "c9", 4);
        gw.fail(FailPoint::QueryWhere(Collection::Tasks, "column_id".into(), "c2".into()));

        let metrics = DashboardAggregator::new(gw).aggregate(&token()).await.unwrap();
        assert_eq!(metrics.total_projects, 2);
        assert_eq!(metrics.total_tasks, 4);
        assert_eq!(metrics.bucket(TaskBucket::Backlog).unwrap().count, 4);
        assert_eq!(metrics.completed_tasks, 0);
    }

    #[tokio::test]
    async fn failed_column_read_skips_project() {
        let gw = board();
        gw.fail(FailPoint::QueryWhere(Collection::Columns, "project_id".into(), "p1".into()));

        let state = DashboardAggregator::new(gw).load(&token()).await;
        assert!(state.error().is_none());
        let DashboardState::Ready { metrics } = state else {
            panic!("expected ready state");
        };
        assert_eq!(metrics.total_projects, 1);
        assert_eq!(metrics.total_tasks, 0);
    }

    /// Answers every query with a count, whatever was asked.
    struct CountingOnly;

    #[async_trait]
    impl DataGateway for CountingOnly {
        async fn query(&self, _: &AccessToken, _: &Query) -> Result<QueryResult, GatewayError> {
            Ok(QueryResult::Count(3))
        }
        async fn insert(&self, _: &AccessToken, _: Collection, _: &Value) -> Result<Value, GatewayError> {
            unimplemented!()
        }
        async fn update(
            &self,
            _: &AccessToken,
            _: Collection,
            _: &[Filter],
            _: &Value,
        ) -> Result<Vec<Value>, GatewayError> {
            unimplemented!()
        }
        async fn delete(&self, _: &AccessToken, _: Collection, _: &[Filter]) -> Result<(), GatewayError> {
            unimplemented!()
        }
        async fn rpc(&self, _: &AccessToken, _: &str, _: &Value) -> Result<Value, GatewayError> {
            unimplemented!()
        }
        async fn invoke_function(&self, _: &AccessToken, _: &str, _: &Value) -> Result<Value, GatewayError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn unexpected_shape_fails_the_dashboard() {
        let state = DashboardAggregator::new(Arc::new(CountingOnly))
            .load(&token())
            .await;
        assert!(matches!(state, DashboardState::Failed { .. }));
        assert!(state.error().unwrap().contains("expected rows"));
    }
}
