use std::fmt;

use serde::{Deserialize, Serialize};

/// Status bucket a column's tasks are counted under on the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskBucket {
    Backlog,
    InProgress,
    Completed,
}

impl TaskBucket {
    /// Output order of the distribution.
    pub const ALL: &[TaskBucket] = &[
        TaskBucket::Backlog,
        TaskBucket::InProgress,
        TaskBucket::Completed,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            TaskBucket::Backlog => "Backlog",
            TaskBucket::InProgress => "In Progress",
            TaskBucket::Completed => "Completed",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            TaskBucket::Backlog => "#94a3b8",
            TaskBucket::InProgress => "#3b82f6",
            TaskBucket::Completed => "#22c55e",
        }
    }

    /// Heuristic from the column title, applied to every task in the column.
    /// "complete" wins over "backlog"; anything else is in progress.
    pub fn classify(column_title: &str) -> Self {
        let title = column_title.to_lowercase();
        if title.contains("complete") {
            TaskBucket::Completed
        } else if title.contains("backlog") {
            TaskBucket::Backlog
        } else {
            TaskBucket::InProgress
        }
    }
}

impl fmt::Display for TaskBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// `round(count / total * 100)`, or 0 for an empty board.
pub fn percentage(count: u64, total: u64) -> u32 {
    if total == 0 {
        return 0;
    }
    ((count as f64 / total as f64) * 100.0).round() as u32
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusBucket {
    pub bucket: TaskBucket,
    pub name: String,
    pub count: u64,
    pub percentage: u32,
    pub color: String,
}

impl StatusBucket {
    pub fn new(bucket: TaskBucket, count: u64, total: u64) -> Self {
        Self {
            bucket,
            name: bucket.display_name().to_string(),
            count,
            percentage: percentage(count, total),
            color: bucket.color().to_string(),
        }
    }
}

/// One weekday of the completion series. The values are placeholders and
/// are not derived from task timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyCompletion {
    pub day: String,
    pub percentage: u32,
}

pub const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Period-over-period deltas in percent. Fixed placeholder values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthMetrics {
    pub projects: f64,
    pub tasks: f64,
    pub completed: f64,
    pub members: f64,
}

impl Default for GrowthMetrics {
    fn default() -> Self {
        Self {
            projects: 12.0,
            tasks: 8.5,
            completed: 15.2,
            members: 4.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardMetrics {
    pub total_projects: u64,
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub team_members: u64,
    pub distribution: Vec<StatusBucket>,
    pub weekly_completion: Vec<DailyCompletion>,
    pub growth: GrowthMetrics,
}

impl DashboardMetrics {
    pub fn bucket(&self, bucket: TaskBucket) -> Option<&StatusBucket> {
        self.distribution.iter().find(|b| b.bucket == bucket)
    }
}

/// Lifecycle of one dashboard load: `Loading` until the aggregation ends,
/// then `Ready` (possibly with degraded projects) or `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DashboardState {
    Loading,
    Ready { metrics: DashboardMetrics },
    Failed { error: String },
}

impl DashboardState {
    pub fn is_loading(&self) -> bool {
        matches!(self, DashboardState::Loading)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            DashboardState::Failed { error } => Some(error),
            _ => None,
        }
    }
}
