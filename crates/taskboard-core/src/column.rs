use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::TaskBucket;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub id: String,
    pub title: String,
    pub project_id: String,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Column {
    /// Display ordering. `order` is not unique, so ties fall back to
    /// creation time and then id.
    pub fn display_cmp(&self, other: &Column) -> Ordering {
        self.order
            .cmp(&other.order)
            .then_with(|| match (self.created_at, other.created_at) {
                (Some(a), Some(b)) => a.cmp(&b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| self.id.cmp(&other.id))
    }

    pub fn bucket(&self) -> TaskBucket {
        TaskBucket::classify(&self.title)
    }

    pub fn is_completed_column(&self) -> bool {
        self.bucket() == TaskBucket::Completed
    }
}

pub fn sort_for_display(columns: &mut [Column]) {
    columns.sort_by(|a, b| a.display_cmp(b));
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateColumn {
    pub title: String,
    pub project_id: String,
    #[serde(default)]
    pub order: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateColumn {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
}

impl UpdateColumn {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.order.is_none()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn column(id: &str, order: i64, created_secs: Option<i64>) -> Column {
        Column {
            id: id.into(),
            title: id.to_uppercase(),
            project_id: "p1".into(),
            order,
            created_at: created_secs.map(|s| Utc.timestamp_opt(s, 0).unwrap()),
        }
    }

    #[test]
    fn ties_on_order_break_by_created_at_then_id() {
        let mut cols = vec![
            column("c", 1, Some(30)),
            column("b", 1, Some(10)),
            column("a", 0, None),
            column("e", 2, None),
            column("d", 2, None),
        ];
        sort_for_display(&mut cols);
        let ids: Vec<&str> = cols.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn completed_column_match_is_case_insensitive() {
        let mut col = column("x", 0, None);
        col.title = "Completed".into();
        assert!(col.is_completed_column());
        col.title = "INCOMPLETE items".into();
        assert!(col.is_completed_column());
        col.title = "Done".into();
        assert!(!col.is_completed_column());
    }
}
