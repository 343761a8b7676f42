//! Read-only statistics over a loaded todo collection. Pure so the windowing
//! rules can be pinned down in tests with a fixed clock.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::db::models::{Priority, TodoWithCategory};

/// Label under which todos without a category are counted.
const UNCATEGORIZED: &str = "Bez kategorii";

#[derive(Debug, Serialize)]
pub struct PriorityCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[derive(Debug, Serialize)]
pub struct Statistics {
    pub total: usize,
    pub completed: usize,
    pub active: usize,
    pub overdue: usize,
    pub completed_today: usize,
    pub completed_this_week: usize,
    pub completed_this_month: usize,
    pub by_priority: PriorityCounts,
    pub by_category: HashMap<String, usize>,
    pub completion_rate: u32,
}

/// Aggregates the collection as of `now`. The completed-today/week/month
/// windows overlap (each is a superset of the previous), keyed on the last
/// update time; they all start at local midnight counted back in whole days.
pub fn aggregate(todos: &[TodoWithCategory], now: DateTime<Utc>) -> Statistics {
    let midnight = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time")
        .and_utc();
    let week_ago = midnight - Duration::days(7);
    let month_ago = midnight - Duration::days(30);

    let total = todos.len();
    let completed = todos.iter().filter(|t| t.completed).count();
    let active = total - completed;
    let overdue = todos
        .iter()
        .filter(|t| !t.completed && t.due_date.is_some_and(|due| due < now))
        .count();

    let completed_since = |cutoff: DateTime<Utc>| {
        todos
            .iter()
            .filter(|t| t.completed && t.updated_at >= cutoff)
            .count()
    };

    let by_priority = PriorityCounts {
        high: todos.iter().filter(|t| t.priority == Priority::High).count(),
        medium: todos
            .iter()
            .filter(|t| t.priority == Priority::Medium)
            .count(),
        low: todos.iter().filter(|t| t.priority == Priority::Low).count(),
    };

    let mut by_category: HashMap<String, usize> = HashMap::new();
    for todo in todos {
        let name = todo
            .category_name
            .clone()
            .unwrap_or_else(|| UNCATEGORIZED.to_string());
        *by_category.entry(name).or_insert(0) += 1;
    }

    let completion_rate = if total > 0 {
        ((completed as f64 / total as f64) * 100.0).round() as u32
    } else {
        0
    };

    Statistics {
        total,
        completed,
        active,
        overdue,
        completed_today: completed_since(midnight),
        completed_this_week: completed_since(week_ago),
        completed_this_month: completed_since(month_ago),
        by_priority,
        by_category,
        completion_rate,
    }
}
