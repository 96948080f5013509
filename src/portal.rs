//! Derived project progress for the client portal.

use serde::Serialize;

use crate::models::Task;

pub const TASK_STATUSES: &[&str] = &["todo", "in_progress", "blocked", "done"];
pub const PHASE_COMPLETE: &str = "Complete";
pub const PHASE_PLANNING: &str = "Planning";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub todo: i64,
    pub in_progress: i64,
    pub blocked: i64,
    pub done: i64,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub phase: String,
    pub completion_percent: i64,
    pub tasks: TaskCounts,
}

/// Phase is the label of the first unfinished task by `sort_order`.
pub fn progress(tasks: &[Task]) -> Progress {
    let mut counts = TaskCounts::default();
    for task in tasks {
        match task.status.as_str() {
            "todo" => counts.todo += 1,
            "in_progress" => counts.in_progress += 1,
            "blocked" => counts.blocked += 1,
            "done" => counts.done += 1,
            _ => {}
        }
        counts.total += 1;
    }

    let phase = if tasks.is_empty() {
        PHASE_PLANNING.to_string()
    } else {
        tasks
            .iter()
            .filter(|task| task.status != "done")
            .min_by_key(|task| (task.sort_order, task.created_at))
            .map(|task| task.phase.clone())
            .unwrap_or_else(|| PHASE_COMPLETE.to_string())
    };

    Progress {
        phase,
        completion_percent: completion_percent(counts.done, counts.total),
        tasks: counts,
    }
}

pub fn completion_percent(done: i64, total: i64) -> i64 {
    if total <= 0 {
        return 0;
    }
    ((done as f64 * 100.0) / total as f64).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn task(phase: &str, status: &str, sort_order: i32) -> Task {
        let now = Utc::now().naive_utc() + Duration::seconds(sort_order as i64);
        Task {
            id: Uuid::new_v4(),
            project_id: Uuid::nil(),
            title: format!("{phase} task"),
            phase: phase.to_string(),
            status: status.to_string(),
            sort_order,
            due_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn no_tasks_is_planning() {
        let p = progress(&[]);
        assert_eq!(p.phase, PHASE_PLANNING);
        assert_eq!(p.completion_percent, 0);
        assert_eq!(p.tasks.total, 0);
    }

    #[test]
    fn phase_is_first_unfinished_task_by_order() {
        let tasks = vec![
            task("Launch", "todo", 30),
            task("Discovery", "done", 10),
            task("Design", "in_progress", 20),
        ];
        let p = progress(&tasks);
        assert_eq!(p.phase, "Design");
        assert_eq!(p.completion_percent, 33);
        assert_eq!(p.tasks.in_progress, 1);
        assert_eq!(p.tasks.todo, 1);
    }

    #[test]
    fn all_done_is_complete() {
        let tasks = vec![task("Build", "done", 1), task("Launch", "done", 2)];
        let p = progress(&tasks);
        assert_eq!(p.phase, PHASE_COMPLETE);
        assert_eq!(p.completion_percent, 100);
    }

    #[test]
    fn percent_rounds_half_up() {
        assert_eq!(completion_percent(1, 8), 13);
        assert_eq!(completion_percent(2, 3), 67);
        assert_eq!(completion_percent(0, 5), 0);
    }
}
