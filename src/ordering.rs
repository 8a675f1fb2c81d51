use std::cmp::Ordering;

use crate::models::{DownloadTask, TaskStatus};

/// Active work first: downloading, then pending, then everything else.
pub fn priority(status: TaskStatus) -> u8 {
    match status {
        TaskStatus::Downloading => 2,
        TaskStatus::Pending => 1,
        _ => 0,
    }
}

/// Priority descending, then newest `created_at` first.
///
/// Tasks equal on both keys have no defined relative order. Snapshots come out of
/// a hash map, so callers must not rely on ties staying put between refreshes.
pub fn compare(a: &DownloadTask, b: &DownloadTask) -> Ordering {
    priority(b.status)
        .cmp(&priority(a.status))
        .then_with(|| b.created_at.cmp(&a.created_at))
}

pub fn display_order(tasks: &[DownloadTask]) -> Vec<DownloadTask> {
    let mut ordered = tasks.to_vec();
    ordered.sort_by(compare);
    ordered
}
