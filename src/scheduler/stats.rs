use serde::Serialize;

use super::job::{JobStatus, UpdateJob};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchedulerStatistics {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Mean duration of completed jobs; 0 when none completed.
    pub average_duration_ms: f64,
    /// completed / (completed + failed), in [0, 1]; 0 before any job finished.
    pub success_rate: f64,
}

impl SchedulerStatistics {
    pub fn from_jobs<'a>(jobs: impl IntoIterator<Item = &'a UpdateJob>) -> Self {
        let mut s = Self::default();
        let mut duration_sum = 0u64;
        let mut duration_n = 0u64;

        for job in jobs {
            s.total += 1;
            match job.status {
                JobStatus::Pending => s.pending += 1,
                JobStatus::Running => s.running += 1,
                JobStatus::Completed => {
                    s.completed += 1;
                    if let Some(ms) = job.duration_ms {
                        duration_sum += ms;
                        duration_n += 1;
                    }
                }
                JobStatus::Failed => s.failed += 1,
                JobStatus::Cancelled => s.cancelled += 1,
            }
        }

        if duration_n > 0 {
            s.average_duration_ms = duration_sum as f64 / duration_n as f64;
        }
        let finished = s.completed + s.failed;
        if finished > 0 {
            s.success_rate = s.completed as f64 / finished as f64;
        }
        s
    }
}
