use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::versioning::UpdateReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Admission order: `Critical` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Critical,
    High,
    Normal,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateJob {
    pub id: String,
    pub source_id: String,
    pub scheduled_time: DateTime<Utc>,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub priority: JobPriority,
    pub reason: UpdateReason,
    pub last_error: Option<String>,
    /// Wall time of the last finished attempt.
    pub duration_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl UpdateJob {
    pub(crate) fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.scheduled_time <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_sorts_critical_first() {
        let mut v = vec![
            JobPriority::Low,
            JobPriority::Critical,
            JobPriority::Normal,
            JobPriority::High,
        ];
        v.sort();
        assert_eq!(
            v,
            vec![
                JobPriority::Critical,
                JobPriority::High,
                JobPriority::Normal,
                JobPriority::Low
            ]
        );
    }

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }
}
