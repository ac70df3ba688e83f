// Queue Domain Model

use serde::{Deserialize, Serialize};

use crate::domain::job::JobId;

/// A running-table entry in a queue snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningEntry {
    pub id: JobId,
    pub started_at: i64, // epoch ms
}

/// A point-in-time view of the queue, used to answer status questions
/// without hitting the backend per lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Waiting job ids in claim order (front first).
    pub waiting: Vec<JobId>,
    pub running: Vec<RunningEntry>,
}

impl QueueSnapshot {
    /// 1-based queue position of a waiting job.
    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.waiting.iter().position(|j| j == id).map(|ix| ix + 1)
    }

    pub fn running_entry(&self, id: &str) -> Option<&RunningEntry> {
        self.running.iter().find(|e| e.id == id)
    }
}

/// Aggregate queue counters for the stats surface.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: u64,
    pub running: u64,
    pub completed: u64,
    /// Age of the oldest waiting job in ms, if any are waiting.
    pub oldest_waiting_ms: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_is_one_based() {
        let snap = QueueSnapshot {
            waiting: vec!["a".into(), "b".into()],
            running: vec![],
        };
        assert_eq!(snap.position_of("a"), Some(1));
        assert_eq!(snap.position_of("b"), Some(2));
        assert_eq!(snap.position_of("c"), None);
    }
}
