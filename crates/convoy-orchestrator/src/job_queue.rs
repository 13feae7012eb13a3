use crate::types::Job;

/// Per-agent job queue ordered by relevance, highest first.
///
/// Jobs with equal relevance keep their insertion order.
#[derive(Debug, Default)]
pub struct JobQueue {
    entries: Vec<Entry>,
    next_seq: u64,
}

#[derive(Debug)]
struct Entry {
    relevance: f64,
    seq: u64,
    job: Job,
}

impl JobQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a job and re-sort the queue.
    pub fn push(&mut self, job: Job, relevance: f64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(Entry {
            relevance,
            seq,
            job,
        });
        self.entries.sort_by(|a, b| {
            b.relevance
                .total_cmp(&a.relevance)
                .then(a.seq.cmp(&b.seq))
        });
    }

    /// Remove and return the most relevant job.
    pub fn pop(&mut self) -> Option<Job> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0).job)
        }
    }

    /// Next job to run, without removing it.
    pub fn peek(&self) -> Option<&Job> {
        self.entries.first().map(|e| &e.job)
    }

    /// Queued job count.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No jobs queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queued jobs in execution order.
    pub fn jobs(&self) -> Vec<Job> {
        self.entries.iter().map(|e| e.job.clone()).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_highest_relevance_first() {
        let mut q = JobQueue::new();
        q.push(Job::new("testing", json!({"n": 1})), 0.2);
        q.push(Job::new("testing", json!({"n": 2})), 0.9);
        q.push(Job::new("testing", json!({"n": 3})), 0.5);
        assert_eq!(q.len(), 3);
        assert_eq!(q.pop().unwrap().data["n"], 2);
        assert_eq!(q.pop().unwrap().data["n"], 3);
        assert_eq!(q.pop().unwrap().data["n"], 1);
        assert!(q.pop().is_none());
    }

    #[test]
    fn test_equal_relevance_is_fifo() {
        let mut q = JobQueue::new();
        for n in 0..4 {
            q.push(Job::new("code_review", json!({ "n": n })), 1.0);
        }
        let order: Vec<_> = q.jobs().iter().map(|j| j.data["n"].clone()).collect();
        assert_eq!(order, vec![json!(0), json!(1), json!(2), json!(3)]);
        assert_eq!(q.peek().unwrap().data["n"], 0);
    }
}
