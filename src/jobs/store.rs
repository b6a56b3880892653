//! Process-wide job table. Lives as long as the process; nothing is persisted.
use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::jobs::job::Job;

#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl JobStore {
    pub fn new() -> Self {
        JobStore::default()
    }

    pub async fn insert(&self, job: Job) -> Uuid {
        let id = job.id();
        self.jobs.write().await.insert(id, job);
        id
    }

    /// Snapshot of a job.
    pub async fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs.read().await.get(&id).cloned()
    }

    /// All jobs, oldest first.
    pub async fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at());
        jobs
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Forget terminal jobs that finished more than `retention` ago.
    /// Returns how many were dropped.
    pub async fn prune_finished(&self, retention: Duration) -> usize {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return 0;
        };
        let cutoff = Utc::now() - retention;
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| !job.is_terminal() || job.completed_at().map_or(true, |at| at > cutoff));
        before - jobs.len()
    }

    /// Mutate a job in place under the write lock; returns the new snapshot.
    pub(crate) async fn update<F>(&self, id: Uuid, f: F) -> Option<(Job, bool)>
    where
        F: FnOnce(&mut Job) -> bool,
    {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id)?;
        let changed = f(job);
        Some((job.clone(), changed))
    }
}
