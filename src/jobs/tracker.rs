//! Job status tracking against the engine's history endpoint.
//!
//! [`JobTracker::check`] is a single non-blocking poll. [`JobTracker::wait`]
//! is a caller-side loop over `check` with a fixed interval and a deadline;
//! callers that own their own scheduling (serverless re-invocation, a UI
//! refresh) just call `check`. Dropping a `wait` future stops polling; the
//! engine keeps running the prompt.
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use uuid::Uuid;

use crate::comfyui::{Engine, HistoryOutcome};
use crate::error::{AppError, AppResult};
use crate::jobs::job::{Job, JobStatus, Observation};
use crate::jobs::store::JobStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub interval: Duration,
    pub deadline: Duration,
}

/// Floor for the poll interval so a zero setting cannot spin on the engine.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

impl PollSchedule {
    pub fn new(interval: Duration, deadline: Duration) -> Self {
        PollSchedule {
            interval: interval.max(MIN_POLL_INTERVAL),
            deadline,
        }
    }
}

pub struct JobTracker {
    engine: Arc<dyn Engine>,
    jobs: Arc<JobStore>,
}

impl JobTracker {
    pub fn new(engine: Arc<dyn Engine>, jobs: Arc<JobStore>) -> Self {
        JobTracker { engine, jobs }
    }

    pub fn jobs(&self) -> &Arc<JobStore> {
        &self.jobs
    }

    /// Poll the engine once and record what it says.
    ///
    /// Terminal jobs are returned as stored without contacting the engine.
    /// Engine errors are returned to the caller and leave the job untouched.
    pub async fn check(&self, id: Uuid) -> AppResult<Job> {
        let job = self.jobs.get(id).await.ok_or_else(|| job_not_found(id))?;
        if job.is_terminal() {
            return Ok(job);
        }
        let observation = match self.engine.history(job.prompt_id()).await? {
            None => Observation::Pending,
            Some(entry) => match entry.outcome() {
                HistoryOutcome::Pending => Observation::Pending,
                HistoryOutcome::Completed(files) => Observation::Completed(files),
                HistoryOutcome::Failed(message) => Observation::Failed(message),
            },
        };
        self.record(id, observation).await
    }

    /// Poll until the job is terminal or `schedule.deadline` elapses, in
    /// which case the job is recorded as `timeout`. Transient engine errors
    /// are logged and retried at the next tick.
    pub async fn wait(&self, id: Uuid, schedule: PollSchedule) -> AppResult<Job> {
        let deadline = Instant::now() + schedule.deadline;
        loop {
            match self.check(id).await {
                Ok(job) if job.is_terminal() => return Ok(job),
                Ok(_) => {}
                Err(e) if e.is_transient() => {
                    tracing::warn!(job_id = %id, "status poll failed, retrying: {}", e);
                }
                Err(e) => return Err(e),
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep(schedule.interval.min(deadline - now)).await;
            if Instant::now() >= deadline {
                break;
            }
        }
        let message = format!(
            "no terminal state within {}s",
            schedule.deadline.as_secs_f64()
        );
        self.record(id, Observation::TimedOut(message)).await
    }

    async fn record(&self, id: Uuid, observation: Observation) -> AppResult<Job> {
        let (job, changed) = self
            .jobs
            .update(id, |job| job.observe(observation))
            .await
            .ok_or_else(|| job_not_found(id))?;
        if changed {
            match job.status() {
                JobStatus::Completed => tracing::info!(
                    job_id = %id,
                    prompt_id = %job.prompt_id(),
                    files = job.output_files().len(),
                    "job completed"
                ),
                JobStatus::Failed | JobStatus::Timeout => tracing::warn!(
                    job_id = %id,
                    prompt_id = %job.prompt_id(),
                    status = job.status().as_str(),
                    "job ended: {}",
                    job.error().unwrap_or("")
                ),
                status => tracing::debug!(job_id = %id, status = status.as_str(), "job status changed"),
            }
        }
        Ok(job)
    }
}

fn job_not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("job '{}' not found", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job::JobOptions;
    use crate::testing::{HistoryStep, ScriptedEngine};
    use serde_json::json;

    async fn setup(script: Vec<HistoryStep>) -> (Arc<ScriptedEngine>, JobTracker, Uuid) {
        let engine = Arc::new(ScriptedEngine::new().with_history(script));
        let jobs = Arc::new(JobStore::new());
        let id = jobs
            .insert(Job::new(Uuid::new_v4(), "abc", Some("basic".into()), JobOptions::default()))
            .await;
        let tracker = JobTracker::new(engine.clone(), jobs);
        (engine, tracker, id)
    }

    fn video_outputs() -> HistoryStep {
        HistoryStep::Entry(json!({
            "outputs": {"94": {"gifs": [{"filename": "final.mp4", "subfolder": "", "type": "output"}]}},
            "status": {"status_str": "success", "completed": true, "messages": []}
        }))
    }

    #[tokio::test]
    async fn polls_through_running_to_completed() {
        let (engine, tracker, id) = setup(vec![HistoryStep::Missing, HistoryStep::Missing, video_outputs()]).await;

        let mut seen = vec![tracker.jobs().get(id).await.unwrap().status()];
        for _ in 0..3 {
            seen.push(tracker.check(id).await.unwrap().status());
        }
        assert_eq!(
            seen,
            vec![JobStatus::Queued, JobStatus::Running, JobStatus::Running, JobStatus::Completed]
        );
        let job = tracker.jobs().get(id).await.unwrap();
        assert_eq!(job.output_files().len(), 1);
        assert_eq!(engine.history_calls(), 3);
    }

    #[tokio::test]
    async fn terminal_checks_are_idempotent_and_skip_the_engine() {
        let (engine, tracker, id) = setup(vec![video_outputs()]).await;
        let first = tracker.check(id).await.unwrap();
        let second = tracker.check(id).await.unwrap();
        let third = tracker.check(id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(second, third);
        assert_eq!(engine.history_calls(), 1);
    }

    #[tokio::test]
    async fn transient_error_is_not_a_failure() {
        let (_engine, tracker, id) = setup(vec![HistoryStep::Unavailable]).await;
        let err = tracker.check(id).await.unwrap_err();
        assert_eq!(err.kind(), "engine_unavailable");
        assert_eq!(tracker.jobs().get(id).await.unwrap().status(), JobStatus::Queued);
    }

    #[tokio::test]
    async fn engine_reported_error_fails_the_job() {
        let (_engine, tracker, id) = setup(vec![HistoryStep::Entry(json!({
            "outputs": {},
            "status": {"status_str": "error", "completed": false, "messages": [
                ["execution_error", {"node_id": "3", "node_type": "KSampler", "exception_message": "boom"}]
            ]}
        }))])
        .await;
        let job = tracker.check(id).await.unwrap();
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.error(), Some("node 3 (KSampler): boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_after_deadline() {
        let (engine, tracker, id) = setup(vec![HistoryStep::Missing]).await;
        let schedule = PollSchedule::new(Duration::from_millis(500), Duration::from_secs(2));

        let started = Instant::now();
        let job = tracker.wait(id, schedule).await.unwrap();

        assert_eq!(job.status(), JobStatus::Timeout);
        assert_eq!(engine.history_calls(), 4);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_millis(2100));
        assert_eq!(tracker.jobs().get(id).await.unwrap().status(), JobStatus::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_rides_out_transient_errors() {
        let (engine, tracker, id) = setup(vec![
            HistoryStep::Unavailable,
            HistoryStep::Missing,
            video_outputs(),
        ])
        .await;
        let schedule = PollSchedule::new(Duration::from_secs(5), Duration::from_secs(60));
        let job = tracker.wait(id, schedule).await.unwrap();
        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(engine.history_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_is_floored() {
        let (engine, tracker, id) = setup(vec![HistoryStep::Missing]).await;
        let schedule = PollSchedule::new(Duration::ZERO, Duration::from_millis(10));
        assert_eq!(schedule.interval, MIN_POLL_INTERVAL);

        let job = tracker.wait(id, schedule).await.unwrap();
        assert_eq!(job.status(), JobStatus::Timeout);
        assert!(engine.history_calls() <= 11, "{} polls", engine.history_calls());
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let (_engine, tracker, _id) = setup(vec![HistoryStep::Missing]).await;
        assert_eq!(tracker.check(Uuid::new_v4()).await.unwrap_err().kind(), "not_found");
    }
}
