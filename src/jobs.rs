use crate::{
    comps::{Aggregator, ResolvedComps, SearchQuery},
    models::ApiError,
};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info};
use uuid::Uuid;

/// Background comp resolution. Jobs run to completion whether or not anyone
/// polls for them, so an abandoned job still warms the cache. Completed jobs
/// are forgotten once `retention` has passed since they finished.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    statuses: Arc<Mutex<HashMap<Uuid, JobEntry>>>,
    retention: Duration,
}

struct JobEntry {
    state: JobState,
    updated_at: Instant,
}

impl JobEntry {
    fn new(state: JobState) -> Self {
        Self {
            state,
            updated_at: Instant::now(),
        }
    }

    fn is_expired(&self, now: Instant, retention: Duration) -> bool {
        matches!(self.state, JobState::Completed { .. })
            && now.duration_since(self.updated_at) >= retention
    }
}

struct Job {
    id: Uuid,
    query: SearchQuery,
}

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed { result: ResolvedComps },
}

#[derive(Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    #[serde(flatten)]
    pub state: JobState,
}

impl JobQueue {
    pub fn spawn(aggregator: Arc<Aggregator>, retention: Duration) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(queue_capacity_from_env());
        let statuses = Arc::new(Mutex::new(HashMap::new()));
        let statuses_bg = statuses.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                {
                    let mut guard = statuses_bg.lock().await;
                    guard.insert(job.id, JobEntry::new(JobState::Running));
                }

                let result = aggregator.resolve(&job.query).await;
                info!(
                    target = "flipcheck.jobs",
                    job_id = %job.id,
                    source = result.result.source.as_str(),
                    "comps_job_completed"
                );
                let mut guard = statuses_bg.lock().await;
                guard.insert(job.id, JobEntry::new(JobState::Completed { result }));
            }
        });

        (
            Self {
                tx,
                statuses,
                retention,
            },
            handle,
        )
    }

    pub async fn enqueue_comps(&self, query: SearchQuery) -> Result<Uuid, ApiError> {
        let id = Uuid::new_v4();
        {
            let mut guard = self.statuses.lock().await;
            guard.insert(id, JobEntry::new(JobState::Queued));
        }
        if self.tx.send(Job { id, query }).await.is_err() {
            self.statuses.lock().await.remove(&id);
            return Err(ApiError {
                error: "queue_send_failed".into(),
                detail: Some("worker not available".into()),
            });
        }
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        let guard = self.statuses.lock().await;
        guard
            .get(&id)
            .filter(|entry| !entry.is_expired(Instant::now(), self.retention))
            .map(|entry| JobInfo {
                id: id.to_string(),
                state: entry.state.clone(),
            })
    }

    /// Drops completed jobs older than the retention period.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut guard = self.statuses.lock().await;
        let before = guard.len();
        guard.retain(|_, entry| !entry.is_expired(now, self.retention));
        before - guard.len()
    }

    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = queue.purge_expired().await;
                if removed > 0 {
                    debug!(target = "flipcheck.jobs", removed, "job_sweep");
                }
            }
        })
    }
}

pub fn retention_from_env() -> Duration {
    std::env::var("JOB_RETENTION_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(900))
}

fn queue_capacity_from_env() -> usize {
    std::env::var("QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(64)
}
