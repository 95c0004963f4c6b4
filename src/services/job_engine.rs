use chrono::Utc;
use sea_orm::*;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Semaphore;
use tokio::time::{sleep, Duration};
use uuid::Uuid;

use crate::models::{
    image_job,
    video_job::{self, VideoModel},
    video_job_attempt, JobStatus,
};
use crate::services::providers::{ImageProvider, ProviderError, VideoProvider};
use crate::services::row_status::refresh_row_status;
use crate::services::status_mapping::{reconcile, DEFAULT_FAILURE_MESSAGE};
use crate::utils::config::Config;

/// Why a background procedure ended a job in `failed`.
/// The display text is what gets stored in `error_message`.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The provider itself reported the task as failed
    #[error("{0}")]
    ProviderFailed(String),

    #[error("Timeout waiting for video generation after {0} status checks")]
    Timeout(u32),

    #[error("Model {0} is not implemented yet")]
    UnsupportedModel(VideoModel),

    #[error("Video provider reported success without a video URL")]
    MissingVideoUrl,

    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

/// Synchronous rejections returned to the API layer
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    InvalidState(String),

    #[error("Job {0} is still being processed")]
    Busy(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    pub max_concurrent_jobs: usize,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.video_poll_interval_secs),
            max_poll_attempts: config.video_max_poll_attempts,
            max_concurrent_jobs: config.max_concurrent_jobs,
        }
    }
}

/// Job ids whose background procedure is queued or running in this process
#[derive(Clone, Default, Debug)]
pub struct JobClaims {
    ids: Arc<Mutex<HashSet<Uuid>>>,
}

impl JobClaims {
    /// Claim a job id; `None` if another procedure already owns it
    pub fn claim(&self, id: Uuid) -> Option<ClaimGuard> {
        if self.lock().insert(id) {
            Some(ClaimGuard {
                claims: self.clone(),
                id,
            })
        } else {
            None
        }
    }

    pub fn is_claimed(&self, id: Uuid) -> bool {
        self.lock().contains(&id)
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<Uuid>> {
        // The set stays consistent even if a holder panicked
        self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Releases the claim when dropped
#[derive(Debug)]
pub struct ClaimGuard {
    claims: JobClaims,
    id: Uuid,
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.claims.lock().remove(&self.id);
    }
}

/// Drives image and video jobs from `pending` to a terminal state.
///
/// It is the only writer of a job's status, progress and result fields once
/// the job exists. Every job runs as its own detached task, gated by a
/// semaphore, and owns a claim on its id for as long as it runs.
#[derive(Clone)]
pub struct JobEngine {
    db: DatabaseConnection,
    image_provider: Arc<dyn ImageProvider>,
    kling: Arc<dyn VideoProvider>,
    settings: EngineSettings,
    permits: Arc<Semaphore>,
    claims: JobClaims,
}

impl JobEngine {
    pub fn new(
        db: DatabaseConnection,
        image_provider: Arc<dyn ImageProvider>,
        kling: Arc<dyn VideoProvider>,
        settings: EngineSettings,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_jobs.max(1)));

        Self {
            db,
            image_provider,
            kling,
            settings,
            permits,
            claims: JobClaims::default(),
        }
    }

    pub fn is_in_flight(&self, job_id: Uuid) -> bool {
        self.claims.is_claimed(job_id)
    }

    /// Claim every job a delete is about to remove.
    ///
    /// All or nothing: if one id is already claimed, the claims taken so far
    /// are released and `Busy` names that id. Hold the guards until the
    /// delete has finished.
    pub fn claim_for_removal<I>(&self, job_ids: I) -> Result<Vec<ClaimGuard>, DispatchError>
    where
        I: IntoIterator<Item = Uuid>,
    {
        let mut guards = Vec::new();
        for job_id in job_ids {
            match self.claims.claim(job_id) {
                Some(guard) => guards.push(guard),
                None => return Err(DispatchError::Busy(job_id)),
            }
        }
        Ok(guards)
    }

    /// Hold a job's claim as if a procedure were running it
    #[cfg(test)]
    pub fn claim_for_test(&self, job_id: Uuid) -> ClaimGuard {
        self.claims
            .claim(job_id)
            .expect("job is already claimed")
    }

    /// Run an image job in the background. Returns false if it is already running.
    pub fn spawn_image_job(&self, job_id: Uuid) -> bool {
        match self.claims.claim(job_id) {
            Some(guard) => {
                self.launch(guard, |engine, id| async move {
                    engine.execute_image_job(id).await
                });
                true
            }
            None => {
                log::warn!("Image job {} is already being processed", job_id);
                false
            }
        }
    }

    /// Run a video job in the background. Returns false if it is already running.
    pub fn spawn_video_job(&self, job_id: Uuid) -> bool {
        match self.claims.claim(job_id) {
            Some(guard) => {
                self.launch_video(guard);
                true
            }
            None => {
                log::warn!("Video job {} is already being processed", job_id);
                false
            }
        }
    }

    fn launch_video(&self, guard: ClaimGuard) {
        self.launch(guard, |engine, id| async move {
            engine.execute_video_job(id).await
        });
    }

    fn launch<F, Fut>(&self, guard: ClaimGuard, run: F)
    where
        F: FnOnce(JobEngine, Uuid) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let engine = self.clone();
        let permits = self.permits.clone();

        tokio::spawn(async move {
            let job_id = guard.id;
            match permits.acquire_owned().await {
                Ok(_permit) => run(engine, job_id).await,
                Err(e) => log::error!("Job {} could not acquire a worker permit: {}", job_id, e),
            }
            drop(guard);
        });
    }

    // ============ Image path ============

    /// Drive an image job to `completed` or `failed`.
    ///
    /// Provider errors end up in the job record; only store errors are logged here.
    pub async fn execute_image_job(&self, job_id: Uuid) {
        if let Err(e) = self.process_image_job(job_id).await {
            log::error!("Failed to record progress of image job {}: {}", job_id, e);
        }
    }

    async fn process_image_job(&self, job_id: Uuid) -> Result<(), DbErr> {
        let Some(job) = image_job::Entity::find_by_id(job_id).one(&self.db).await? else {
            log::warn!("Image job {} no longer exists, skipping", job_id);
            return Ok(());
        };

        if job.status.is_terminal() {
            log::info!("Image job {} is already {}, skipping", job.id, job.status);
            return Ok(());
        }

        log::info!("Processing image job {} (size {})", job.id, job.size);

        // Mark job as processing
        let mut active_job: image_job::ActiveModel = job.into();
        active_job.status = Set(JobStatus::Processing);
        active_job.updated_at = Set(Utc::now());
        let processing_job = active_job.update(&self.db).await?;
        self.refresh_row(processing_job.row_id).await;

        let result = self
            .image_provider
            .generate(&processing_job.prompt, &processing_job.size)
            .await;

        let row_id = processing_job.row_id;
        let now = Utc::now();
        let mut final_job: image_job::ActiveModel = processing_job.into();

        match result {
            Ok(image_url) => {
                final_job.image_url = Set(Some(image_url));
                final_job.status = Set(JobStatus::Completed);
                final_job.completed_at = Set(Some(now));
                final_job.error_message = Set(None);

                log::info!("Image job {} completed", job_id);
            }
            Err(e) => {
                let error_msg = JobError::from(e).to_string();
                log::error!("Image job {} failed: {}", job_id, error_msg);

                final_job.image_url = Set(None);
                final_job.status = Set(JobStatus::Failed);
                final_job.completed_at = Set(None);
                final_job.error_message = Set(Some(error_msg));
            }
        }

        final_job.updated_at = Set(now);
        final_job.update(&self.db).await?;
        self.refresh_row(row_id).await;

        Ok(())
    }

    // ============ Video path ============

    /// Drive a video job through submission and polling to `completed` or `failed`.
    pub async fn execute_video_job(&self, job_id: Uuid) {
        if let Err(e) = self.process_video_job(job_id).await {
            log::error!("Failed to record progress of video job {}: {}", job_id, e);
        }
    }

    async fn process_video_job(&self, job_id: Uuid) -> Result<(), DbErr> {
        let Some(job) = video_job::Entity::find_by_id(job_id).one(&self.db).await? else {
            log::warn!("Video job {} no longer exists, skipping", job_id);
            return Ok(());
        };

        if job.status.is_terminal() {
            log::info!("Video job {} is already {}, skipping", job.id, job.status);
            return Ok(());
        }

        log::info!("Processing video job {} with model {}", job.id, job.model);

        // Mark job as processing
        let mut active_job: video_job::ActiveModel = job.into();
        active_job.status = Set(JobStatus::Processing);
        active_job.updated_at = Set(Utc::now());
        let processing_job = active_job.update(&self.db).await?;
        self.refresh_row(processing_job.row_id).await;

        let result = self.drive_video_task(&processing_job).await;

        let row_id = processing_job.row_id;
        let now = Utc::now();
        let mut final_job: video_job::ActiveModel = processing_job.into();

        match result {
            Ok(video_url) => {
                final_job.video_url = Set(Some(video_url));
                final_job.status = Set(JobStatus::Completed);
                final_job.progress = Set(100);
                final_job.completed_at = Set(Some(now));
                final_job.error_message = Set(None);

                log::info!("Video job {} completed", job_id);
            }
            Err(e) => {
                let error_msg = e.to_string();
                log::error!("Video job {} failed: {}", job_id, error_msg);

                // The external task id, if any, stays for reconciliation
                final_job.status = Set(JobStatus::Failed);
                final_job.completed_at = Set(None);
                final_job.error_message = Set(Some(error_msg));
            }
        }

        final_job.updated_at = Set(now);
        final_job.update(&self.db).await?;
        self.refresh_row(row_id).await;

        Ok(())
    }

    /// Submit (or resume) the provider task and wait for its outcome
    async fn drive_video_task(&self, job: &video_job::Model) -> Result<String, JobError> {
        let provider = self.video_provider_for(job.model)?;

        let task_id = match &job.external_task_id {
            Some(task_id) => {
                log::info!("Video job {} resumes provider task {}", job.id, task_id);
                task_id.clone()
            }
            None => {
                let task_id = provider
                    .submit(&job.source_image_url, &job.motion_prompt, job.duration)
                    .await?;

                // Persist right away so the job can be found by its task id
                video_job::ActiveModel {
                    id: Unchanged(job.id),
                    external_task_id: Set(Some(task_id.clone())),
                    updated_at: Set(Utc::now()),
                    ..Default::default()
                }
                .update(&self.db)
                .await?;

                log::info!("Video job {} submitted as provider task {}", job.id, task_id);
                task_id
            }
        };

        self.poll_until_done(job.id, provider.as_ref(), &task_id, job.progress)
            .await
    }

    async fn poll_until_done(
        &self,
        job_id: Uuid,
        provider: &dyn VideoProvider,
        task_id: &str,
        starting_progress: i32,
    ) -> Result<String, JobError> {
        let max_attempts = self.settings.max_poll_attempts;
        let mut progress = starting_progress;

        for attempt in 1..=max_attempts {
            let task = provider.status(task_id).await?;
            let update = reconcile(&task);

            log::debug!(
                "Video job {} poll {}/{}: provider status '{}' -> {} ({}%)",
                job_id,
                attempt,
                max_attempts,
                task.status,
                update.status,
                update.progress
            );

            match update.status {
                JobStatus::Completed => {
                    return update.video_url.ok_or(JobError::MissingVideoUrl);
                }
                JobStatus::Failed => {
                    return Err(JobError::ProviderFailed(
                        update
                            .error
                            .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string()),
                    ));
                }
                JobStatus::Pending | JobStatus::Processing => {
                    // Never let a poller see progress go backwards
                    progress = progress.max(update.progress);
                    video_job::ActiveModel {
                        id: Unchanged(job_id),
                        progress: Set(progress),
                        updated_at: Set(Utc::now()),
                        ..Default::default()
                    }
                    .update(&self.db)
                    .await?;
                }
            }

            sleep(self.settings.poll_interval).await;
        }

        Err(JobError::Timeout(max_attempts))
    }

    fn video_provider_for(&self, model: VideoModel) -> Result<Arc<dyn VideoProvider>, JobError> {
        match model {
            VideoModel::Kling => Ok(self.kling.clone()),
            VideoModel::Veo => Err(JobError::UnsupportedModel(model)),
        }
    }

    /// Reset a failed video job and run it again from submission.
    ///
    /// The finished attempt is archived before the reset.
    pub async fn retry_video_job(&self, job_id: Uuid) -> Result<video_job::Model, DispatchError> {
        let guard = self
            .claims
            .claim(job_id)
            .ok_or(DispatchError::Busy(job_id))?;

        let job = video_job::Entity::find_by_id(job_id)
            .one(&self.db)
            .await?
            .ok_or(DispatchError::NotFound("Video job"))?;

        if job.status != JobStatus::Failed {
            return Err(DispatchError::InvalidState(
                "Can only retry failed jobs".to_string(),
            ));
        }

        let now = Utc::now();
        let txn = self.db.begin().await?;

        let previous_attempts = video_job_attempt::Entity::find()
            .filter(video_job_attempt::Column::VideoJobId.eq(job_id))
            .count(&txn)
            .await?;

        video_job_attempt::ActiveModel {
            id: Set(Uuid::new_v4()),
            video_job_id: Set(job.id),
            attempt_number: Set(previous_attempts as i32 + 1),
            external_task_id: Set(job.external_task_id.clone()),
            progress: Set(job.progress),
            error_message: Set(job.error_message.clone()),
            archived_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let row_id = job.row_id;
        let mut active_job: video_job::ActiveModel = job.into();
        active_job.status = Set(JobStatus::Pending);
        active_job.error_message = Set(None);
        active_job.progress = Set(0);
        active_job.external_task_id = Set(None);
        active_job.video_url = Set(None);
        active_job.completed_at = Set(None);
        active_job.updated_at = Set(now);
        let reset_job = active_job.update(&txn).await?;

        txn.commit().await?;
        self.refresh_row(row_id).await;

        log::info!(
            "Video job {} reset for attempt {}",
            job_id,
            previous_attempts + 2
        );

        self.launch_video(guard);

        Ok(reset_job)
    }

    /// Re-dispatch jobs left unfinished by a previous process.
    ///
    /// Video jobs that already hold a provider task id resume polling it.
    pub async fn recover_interrupted_jobs(&self) -> Result<usize, DbErr> {
        let unfinished = [JobStatus::Pending, JobStatus::Processing];

        let image_jobs = image_job::Entity::find()
            .filter(image_job::Column::Status.is_in(unfinished))
            .order_by_asc(image_job::Column::CreatedAt)
            .all(&self.db)
            .await?;

        let video_jobs = video_job::Entity::find()
            .filter(video_job::Column::Status.is_in(unfinished))
            .order_by_asc(video_job::Column::CreatedAt)
            .all(&self.db)
            .await?;

        let mut recovered = 0;
        for job in image_jobs {
            if self.spawn_image_job(job.id) {
                recovered += 1;
            }
        }
        for job in video_jobs {
            if self.spawn_video_job(job.id) {
                recovered += 1;
            }
        }

        if recovered > 0 {
            log::info!("Re-dispatched {} interrupted jobs", recovered);
        }

        Ok(recovered)
    }

    async fn refresh_row(&self, row_id: Option<Uuid>) {
        if let Some(row_id) = row_id {
            if let Err(e) = refresh_row_status(&self.db, row_id).await {
                log::warn!("Failed to refresh status of row {}: {}", row_id, e);
            }
        }
    }
}
