//! Scripted providers and record builders shared by the engine and handler tests.

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::*;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::models::{
    image_job, row,
    video_job::{self, VideoModel},
    JobStatus,
};
use crate::services::job_engine::{EngineSettings, JobEngine};
use crate::services::providers::{
    ImageAnalysis, ImageProvider, ProviderError, ProviderTaskStatus, ScenePreview, VideoProvider,
};

/// Image provider answering every generation with the same outcome
pub struct FakeImageProvider {
    outcome: Result<String, String>,
    pub calls: AtomicUsize,
}

impl FakeImageProvider {
    pub fn returning(url: &str) -> Self {
        Self {
            outcome: Ok(url.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(body: &str) -> Self {
        Self {
            outcome: Err(body.to_string()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ImageProvider for FakeImageProvider {
    async fn generate(&self, _prompt: &str, _size: &str) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone().map_err(|body| ProviderError::Http {
            provider: "OpenAI",
            status: 500,
            body,
        })
    }

    async fn analyze(&self, _image_url: &str) -> Result<ImageAnalysis, ProviderError> {
        let yaml = "scene:\n  description: a red bicycle\n  mood: cheerful\nsubjects:\n  - type: bicycle\n".to_string();
        Ok(ImageAnalysis {
            preview: ScenePreview {
                description: "a red bicycle".to_string(),
                main_subjects: vec!["bicycle".to_string()],
                mood: "cheerful".to_string(),
            },
            yaml,
        })
    }

    async fn to_prompt(&self, yaml: &str) -> Result<String, ProviderError> {
        Ok(format!("Prompt for: {}", yaml.lines().next().unwrap_or_default()))
    }
}

/// Video provider that replays a scripted list of task statuses.
///
/// Once the script runs out every poll reports `processing`.
pub struct ScriptedVideoProvider {
    submit_error: Option<String>,
    script: Mutex<VecDeque<(String, Option<String>, Option<String>)>>,
    observer: Mutex<Option<(DatabaseConnection, Uuid)>>,
    pub observed_progress: Mutex<Vec<i32>>,
    pub submits: AtomicUsize,
    pub polls: AtomicUsize,
}

impl ScriptedVideoProvider {
    pub fn new() -> Self {
        Self {
            submit_error: None,
            script: Mutex::new(VecDeque::new()),
            observer: Mutex::new(None),
            observed_progress: Mutex::new(Vec::new()),
            submits: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
        }
    }

    pub fn rejecting_submission(message: &str) -> Self {
        Self {
            submit_error: Some(message.to_string()),
            ..Self::new()
        }
    }

    pub fn then(self, status: &str, message: Option<&str>, url: Option<&str>) -> Self {
        self.script.lock().unwrap().push_back((
            status.to_string(),
            message.map(str::to_string),
            url.map(str::to_string),
        ));
        self
    }

    /// Record the persisted progress of `job_id` at the start of every poll
    pub fn observe(&self, db: DatabaseConnection, job_id: Uuid) {
        *self.observer.lock().unwrap() = Some((db, job_id));
    }
}

#[async_trait]
impl VideoProvider for ScriptedVideoProvider {
    async fn submit(
        &self,
        _source_image_url: &str,
        _motion_prompt: &str,
        _duration: i32,
    ) -> Result<String, ProviderError> {
        let n = self.submits.fetch_add(1, Ordering::SeqCst) + 1;
        match &self.submit_error {
            Some(message) => Err(ProviderError::Rejected {
                provider: "KLING",
                code: 1201,
                message: message.clone(),
            }),
            None => Ok(format!("task-{}", n)),
        }
    }

    async fn status(&self, task_id: &str) -> Result<ProviderTaskStatus, ProviderError> {
        self.polls.fetch_add(1, Ordering::SeqCst);

        let observer = self.observer.lock().unwrap().clone();
        if let Some((db, job_id)) = observer {
            let job = video_job::Entity::find_by_id(job_id)
                .one(&db)
                .await
                .unwrap()
                .unwrap();
            self.observed_progress.lock().unwrap().push(job.progress);
        }

        let next = self.script.lock().unwrap().pop_front();
        let (status, status_message, video_url) =
            next.unwrap_or_else(|| ("processing".to_string(), None, None));

        Ok(ProviderTaskStatus {
            task_id: task_id.to_string(),
            status,
            status_message,
            progress: None,
            video_url,
        })
    }
}

pub fn test_settings() -> EngineSettings {
    EngineSettings {
        poll_interval: Duration::ZERO,
        max_poll_attempts: 30,
        max_concurrent_jobs: 4,
    }
}

pub fn test_engine(
    db: &DatabaseConnection,
    image: Arc<FakeImageProvider>,
    video: Arc<ScriptedVideoProvider>,
) -> JobEngine {
    JobEngine::new(db.clone(), image, video, test_settings())
}

pub async fn insert_row(db: &DatabaseConnection, title: &str) -> row::Model {
    let now = Utc::now();
    row::ActiveModel {
        id: Set(Uuid::new_v4()),
        external_ref: Set(None),
        title: Set(title.to_string()),
        description: Set(None),
        status: Set(JobStatus::Pending),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn insert_image_job(
    db: &DatabaseConnection,
    prompt: &str,
    row_id: Option<Uuid>,
) -> image_job::Model {
    let now = Utc::now();
    image_job::ActiveModel {
        id: Set(Uuid::new_v4()),
        row_id: Set(row_id),
        prompt: Set(prompt.to_string()),
        reference_image_url: Set(None),
        yaml_content: Set(None),
        image_url: Set(None),
        status: Set(JobStatus::Pending),
        error_message: Set(None),
        model: Set(image_job::DEFAULT_IMAGE_MODEL.to_string()),
        size: Set(image_job::DEFAULT_IMAGE_SIZE.to_string()),
        created_at: Set(now),
        updated_at: Set(now),
        completed_at: Set(None),
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn insert_video_job(
    db: &DatabaseConnection,
    model: VideoModel,
    row_id: Option<Uuid>,
) -> video_job::Model {
    let now = Utc::now();
    video_job::ActiveModel {
        id: Set(Uuid::new_v4()),
        row_id: Set(row_id),
        image_job_id: Set(None),
        source_image_url: Set("https://cdn.example.com/source.png".to_string()),
        motion_prompt: Set("slow pan to the left".to_string()),
        duration: Set(video_job::DEFAULT_DURATION_SECS),
        model: Set(model),
        external_task_id: Set(None),
        video_url: Set(None),
        status: Set(JobStatus::Pending),
        progress: Set(0),
        error_message: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        completed_at: Set(None),
    }
    .insert(db)
    .await
    .unwrap()
}

/// Wait until the engine has released `job_id`
pub async fn wait_until_idle(engine: &JobEngine, job_id: Uuid) {
    for _ in 0..500 {
        if !engine.is_in_flight(job_id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} did not finish", job_id);
}
