use actix_web::{error, web, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use sea_orm::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::image_jobs::ensure_row_exists;
use super::{db_error, dispatch_error, page_bounds, parse_id};
use crate::models::{
    image_job,
    video_job::{self, VideoModel},
    video_job_attempt, JobStatus,
};
use crate::services::job_engine::JobEngine;
use crate::services::row_status::refresh_row_status;
use crate::utils::validators::{validate_duration, validate_prompt, validate_url};

// ============ Request/Response DTOs ============

#[derive(Debug, Deserialize)]
pub struct ListVideoJobsQuery {
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub row_id: Option<Uuid>,
    pub image_job_id: Option<Uuid>,
    pub status: Option<JobStatus>,
}

#[derive(Debug, Deserialize)]
pub struct CreateVideoJobRequest {
    pub source_image_url: String,
    pub motion_prompt: String,
    pub model: VideoModel,
    pub duration: Option<i32>,
    pub row_id: Option<Uuid>,
    pub image_job_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VideoJobResponse {
    pub id: Uuid,
    pub row_id: Option<Uuid>,
    pub image_job_id: Option<Uuid>,
    pub source_image_url: String,
    pub motion_prompt: String,
    pub duration: i32,
    pub model: VideoModel,
    pub external_task_id: Option<String>,
    pub video_url: Option<String>,
    pub status: JobStatus,
    pub progress: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<video_job::Model> for VideoJobResponse {
    fn from(model: video_job::Model) -> Self {
        Self {
            id: model.id,
            row_id: model.row_id,
            image_job_id: model.image_job_id,
            source_image_url: model.source_image_url,
            motion_prompt: model.motion_prompt,
            duration: model.duration,
            model: model.model,
            external_task_id: model.external_task_id,
            video_url: model.video_url,
            status: model.status,
            progress: model.progress,
            error_message: model.error_message,
            created_at: model.created_at,
            updated_at: model.updated_at,
            completed_at: model.completed_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VideoJobAttemptResponse {
    pub id: Uuid,
    pub attempt_number: i32,
    pub external_task_id: Option<String>,
    pub progress: i32,
    pub error_message: Option<String>,
    pub archived_at: DateTime<Utc>,
}

impl From<video_job_attempt::Model> for VideoJobAttemptResponse {
    fn from(model: video_job_attempt::Model) -> Self {
        Self {
            id: model.id,
            attempt_number: model.attempt_number,
            external_task_id: model.external_task_id,
            progress: model.progress,
            error_message: model.error_message,
            archived_at: model.archived_at,
        }
    }
}

// ============ Video Job Handlers ============

/// GET /api/v1/video-jobs?skip=0&limit=100&row_id=...&image_job_id=...&status=...
pub async fn list_video_jobs(
    db: web::Data<DatabaseConnection>,
    query: web::Query<ListVideoJobsQuery>,
) -> Result<impl Responder, actix_web::Error> {
    let (skip, limit) = page_bounds(query.skip, query.limit)?;

    let mut select = video_job::Entity::find();
    if let Some(row_id) = query.row_id {
        select = select.filter(video_job::Column::RowId.eq(row_id));
    }
    if let Some(image_job_id) = query.image_job_id {
        select = select.filter(video_job::Column::ImageJobId.eq(image_job_id));
    }
    if let Some(status) = query.status {
        select = select.filter(video_job::Column::Status.eq(status));
    }

    let jobs = select
        .order_by_desc(video_job::Column::CreatedAt)
        .offset(skip)
        .limit(limit)
        .all(db.as_ref())
        .await
        .map_err(db_error)?;

    let response: Vec<VideoJobResponse> = jobs.into_iter().map(VideoJobResponse::from).collect();
    Ok(HttpResponse::Ok().json(response))
}

/// POST /api/v1/video-jobs
/// Persists a pending job and starts submission and polling in the background
pub async fn create_video_job(
    db: web::Data<DatabaseConnection>,
    engine: web::Data<JobEngine>,
    body: web::Json<CreateVideoJobRequest>,
) -> Result<impl Responder, actix_web::Error> {
    let body = body.into_inner();

    validate_url(&body.source_image_url).map_err(|e| error::ErrorBadRequest(e.to_string()))?;
    validate_prompt("motion_prompt", &body.motion_prompt)
        .map_err(|e| error::ErrorBadRequest(e.to_string()))?;
    let duration = body.duration.unwrap_or(video_job::DEFAULT_DURATION_SECS);
    validate_duration(duration).map_err(|e| error::ErrorBadRequest(e.to_string()))?;

    if let Some(row_id) = body.row_id {
        ensure_row_exists(db.as_ref(), row_id).await?;
    }
    if let Some(image_job_id) = body.image_job_id {
        image_job::Entity::find_by_id(image_job_id)
            .one(db.as_ref())
            .await
            .map_err(db_error)?
            .ok_or_else(|| error::ErrorNotFound("Image job not found"))?;
    }

    let now = Utc::now();
    let job = video_job::ActiveModel {
        id: Set(Uuid::new_v4()),
        row_id: Set(body.row_id),
        image_job_id: Set(body.image_job_id),
        source_image_url: Set(body.source_image_url),
        motion_prompt: Set(body.motion_prompt),
        duration: Set(duration),
        model: Set(body.model),
        external_task_id: Set(None),
        video_url: Set(None),
        status: Set(JobStatus::Pending),
        progress: Set(0),
        error_message: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        completed_at: Set(None),
    }
    .insert(db.as_ref())
    .await
    .map_err(db_error)?;

    if let Some(row_id) = job.row_id {
        if let Err(e) = refresh_row_status(db.as_ref(), row_id).await {
            log::warn!("Failed to refresh status of row {}: {}", row_id, e);
        }
    }

    log::info!("Created video job {} for model {}", job.id, job.model);
    engine.spawn_video_job(job.id);

    Ok(HttpResponse::Created().json(VideoJobResponse::from(job)))
}

/// GET /api/v1/video-jobs/:id
pub async fn get_video_job(
    db: web::Data<DatabaseConnection>,
    path: web::Path<String>,
) -> Result<impl Responder, actix_web::Error> {
    let job_id = parse_id(&path.into_inner(), "video job")?;
    let job = find_video_job(db.as_ref(), job_id).await?;

    Ok(HttpResponse::Ok().json(VideoJobResponse::from(job)))
}

/// GET /api/v1/video-jobs/external/:task_id
/// Look a job up by the task id the video provider assigned to it
pub async fn get_video_job_by_external_id(
    db: web::Data<DatabaseConnection>,
    path: web::Path<String>,
) -> Result<impl Responder, actix_web::Error> {
    let task_id = path.into_inner();

    let job = video_job::Entity::find()
        .filter(video_job::Column::ExternalTaskId.eq(task_id.as_str()))
        .one(db.as_ref())
        .await
        .map_err(db_error)?
        .ok_or_else(|| error::ErrorNotFound("Video job not found"))?;

    Ok(HttpResponse::Ok().json(VideoJobResponse::from(job)))
}

/// POST /api/v1/video-jobs/:id/retry
/// Only failed jobs can be retried
pub async fn retry_video_job(
    engine: web::Data<JobEngine>,
    path: web::Path<String>,
) -> Result<impl Responder, actix_web::Error> {
    let job_id = parse_id(&path.into_inner(), "video job")?;

    let job = engine
        .retry_video_job(job_id)
        .await
        .map_err(dispatch_error)?;

    Ok(HttpResponse::Ok().json(VideoJobResponse::from(job)))
}

/// GET /api/v1/video-jobs/:id/attempts
/// Earlier attempts archived by retries, oldest first
pub async fn list_video_job_attempts(
    db: web::Data<DatabaseConnection>,
    path: web::Path<String>,
) -> Result<impl Responder, actix_web::Error> {
    let job_id = parse_id(&path.into_inner(), "video job")?;
    let job = find_video_job(db.as_ref(), job_id).await?;

    let attempts = video_job_attempt::Entity::find()
        .filter(video_job_attempt::Column::VideoJobId.eq(job.id))
        .order_by_asc(video_job_attempt::Column::AttemptNumber)
        .all(db.as_ref())
        .await
        .map_err(db_error)?;

    let response: Vec<VideoJobAttemptResponse> = attempts
        .into_iter()
        .map(VideoJobAttemptResponse::from)
        .collect();
    Ok(HttpResponse::Ok().json(response))
}

/// DELETE /api/v1/video-jobs/:id
pub async fn delete_video_job(
    db: web::Data<DatabaseConnection>,
    engine: web::Data<JobEngine>,
    path: web::Path<String>,
) -> Result<impl Responder, actix_web::Error> {
    let job_id = parse_id(&path.into_inner(), "video job")?;
    let job = find_video_job(db.as_ref(), job_id).await?;

    // Held until the record is gone so a retry cannot restart it meanwhile
    let _claims = engine
        .claim_for_removal([job.id])
        .map_err(dispatch_error)?;

    video_job::Entity::delete_by_id(job.id)
        .exec(db.as_ref())
        .await
        .map_err(db_error)?;

    if let Some(row_id) = job.row_id {
        if let Err(e) = refresh_row_status(db.as_ref(), row_id).await {
            log::warn!("Failed to refresh status of row {}: {}", row_id, e);
        }
    }

    log::info!("Deleted video job {}", job.id);

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Video job deleted successfully"
    })))
}

async fn find_video_job(
    db: &DatabaseConnection,
    job_id: Uuid,
) -> Result<video_job::Model, actix_web::Error> {
    video_job::Entity::find_by_id(job_id)
        .one(db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| error::ErrorNotFound("Video job not found"))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use actix_web::{http::StatusCode, test, App};

    use super::*;
    use crate::handlers::configure;
    use crate::handlers::test_app::{app_state, default_state};
    use crate::services::test_support::{
        insert_image_job, insert_video_job, wait_until_idle, FakeImageProvider,
        ScriptedVideoProvider,
    };
    use crate::utils::db::test_connection;

    #[actix_web::test]
    async fn test_create_video_job_completes_in_background() {
        let db = test_connection().await;
        let state = default_state(&db);
        let app = test::init_service(
            App::new()
                .app_data(state.db.clone())
                .app_data(state.engine.clone())
                .app_data(state.image_provider.clone())
                .configure(configure),
        )
        .await;
        let source = insert_image_job(&db, "A red bicycle", None).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/video-jobs")
            .set_json(serde_json::json!({
                "source_image_url": "https://cdn.example.com/bike.png",
                "motion_prompt": "the bicycle rolls forward",
                "model": "kling",
                "image_job_id": source.id,
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created: VideoJobResponse = test::read_body_json(resp).await;
        assert_eq!(created.status, JobStatus::Pending);
        assert_eq!(created.duration, video_job::DEFAULT_DURATION_SECS);
        assert_eq!(created.progress, 0);

        wait_until_idle(&state.engine, created.id).await;

        let req = test::TestRequest::get()
            .uri("/api/v1/video-jobs/external/task-1")
            .to_request();
        let fetched: VideoJobResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.status, JobStatus::Completed);
        assert_eq!(fetched.progress, 100);
        assert_eq!(
            fetched.video_url.as_deref(),
            Some("https://cdn.example.com/out.mp4")
        );

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/video-jobs?image_job_id={}", source.id))
            .to_request();
        let listed: Vec<VideoJobResponse> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(listed.len(), 1);
    }

    #[actix_web::test]
    async fn test_create_video_job_validation() {
        let db = test_connection().await;
        let state = default_state(&db);
        let app = test::init_service(
            App::new()
                .app_data(state.db.clone())
                .app_data(state.engine.clone())
                .app_data(state.image_provider.clone())
                .configure(configure),
        )
        .await;

        let bad_requests = [
            serde_json::json!({
                "source_image_url": "not a url",
                "motion_prompt": "pan",
                "model": "kling",
            }),
            serde_json::json!({
                "source_image_url": "https://cdn.example.com/a.png",
                "motion_prompt": "",
                "model": "kling",
            }),
            serde_json::json!({
                "source_image_url": "https://cdn.example.com/a.png",
                "motion_prompt": "pan",
                "model": "kling",
                "duration": 11,
            }),
        ];
        for body in bad_requests {
            let req = test::TestRequest::post()
                .uri("/api/v1/video-jobs")
                .set_json(body)
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
        }

        let req = test::TestRequest::post()
            .uri("/api/v1/video-jobs")
            .set_json(serde_json::json!({
                "source_image_url": "https://cdn.example.com/a.png",
                "motion_prompt": "pan",
                "model": "kling",
                "image_job_id": Uuid::new_v4(),
            }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
        assert_eq!(video_job::Entity::find().count(&db).await.unwrap(), 0);
    }

    #[actix_web::test]
    async fn test_retry_status_codes() {
        let db = test_connection().await;
        let state = default_state(&db);
        let app = test::init_service(
            App::new()
                .app_data(state.db.clone())
                .app_data(state.engine.clone())
                .app_data(state.image_provider.clone())
                .configure(configure),
        )
        .await;
        let job = insert_video_job(&db, VideoModel::Kling, None).await;

        // Pending jobs cannot be retried
        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/video-jobs/{}/retry", job.id))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/video-jobs/{}/retry", Uuid::new_v4()))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let _claim = state.engine.claim_for_test(job.id);
        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/video-jobs/{}/retry", job.id))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);
    }

    #[actix_web::test]
    async fn test_retry_failed_job_archives_attempt() {
        let db = test_connection().await;
        let state = app_state(
            &db,
            Arc::new(FakeImageProvider::returning("unused")),
            Arc::new(
                ScriptedVideoProvider::new()
                    .then("failed", Some("bad image"), None)
                    .then("succeed", None, Some("https://cdn/second.mp4")),
            ),
        );
        let app = test::init_service(
            App::new()
                .app_data(state.db.clone())
                .app_data(state.engine.clone())
                .app_data(state.image_provider.clone())
                .configure(configure),
        )
        .await;
        let job = insert_video_job(&db, VideoModel::Kling, None).await;
        state.engine.execute_video_job(job.id).await;

        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/video-jobs/{}/retry", job.id))
            .to_request();
        let reset: VideoJobResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(reset.status, JobStatus::Pending);
        assert_eq!(reset.error_message, None);
        assert_eq!(reset.progress, 0);

        wait_until_idle(&state.engine, job.id).await;

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/video-jobs/{}/attempts", job.id))
            .to_request();
        let attempts: Vec<VideoJobAttemptResponse> =
            test::call_and_read_body_json(&app, req).await;
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].error_message.as_deref(), Some("bad image"));
        assert_eq!(attempts[0].external_task_id.as_deref(), Some("task-1"));
    }

    #[actix_web::test]
    async fn test_delete_video_job() {
        let db = test_connection().await;
        let state = default_state(&db);
        let app = test::init_service(
            App::new()
                .app_data(state.db.clone())
                .app_data(state.engine.clone())
                .app_data(state.image_provider.clone())
                .configure(configure),
        )
        .await;
        let job = insert_video_job(&db, VideoModel::Kling, None).await;

        let claim = state.engine.claim_for_test(job.id);
        let req = test::TestRequest::delete()
            .uri(&format!("/api/v1/video-jobs/{}", job.id))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);
        drop(claim);

        let req = test::TestRequest::delete()
            .uri(&format!("/api/v1/video-jobs/{}", job.id))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/video-jobs/{}", job.id))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_retry_conflicts_while_delete_holds_job() {
        let db = test_connection().await;
        let video = Arc::new(ScriptedVideoProvider::rejecting_submission("Invalid image"));
        let state = app_state(
            &db,
            Arc::new(FakeImageProvider::returning("unused")),
            video.clone(),
        );
        let app = test::init_service(
            App::new()
                .app_data(state.db.clone())
                .app_data(state.engine.clone())
                .app_data(state.image_provider.clone())
                .configure(configure),
        )
        .await;
        let job = insert_video_job(&db, VideoModel::Kling, None).await;
        state.engine.execute_video_job(job.id).await;

        // A delete of this job is between its lookup and the row removal
        let removal = state.engine.claim_for_removal([job.id]).unwrap();
        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/video-jobs/{}/retry", job.id))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);
        assert_eq!(video.submits.load(Ordering::SeqCst), 1);

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/video-jobs/{}", job.id))
            .to_request();
        let unchanged: VideoJobResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(unchanged.status, JobStatus::Failed);
        drop(removal);

        // Once the delete is done the retry has nothing left to restart
        let req = test::TestRequest::delete()
            .uri(&format!("/api/v1/video-jobs/{}", job.id))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/video-jobs/{}/retry", job.id))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
        assert!(!state.engine.is_in_flight(job.id));
    }
}
