use actix_web::{error, web, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use sea_orm::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{db_error, dispatch_error, page_bounds, parse_id};
use crate::models::{image_job, row, video_job, JobStatus};
use crate::services::job_engine::JobEngine;
use crate::services::providers::{ImageAnalysis, ImageProvider};
use crate::services::row_status::refresh_row_status;
use crate::utils::validators::{validate_image_size, validate_prompt, validate_url};

// ============ Request/Response DTOs ============

#[derive(Debug, Deserialize)]
pub struct ListImageJobsQuery {
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub row_id: Option<Uuid>,
    pub status: Option<JobStatus>,
}

#[derive(Debug, Deserialize)]
pub struct CreateImageJobRequest {
    pub prompt: String,
    pub reference_image_url: Option<String>,
    pub yaml_content: Option<String>,
    pub size: Option<String>,
    pub row_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct RebuildQuery {
    pub prompt: String,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeImageRequest {
    pub image_url: String,
}

#[derive(Debug, Deserialize)]
pub struct YamlToPromptRequest {
    pub yaml: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct YamlToPromptResponse {
    pub prompt: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImageJobResponse {
    pub id: Uuid,
    pub row_id: Option<Uuid>,
    pub prompt: String,
    pub reference_image_url: Option<String>,
    pub yaml_content: Option<String>,
    pub image_url: Option<String>,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub model: String,
    pub size: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<image_job::Model> for ImageJobResponse {
    fn from(model: image_job::Model) -> Self {
        Self {
            id: model.id,
            row_id: model.row_id,
            prompt: model.prompt,
            reference_image_url: model.reference_image_url,
            yaml_content: model.yaml_content,
            image_url: model.image_url,
            status: model.status,
            error_message: model.error_message,
            model: model.model,
            size: model.size,
            created_at: model.created_at,
            updated_at: model.updated_at,
            completed_at: model.completed_at,
        }
    }
}

// ============ Image Job Handlers ============

/// GET /api/v1/image-jobs?skip=0&limit=100&row_id=...&status=...
/// Newest jobs first
pub async fn list_image_jobs(
    db: web::Data<DatabaseConnection>,
    query: web::Query<ListImageJobsQuery>,
) -> Result<impl Responder, actix_web::Error> {
    let (skip, limit) = page_bounds(query.skip, query.limit)?;

    let mut select = image_job::Entity::find();
    if let Some(row_id) = query.row_id {
        select = select.filter(image_job::Column::RowId.eq(row_id));
    }
    if let Some(status) = query.status {
        select = select.filter(image_job::Column::Status.eq(status));
    }

    let jobs = select
        .order_by_desc(image_job::Column::CreatedAt)
        .offset(skip)
        .limit(limit)
        .all(db.as_ref())
        .await
        .map_err(db_error)?;

    let response: Vec<ImageJobResponse> = jobs.into_iter().map(ImageJobResponse::from).collect();
    Ok(HttpResponse::Ok().json(response))
}

/// POST /api/v1/image-jobs
/// Persists a pending job and starts generating in the background
pub async fn create_image_job(
    db: web::Data<DatabaseConnection>,
    engine: web::Data<JobEngine>,
    body: web::Json<CreateImageJobRequest>,
) -> Result<impl Responder, actix_web::Error> {
    let body = body.into_inner();

    validate_prompt("prompt", &body.prompt).map_err(|e| error::ErrorBadRequest(e.to_string()))?;
    if let Some(url) = &body.reference_image_url {
        validate_url(url).map_err(|e| error::ErrorBadRequest(e.to_string()))?;
    }
    let size = body
        .size
        .unwrap_or_else(|| image_job::DEFAULT_IMAGE_SIZE.to_string());
    validate_image_size(&size).map_err(|e| error::ErrorBadRequest(e.to_string()))?;

    if let Some(row_id) = body.row_id {
        ensure_row_exists(db.as_ref(), row_id).await?;
    }

    let job = insert_pending_job(
        db.as_ref(),
        NewImageJob {
            row_id: body.row_id,
            prompt: body.prompt,
            reference_image_url: body.reference_image_url,
            yaml_content: body.yaml_content,
            model: image_job::DEFAULT_IMAGE_MODEL.to_string(),
            size,
        },
    )
    .await?;

    log::info!("Created image job {}", job.id);
    engine.spawn_image_job(job.id);

    Ok(HttpResponse::Created().json(ImageJobResponse::from(job)))
}

/// GET /api/v1/image-jobs/:id
pub async fn get_image_job(
    db: web::Data<DatabaseConnection>,
    path: web::Path<String>,
) -> Result<impl Responder, actix_web::Error> {
    let job_id = parse_id(&path.into_inner(), "image job")?;
    let job = find_image_job(db.as_ref(), job_id).await?;

    Ok(HttpResponse::Ok().json(ImageJobResponse::from(job)))
}

/// POST /api/v1/image-jobs/:id/rebuild?prompt=...
/// Creates a new job from an existing one with a different prompt
pub async fn rebuild_image_job(
    db: web::Data<DatabaseConnection>,
    engine: web::Data<JobEngine>,
    path: web::Path<String>,
    query: web::Query<RebuildQuery>,
) -> Result<impl Responder, actix_web::Error> {
    let job_id = parse_id(&path.into_inner(), "image job")?;
    let query = query.into_inner();
    validate_prompt("prompt", &query.prompt).map_err(|e| error::ErrorBadRequest(e.to_string()))?;

    let original = find_image_job(db.as_ref(), job_id).await?;

    let job = insert_pending_job(
        db.as_ref(),
        NewImageJob {
            row_id: original.row_id,
            prompt: query.prompt,
            reference_image_url: original.reference_image_url,
            yaml_content: None,
            model: original.model,
            size: original.size,
        },
    )
    .await?;

    log::info!("Rebuilt image job {} as {}", original.id, job.id);
    engine.spawn_image_job(job.id);

    Ok(HttpResponse::Created().json(ImageJobResponse::from(job)))
}

/// DELETE /api/v1/image-jobs/:id
/// Video jobs made from this image are deleted with it
pub async fn delete_image_job(
    db: web::Data<DatabaseConnection>,
    engine: web::Data<JobEngine>,
    path: web::Path<String>,
) -> Result<impl Responder, actix_web::Error> {
    let job_id = parse_id(&path.into_inner(), "image job")?;
    let job = find_image_job(db.as_ref(), job_id).await?;

    let derived_video_ids: Vec<Uuid> = video_job::Entity::find()
        .select_only()
        .column(video_job::Column::Id)
        .filter(video_job::Column::ImageJobId.eq(job.id))
        .into_tuple()
        .all(db.as_ref())
        .await
        .map_err(db_error)?;

    // The delete cascades to videos made from this image; hold all of them
    let _claims = engine
        .claim_for_removal(std::iter::once(job.id).chain(derived_video_ids))
        .map_err(dispatch_error)?;

    image_job::Entity::delete_by_id(job.id)
        .exec(db.as_ref())
        .await
        .map_err(db_error)?;

    if let Some(row_id) = job.row_id {
        if let Err(e) = refresh_row_status(db.as_ref(), row_id).await {
            log::warn!("Failed to refresh status of row {}: {}", row_id, e);
        }
    }

    log::info!("Deleted image job {}", job.id);

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Image job deleted successfully"
    })))
}

/// POST /api/v1/image-jobs/analyze
/// Describe an image as YAML plus a short preview
pub async fn analyze_image(
    image_provider: web::Data<dyn ImageProvider>,
    body: web::Json<AnalyzeImageRequest>,
) -> Result<impl Responder, actix_web::Error> {
    validate_url(&body.image_url).map_err(|e| error::ErrorBadRequest(e.to_string()))?;

    let analysis: ImageAnalysis = image_provider
        .analyze(&body.image_url)
        .await
        .map_err(|e| {
            log::error!("Image analysis failed: {}", e);
            error::ErrorInternalServerError(e.to_string())
        })?;

    Ok(HttpResponse::Ok().json(analysis))
}

/// POST /api/v1/image-jobs/yaml-to-prompt
pub async fn yaml_to_prompt(
    image_provider: web::Data<dyn ImageProvider>,
    body: web::Json<YamlToPromptRequest>,
) -> Result<impl Responder, actix_web::Error> {
    validate_prompt("yaml", &body.yaml).map_err(|e| error::ErrorBadRequest(e.to_string()))?;

    let prompt = image_provider.to_prompt(&body.yaml).await.map_err(|e| {
        log::error!("YAML to prompt conversion failed: {}", e);
        error::ErrorInternalServerError(e.to_string())
    })?;

    Ok(HttpResponse::Ok().json(YamlToPromptResponse { prompt }))
}

// ============ Helpers ============

struct NewImageJob {
    row_id: Option<Uuid>,
    prompt: String,
    reference_image_url: Option<String>,
    yaml_content: Option<String>,
    model: String,
    size: String,
}

async fn insert_pending_job(
    db: &DatabaseConnection,
    new_job: NewImageJob,
) -> Result<image_job::Model, actix_web::Error> {
    let now = Utc::now();
    let job = image_job::ActiveModel {
        id: Set(Uuid::new_v4()),
        row_id: Set(new_job.row_id),
        prompt: Set(new_job.prompt),
        reference_image_url: Set(new_job.reference_image_url),
        yaml_content: Set(new_job.yaml_content),
        image_url: Set(None),
        status: Set(JobStatus::Pending),
        error_message: Set(None),
        model: Set(new_job.model),
        size: Set(new_job.size),
        created_at: Set(now),
        updated_at: Set(now),
        completed_at: Set(None),
    }
    .insert(db)
    .await
    .map_err(db_error)?;

    if let Some(row_id) = job.row_id {
        if let Err(e) = refresh_row_status(db, row_id).await {
            log::warn!("Failed to refresh status of row {}: {}", row_id, e);
        }
    }

    Ok(job)
}

async fn find_image_job(
    db: &DatabaseConnection,
    job_id: Uuid,
) -> Result<image_job::Model, actix_web::Error> {
    image_job::Entity::find_by_id(job_id)
        .one(db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| error::ErrorNotFound("Image job not found"))
}

pub(crate) async fn ensure_row_exists(
    db: &DatabaseConnection,
    row_id: Uuid,
) -> Result<(), actix_web::Error> {
    row::Entity::find_by_id(row_id)
        .one(db)
        .await
        .map_err(db_error)?
        .map(|_| ())
        .ok_or_else(|| error::ErrorNotFound("Row not found"))
}
