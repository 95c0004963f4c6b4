use actix_web::{error, web, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use sea_orm::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{db_error, dispatch_error, page_bounds, parse_id};
use crate::models::{image_job, row, video_job, JobStatus};
use crate::services::job_engine::JobEngine;
use crate::utils::validators::validate_title;

// ============ Request/Response DTOs ============

#[derive(Debug, Deserialize)]
pub struct ListRowsQuery {
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub status: Option<JobStatus>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRowRequest {
    pub title: String,
    pub description: Option<String>,
    pub external_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRowRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<JobStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RowResponse {
    pub id: Uuid,
    pub external_ref: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<row::Model> for RowResponse {
    fn from(model: row::Model) -> Self {
        Self {
            id: model.id,
            external_ref: model.external_ref,
            title: model.title,
            description: model.description,
            status: model.status,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

// ============ Row Handlers ============

/// GET /api/v1/rows?skip=0&limit=100&status=pending
pub async fn list_rows(
    db: web::Data<DatabaseConnection>,
    query: web::Query<ListRowsQuery>,
) -> Result<impl Responder, actix_web::Error> {
    let (skip, limit) = page_bounds(query.skip, query.limit)?;

    let mut select = row::Entity::find();
    if let Some(status) = query.status {
        select = select.filter(row::Column::Status.eq(status));
    }

    let rows = select
        .order_by_asc(row::Column::CreatedAt)
        .offset(skip)
        .limit(limit)
        .all(db.as_ref())
        .await
        .map_err(db_error)?;

    let response: Vec<RowResponse> = rows.into_iter().map(RowResponse::from).collect();
    Ok(HttpResponse::Ok().json(response))
}

/// POST /api/v1/rows
pub async fn create_row(
    db: web::Data<DatabaseConnection>,
    body: web::Json<CreateRowRequest>,
) -> Result<impl Responder, actix_web::Error> {
    let body = body.into_inner();
    validate_title(&body.title).map_err(|e| error::ErrorBadRequest(e.to_string()))?;

    let now = Utc::now();
    let row = row::ActiveModel {
        id: Set(Uuid::new_v4()),
        external_ref: Set(body.external_ref),
        title: Set(body.title),
        description: Set(body.description),
        status: Set(JobStatus::Pending),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db.as_ref())
    .await
    .map_err(db_error)?;

    log::info!("Created row {}", row.id);

    Ok(HttpResponse::Created().json(RowResponse::from(row)))
}

/// GET /api/v1/rows/:id
pub async fn get_row(
    db: web::Data<DatabaseConnection>,
    path: web::Path<String>,
) -> Result<impl Responder, actix_web::Error> {
    let row_id = parse_id(&path.into_inner(), "row")?;
    let row = find_row(db.as_ref(), row_id).await?;

    Ok(HttpResponse::Ok().json(RowResponse::from(row)))
}

/// PATCH /api/v1/rows/:id
/// Only the provided fields change
pub async fn update_row(
    db: web::Data<DatabaseConnection>,
    path: web::Path<String>,
    body: web::Json<UpdateRowRequest>,
) -> Result<impl Responder, actix_web::Error> {
    let row_id = parse_id(&path.into_inner(), "row")?;
    let body = body.into_inner();
    let row = find_row(db.as_ref(), row_id).await?;

    let mut active_row: row::ActiveModel = row.into();
    if let Some(title) = body.title {
        validate_title(&title).map_err(|e| error::ErrorBadRequest(e.to_string()))?;
        active_row.title = Set(title);
    }
    if let Some(description) = body.description {
        active_row.description = Set(Some(description));
    }
    if let Some(status) = body.status {
        active_row.status = Set(status);
    }
    active_row.updated_at = Set(Utc::now());

    let row = active_row.update(db.as_ref()).await.map_err(db_error)?;

    Ok(HttpResponse::Ok().json(RowResponse::from(row)))
}

/// DELETE /api/v1/rows/:id
/// Deletes the row together with its image and video jobs
pub async fn delete_row(
    db: web::Data<DatabaseConnection>,
    engine: web::Data<JobEngine>,
    path: web::Path<String>,
) -> Result<impl Responder, actix_web::Error> {
    let row_id = parse_id(&path.into_inner(), "row")?;
    let row = find_row(db.as_ref(), row_id).await?;

    // Refuse while any job that would be cascaded is still running
    let image_job_ids: Vec<Uuid> = image_job::Entity::find()
        .select_only()
        .column(image_job::Column::Id)
        .filter(image_job::Column::RowId.eq(row.id))
        .into_tuple()
        .all(db.as_ref())
        .await
        .map_err(db_error)?;

    let video_job_ids: Vec<Uuid> = video_job::Entity::find()
        .select_only()
        .column(video_job::Column::Id)
        .filter(
            Condition::any()
                .add(video_job::Column::RowId.eq(row.id))
                .add(video_job::Column::ImageJobId.is_in(image_job_ids.clone())),
        )
        .into_tuple()
        .all(db.as_ref())
        .await
        .map_err(db_error)?;

    let _claims = engine
        .claim_for_removal(image_job_ids.iter().chain(video_job_ids.iter()).copied())
        .map_err(dispatch_error)?;

    row::Entity::delete_by_id(row.id)
        .exec(db.as_ref())
        .await
        .map_err(db_error)?;

    log::info!(
        "Deleted row {} with {} image jobs and {} video jobs",
        row_id,
        image_job_ids.len(),
        video_job_ids.len()
    );

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Row deleted successfully"
    })))
}

async fn find_row(db: &DatabaseConnection, row_id: Uuid) -> Result<row::Model, actix_web::Error> {
    row::Entity::find_by_id(row_id)
        .one(db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| error::ErrorNotFound("Row not found"))
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test, App};

    use super::*;
    use crate::handlers::configure;
    use crate::handlers::test_app::default_state;
    use crate::models::video_job::VideoModel;
    use crate::services::test_support::{insert_image_job, insert_row, insert_video_job};
    use crate::utils::db::test_connection;

    #[actix_web::test]
    async fn test_create_get_and_update_row() {
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

        let req = test::TestRequest::post()
            .uri("/api/v1/rows")
            .set_json(serde_json::json!({ "title": "Scene 1", "external_ref": "sheet!A2" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created: RowResponse = test::read_body_json(resp).await;
        assert_eq!(created.status, JobStatus::Pending);
        assert_eq!(created.external_ref.as_deref(), Some("sheet!A2"));

        let req = test::TestRequest::patch()
            .uri(&format!("/api/v1/rows/{}", created.id))
            .set_json(serde_json::json!({ "description": "wide shot" }))
            .to_request();
        let updated: RowResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(updated.title, "Scene 1");
        assert_eq!(updated.description.as_deref(), Some("wide shot"));

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/rows/{}", created.id))
            .to_request();
        let fetched: RowResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(fetched.description.as_deref(), Some("wide shot"));
    }

    #[actix_web::test]
    async fn test_row_validation_and_missing_row() {
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

        let req = test::TestRequest::post()
            .uri("/api/v1/rows")
            .set_json(serde_json::json!({ "title": "" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/rows/{}", Uuid::new_v4()))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::get()
            .uri("/api/v1/rows?limit=0")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_list_rows_filters_by_status() {
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

        let first = insert_row(&db, "first").await;
        insert_row(&db, "second").await;
        let mut active: row::ActiveModel = first.clone().into();
        active.status = Set(JobStatus::Failed);
        active.update(&db).await.unwrap();

        let req = test::TestRequest::get()
            .uri("/api/v1/rows?status=failed")
            .to_request();
        let rows: Vec<RowResponse> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, first.id);

        let req = test::TestRequest::get()
            .uri("/api/v1/rows?skip=1&limit=10")
            .to_request();
        let rows: Vec<RowResponse> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(rows.len(), 1);
    }

    #[actix_web::test]
    async fn test_delete_row_cascades_to_jobs() {
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

        let parent = insert_row(&db, "doomed").await;
        insert_image_job(&db, "A red bicycle", Some(parent.id)).await;
        insert_video_job(&db, VideoModel::Kling, Some(parent.id)).await;

        let req = test::TestRequest::delete()
            .uri(&format!("/api/v1/rows/{}", parent.id))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        assert_eq!(row::Entity::find().count(&db).await.unwrap(), 0);
        assert_eq!(image_job::Entity::find().count(&db).await.unwrap(), 0);
        assert_eq!(video_job::Entity::find().count(&db).await.unwrap(), 0);
    }

    #[actix_web::test]
    async fn test_delete_row_conflicts_while_job_in_flight() {
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

        let parent = insert_row(&db, "busy").await;
        let job = insert_video_job(&db, VideoModel::Kling, Some(parent.id)).await;
        let _claim = state.engine.claim_for_test(job.id);

        let req = test::TestRequest::delete()
            .uri(&format!("/api/v1/rows/{}", parent.id))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);
        assert_eq!(row::Entity::find().count(&db).await.unwrap(), 1);
    }
}
