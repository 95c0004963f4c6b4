pub mod image_jobs;
pub mod rows;
pub mod system;
pub mod video_jobs;

use actix_web::{error, web};
use sea_orm::DbErr;
use uuid::Uuid;

use crate::services::job_engine::DispatchError;

pub const DEFAULT_PAGE_LIMIT: u64 = 100;
pub const MAX_PAGE_LIMIT: u64 = 1000;

/// Mount every route: service info at the root, resources under `/api/v1`
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(system::root))
        .route("/health", web::get().to(system::health))
        .service(
            web::scope("/api/v1")
                .service(
                    web::scope("/rows")
                        .route("", web::get().to(rows::list_rows))
                        .route("", web::post().to(rows::create_row))
                        .route("/{id}", web::get().to(rows::get_row))
                        .route("/{id}", web::patch().to(rows::update_row))
                        .route("/{id}", web::delete().to(rows::delete_row)),
                )
                .service(
                    web::scope("/image-jobs")
                        .route("", web::get().to(image_jobs::list_image_jobs))
                        .route("", web::post().to(image_jobs::create_image_job))
                        .route("/analyze", web::post().to(image_jobs::analyze_image))
                        .route(
                            "/yaml-to-prompt",
                            web::post().to(image_jobs::yaml_to_prompt),
                        )
                        .route("/{id}", web::get().to(image_jobs::get_image_job))
                        .route("/{id}", web::delete().to(image_jobs::delete_image_job))
                        .route(
                            "/{id}/rebuild",
                            web::post().to(image_jobs::rebuild_image_job),
                        ),
                )
                .service(
                    web::scope("/video-jobs")
                        .route("", web::get().to(video_jobs::list_video_jobs))
                        .route("", web::post().to(video_jobs::create_video_job))
                        .route(
                            "/external/{task_id}",
                            web::get().to(video_jobs::get_video_job_by_external_id),
                        )
                        .route("/{id}", web::get().to(video_jobs::get_video_job))
                        .route("/{id}", web::delete().to(video_jobs::delete_video_job))
                        .route("/{id}/retry", web::post().to(video_jobs::retry_video_job))
                        .route(
                            "/{id}/attempts",
                            web::get().to(video_jobs::list_video_job_attempts),
                        ),
                ),
        );
}

pub(crate) fn db_error(e: DbErr) -> actix_web::Error {
    log::error!("Database error: {}", e);
    error::ErrorInternalServerError("Database error")
}

pub(crate) fn parse_id(raw: &str, what: &str) -> Result<Uuid, actix_web::Error> {
    Uuid::parse_str(raw)
        .map_err(|e| error::ErrorBadRequest(format!("Invalid {} ID: {}", what, e)))
}

/// Resolve `skip`/`limit` query parameters into offset and page size
pub(crate) fn page_bounds(
    skip: Option<u64>,
    limit: Option<u64>,
) -> Result<(u64, u64), actix_web::Error> {
    let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
        return Err(error::ErrorBadRequest(format!(
            "limit must be between 1 and {}",
            MAX_PAGE_LIMIT
        )));
    }
    Ok((skip.unwrap_or(0), limit))
}

pub(crate) fn dispatch_error(e: DispatchError) -> actix_web::Error {
    match e {
        DispatchError::NotFound(_) => error::ErrorNotFound(e.to_string()),
        DispatchError::InvalidState(message) => error::ErrorBadRequest(message),
        DispatchError::Busy(_) => error::ErrorConflict(e.to_string()),
        DispatchError::Database(e) => db_error(e),
    }
}
