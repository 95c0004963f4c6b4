use actix_web::{web, HttpResponse, Responder};
use sea_orm::DatabaseConnection;

/// GET /
pub async fn root() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "message": "Image to Video API",
        "version": env!("CARGO_PKG_VERSION"),
        "api": "/api/v1",
    }))
}

/// GET /health
/// Reports unhealthy when the database does not answer
pub async fn health(db: web::Data<DatabaseConnection>) -> impl Responder {
    match db.ping().await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({ "status": "healthy" })),
        Err(e) => {
            log::warn!("Health check failed: {}", e);
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "status": "unhealthy",
                "database": "unreachable",
            }))
        }
    }
}
