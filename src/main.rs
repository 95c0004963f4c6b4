mod handlers;
mod models;
mod services;
mod utils;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use services::job_engine::{EngineSettings, JobEngine};
use services::providers::{ImageProvider, KlingClient, OpenAiClient, VideoProvider};
use utils::{
    config::Config,
    db::{ensure_schema, establish_connection},
    http_client::create_http_client,
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file FIRST before anything else
    dotenv::dotenv().ok();

    // Initialize logger with default level if RUST_LOG not set
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("=================================================");
    println!("🎬 img2video Backend Server");
    println!("=================================================");

    // Load configuration
    let config = Config::from_env().map_err(to_io_error)?;
    let host = config.host.clone();
    let port = config.port;

    println!("📝 Configuration loaded:");
    println!(
        "   - Database: {}",
        config.database_url.split('@').last().unwrap_or("***")
    );
    println!("   - Host: {}", host);
    println!("   - Port: {}", port);
    println!("   - Image provider: {}", config.openai_base_url);
    println!("   - Video provider: {}", config.kling_base_url);
    println!(
        "   - Video polling: every {}s, at most {} checks",
        config.video_poll_interval_secs, config.video_max_poll_attempts
    );
    println!("   - Concurrent jobs: {}", config.max_concurrent_jobs);
    println!(
        "   - Log level: {}",
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string())
    );

    // Establish database connection
    print!("🔌 Connecting to database... ");
    let db = establish_connection(&config.database_url)
        .await
        .map_err(to_io_error)?;
    println!("✅ Connected!");

    ensure_schema(&db).await.map_err(to_io_error)?;
    log::info!("Database connection established and schema ready");

    // Provider clients share one HTTP connection pool
    let http_client = create_http_client().map_err(to_io_error)?;
    let image_provider: Arc<dyn ImageProvider> = Arc::new(OpenAiClient::new(
        http_client.clone(),
        config.openai_api_key.clone(),
        config.openai_base_url.clone(),
    ));
    let kling: Arc<dyn VideoProvider> = Arc::new(KlingClient::new(
        http_client,
        config.kling_access_key.clone(),
        config.kling_secret_key.clone(),
        config.kling_base_url.clone(),
    ));

    let engine = JobEngine::new(
        db.clone(),
        image_provider.clone(),
        kling,
        EngineSettings::from_config(&config),
    );

    // Pick up jobs a previous process left unfinished
    if config.recover_jobs_on_startup {
        match engine.recover_interrupted_jobs().await {
            Ok(count) => log::info!("Startup recovery dispatched {} jobs", count),
            Err(e) => log::error!("Startup recovery failed: {}", e),
        }
    }

    // Start HTTP server
    println!("🌐 Starting HTTP server at http://{}:{}", host, port);
    println!("📍 Available endpoints:");
    println!("   - GET  http://{}:{}/health", host, port);
    println!("   - *    http://{}:{}/api/v1/rows", host, port);
    println!("   - *    http://{}:{}/api/v1/image-jobs", host, port);
    println!("   - *    http://{}:{}/api/v1/video-jobs", host, port);
    println!("=================================================");

    log::info!("Server started at http://{}:{}", host, port);

    let image_provider = web::Data::from(image_provider);
    let engine = web::Data::new(engine);
    let cors_origins = config.cors_origins.clone();

    HttpServer::new(move || {
        let mut cors = Cors::default()
            .allowed_methods(vec!["GET", "POST", "PATCH", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                actix_web::http::header::AUTHORIZATION,
                actix_web::http::header::ACCEPT,
                actix_web::http::header::CONTENT_TYPE,
            ])
            .max_age(3600);
        for origin in &cors_origins {
            cors = if origin == "*" {
                cors.allow_any_origin()
            } else {
                cors.allowed_origin(origin)
            };
        }

        App::new()
            .app_data(web::Data::new(db.clone()))
            .app_data(engine.clone())
            .app_data(image_provider.clone())
            .wrap(Logger::default())
            .wrap(cors) // CORS must be wrapped AFTER Logger to ensure headers are added to all responses
            .configure(handlers::configure)
    })
    .bind((host, port))?
    .run()
    .await
}

fn to_io_error<E: std::fmt::Display>(e: E) -> std::io::Error {
    log::error!("Startup failed: {}", e);
    std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
}
