use std::io::LineWriter;
use std::path::Path;
use std::{env, fs::OpenOptions, io};

use actix_cors::Cors;
use actix_web::{http, web, App, HttpServer};

use ticket_stream_service::config;
use ticket_stream_service::config::db::Databases;

/// Application entry point: configures logging, opens the two
/// database pools (`TICKETS_DATABASE_URL`, `TICKETS_REAL_DATABASE_URL`),
/// configures CORS, and runs the Actix server until shutdown.
#[actix_rt::main]
async fn main() -> io::Result<()> {
    if let Err(e) = dotenv::dotenv() {
        match e {
            dotenv::Error::Io(io_err) if io_err.kind() == std::io::ErrorKind::NotFound => {
                log::warn!(".env file not found, environment variables will be read from system environment");
            }
            _ => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("Failed to read .env file: {}", e),
                ));
            }
        }
    }
    env::set_var("RUST_LOG", "actix_web=info");

    if let Ok(log_file_path) = env::var("LOG_FILE") {
        let path = Path::new(&log_file_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file_path)?;
        env_logger::Builder::from_default_env()
            .target(env_logger::Target::Pipe(Box::new(LineWriter::new(
                log_file,
            ))))
            .init();
    } else {
        env_logger::init();
    }

    let app_host = env::var("APP_HOST").map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("APP_HOST not found: {}", e),
        )
    })?;
    let app_port = env::var("APP_PORT").map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("APP_PORT not found: {}", e),
        )
    })?;
    let app_url = format!("{}:{}", &app_host, &app_port);

    let tickets_db_url = env::var("TICKETS_DATABASE_URL").map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("TICKETS_DATABASE_URL not found: {}", e),
        )
    })?;
    let tickets_real_db_url = env::var("TICKETS_REAL_DATABASE_URL").map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("TICKETS_REAL_DATABASE_URL not found: {}", e),
        )
    })?;

    let pool_size = env::var("DATABASE_POOL_SIZE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(config::db::DEFAULT_POOL_SIZE);

    let tickets_pool = config::db::init_pool(&tickets_db_url, pool_size).map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::Other, format!("tickets pool: {e}"))
    })?;
    let tickets_real_pool = config::db::init_pool(&tickets_real_db_url, pool_size).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("tickets_real pool: {e}"),
        )
    })?;

    let databases = Databases::new(tickets_pool, tickets_real_pool);

    HttpServer::new(move || {
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let mut cors_builder = if app_env == "production" {
            let mut builder = Cors::default();
            if let Ok(allowed_origins) = env::var("CORS_ALLOWED_ORIGINS") {
                for origin in allowed_origins
                    .split(',')
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                {
                    builder = builder.allowed_origin(origin);
                }
            } else {
                builder = builder.allowed_origin("http://localhost:3000");
            }
            builder
        } else {
            Cors::default()
                .send_wildcard()
                .allowed_origin("http://localhost:3000")
                .allowed_origin("http://127.0.0.1:3000")
        };

        cors_builder = cors_builder
            .allowed_methods(vec![http::Method::GET, http::Method::POST])
            .allowed_headers(vec![http::header::ACCEPT, http::header::CONTENT_TYPE])
            .max_age(3600);

        App::new()
            .wrap(cors_builder)
            .app_data(web::Data::new(databases.clone()))
            .wrap(actix_web::middleware::Logger::default())
            .configure(config::app::config_services)
    })
    .bind(&app_url)?
    .run()
    .await
}
