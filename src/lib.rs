pub mod allocator;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod items;
pub mod middleware;
pub mod routes;
pub mod structs;
pub mod token;
pub mod utils;

use std::time::Duration;

use actix_web::web;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};

use auth::AuthService;
use config::DatabaseConfig;
use errors::AppError;

#[derive(Debug, Clone)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub auth: AuthService,
    pub reset_token_ttl: Duration,
}

impl AppState {
    pub fn new(db_pool: SqlitePool, auth: AuthService) -> Self {
        Self {
            db_pool,
            auth,
            reset_token_ttl: Duration::from_secs(5 * 60),
        }
    }

    pub fn with_reset_token_ttl(mut self, ttl: Duration) -> Self {
        self.reset_token_ttl = ttl;
        self
    }
}

/// Opens the SQLite pool and applies pending migrations.
pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool, sqlx::Error> {
    let opts = config
        .url
        .parse::<SqliteConnectOptions>()?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .read_only(false)
        .busy_timeout(config.busy_timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(opts)
        .await?;

    sqlx::migrate!().run(&pool).await?;
    Ok(pool)
}

/// Registers the `/api` routes and the JSON error format.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        AppError::bad_request(format!("Invalid input: {}", err)).into()
    }))
    .app_data(web::QueryConfig::default().error_handler(|err, _req| {
        AppError::bad_request(format!("Invalid input: {}", err)).into()
    }))
    .app_data(web::PathConfig::default().error_handler(|err, _req| {
        AppError::bad_request(format!("Invalid path: {}", err)).into()
    }))
    .service(routes::api_scope());
}
