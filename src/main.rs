use std::time::Duration;

use actix_web::{middleware, web::Data, App, HttpServer};
use log::info;

use schwiftybox::{auth::AuthService, config::Config, db, AppState};

const RESET_TOKEN_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::from_env().map_err(|e| {
        log::error!("FATAL: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
    })?;

    if config.jwt.uses_default_secret() {
        log::warn!("JWT_SECRET is not set, falling back to the built-in development secret");
    }

    let db_pool = schwiftybox::connect(&config.database)
        .await
        .map_err(|e| {
            log::error!("FATAL: could not open database {}: {}", config.database.url, e);
            std::io::Error::new(std::io::ErrorKind::Other, e)
        })?;

    info!("Database migrated successfully");

    let auth = AuthService::new(db_pool.clone(), &config.jwt);
    let state = Data::new(
        AppState::new(db_pool.clone(), auth).with_reset_token_ttl(config.reset_token_ttl),
    );

    actix_web::rt::spawn(async move {
        let mut interval = actix_web::rt::time::interval(RESET_TOKEN_CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            match db::cleanup_expired_reset_tokens(&db_pool).await {
                Ok(0) => {}
                Ok(removed) => info!("Removed {} expired reset tokens", removed),
                Err(e) => log::error!("Failed to clean up reset tokens: {}", e),
            }
        }
    });

    let host = config.server.host.clone();
    let port = config.server.port;
    info!("Starting HTTP server on http://{}:{}/", host, port);

    HttpServer::new(move || {
        App::new()
            // enable automatic response compression - usually register this first
            .wrap(middleware::Compress::default())
            // enable logger - always register Actix Web Logger middleware last
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(schwiftybox::configure)
    })
    .bind((host, port))?
    .run()
    .await
}
