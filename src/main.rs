//! EMR backend server entry point.

use std::path::Path;

use actix_cors::Cors;
use actix_files as fs;
use actix_web::{http::header, web, App, HttpServer};
use anyhow::Context;
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;

use emr::api::{self, middleware};
use emr::config::{self, Config};
use emr::db::{bootstrap, Database};
use emr::AppState;

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn cors(origins: &[String]) -> Cors {
    origins
        .iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allowed_headers(vec![header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .supports_credentials()
        .max_age(3600)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config = config::load_config().context("failed to load configuration")?;
    init_tracing(&config);

    if config.database.auto_create {
        match &config.database.admin_url {
            Some(admin_url) => bootstrap::ensure_database(admin_url, &config.database.url)
                .await
                .context("failed to provision database")?,
            None => warn!("database.auto_create is set without database.admin_url; skipping provisioning"),
        }
    }

    let database = Database::connect(&config.database)
        .await
        .context("failed to connect to database")?;
    database.run_migrations().await.context("failed to run migrations")?;

    let bind = (config.server.host.clone(), config.server.port);
    let workers = config.server.workers;
    let static_dir = config
        .server
        .static_dir
        .clone()
        .filter(|dir| Path::new(dir).is_dir());
    let origins = config.server.cors_origins.clone();
    let state = web::Data::new(AppState::new(database, config));

    info!(host = %bind.0, port = bind.1, "starting EMR backend");
    let mut server = HttpServer::new(move || {
        let app = App::new()
            .app_data(state.clone())
            .app_data(middleware::json_config())
            .app_data(middleware::query_config())
            .app_data(middleware::path_config())
            .wrap(cors(&origins))
            .wrap(TracingLogger::default())
            .configure(api::configure);
        match &static_dir {
            Some(dir) => app.service(fs::Files::new("/", dir).index_file("index.html")),
            None => app,
        }
    });
    if let Some(workers) = workers {
        server = server.workers(workers);
    }
    server.bind(bind)?.run().await?;
    Ok(())
}
