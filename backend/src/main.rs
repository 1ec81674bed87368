mod aggregator;
mod analysis;
mod config;
mod gateway;
mod labels;
mod normalizer;
mod risk;
mod routes;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use analysis::AnalysisPipeline;
use config::AppConfig;
use gateway::InferenceGateway;
use labels::LabelRegistry;
use routes::configure_routes;
use std::sync::Arc;

fn build_cors(allowed_origins: &[String]) -> Cors {
    let mut cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allowed_headers(vec![
            actix_web::http::header::AUTHORIZATION,
            actix_web::http::header::ACCEPT,
            actix_web::http::header::CONTENT_TYPE,
        ])
        .max_age(3600);

    if allowed_origins.iter().any(|origin| origin == "*") {
        cors = cors.allow_any_origin();
    } else {
        for origin in allowed_origins {
            cors = cors.allowed_origin(origin);
        }
    }
    cors
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = AppConfig::from_env().map_err(|e| {
        log::error!("Server misconfigured: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    let registry = LabelRegistry::load(config.labels_path.as_deref()).map_err(|e| {
        log::error!("Failed to load label registry: {}", e);
        std::io::Error::other(format!("Label registry error: {}", e))
    })?;
    log::info!("Loaded {} lesion classes", registry.len());
    let registry = Arc::new(registry);

    let gateway = InferenceGateway::new(&config.backend_url, config.request_timeout).map_err(|e| {
        log::error!("Failed to create inference gateway: {}", e);
        std::io::Error::other(format!("Gateway error: {}", e))
    })?;
    log::info!(
        "Forwarding analyses to {} (timeout {:?})",
        gateway.predict_url(),
        gateway.timeout()
    );

    let pipeline = AnalysisPipeline::new(gateway, registry);
    let bind_address = config.bind_address();
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(build_cors(&config.cors_allow_origins))
            .app_data(web::Data::new(pipeline.clone()))
            .app_data(web::Data::new(config.clone()))
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
