use actix_multipart::Multipart;
use actix_web::http::StatusCode;
use actix_web::{web, Error, HttpResponse};
use futures::{StreamExt, TryStreamExt};
use log::{error, info, warn};
use serde_json::json;
use shared::{ErrorResponse, LabelDescriptor};

use crate::analysis::{AnalysisError, AnalysisPipeline};
use crate::aggregator::AggregationError;
use crate::config::AppConfig;
use crate::gateway::{GatewayError, ImageUpload, UploadError};

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/predict").route(web::post().to(handle_predict)))
        .service(web::resource("/api/health").route(web::get().to(health)))
        .service(web::resource("/api/labels").route(web::get().to(list_labels)));
}

fn error_body(
    status: StatusCode,
    message: String,
    kind: &str,
    upstream_status: Option<u16>,
) -> HttpResponse {
    HttpResponse::build(status).json(ErrorResponse {
        error: message,
        kind: kind.to_string(),
        upstream_status,
    })
}

/// 5xx and transport problems mean "try again later", upstream 4xx means
/// the image was rejected, and a malformed body means the backend contract
/// changed. Each keeps its own status and `kind`.
pub fn analysis_error_status(err: &AnalysisError) -> StatusCode {
    match err {
        AnalysisError::Gateway(GatewayError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        AnalysisError::Gateway(GatewayError::UpstreamStatus { code, .. })
            if (400..500).contains(code) =>
        {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        AnalysisError::Gateway(GatewayError::Setup(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        AnalysisError::Gateway(_) => StatusCode::BAD_GATEWAY,
        AnalysisError::Aggregation(AggregationError::NoModels) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn analysis_error_response(err: &AnalysisError) -> HttpResponse {
    let message = match err {
        AnalysisError::Aggregation(_) => {
            "Analysis unavailable: the model backend returned no usable predictions".to_string()
        }
        AnalysisError::Gateway(e) => e.to_string(),
    };
    error_body(analysis_error_status(err), message, err.kind(), err.upstream_status())
}

fn upload_error_response(err: &UploadError) -> HttpResponse {
    let status = match err {
        UploadError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        UploadError::Empty | UploadError::UnsupportedFormat => StatusCode::BAD_REQUEST,
    };
    error_body(status, err.to_string(), err.kind(), None)
}

async fn handle_predict(
    pipeline: web::Data<AnalysisPipeline>,
    config: web::Data<AppConfig>,
    mut payload: Multipart,
) -> Result<HttpResponse, Error> {
    let max_bytes = config.max_upload_bytes;
    let mut image_data: Vec<u8> = Vec::new();
    let mut meta: Option<String> = None;

    while let Some(mut field) = payload.try_next().await? {
        let name = field.name().unwrap_or_default().to_string();
        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk?;
            if data.len() + chunk.len() > max_bytes {
                warn!("Rejecting upload field '{}' larger than {} bytes", name, max_bytes);
                return Ok(upload_error_response(&UploadError::TooLarge { limit: max_bytes }));
            }
            data.extend_from_slice(&chunk);
        }

        match name.as_str() {
            "file" => image_data = data,
            "meta" => match String::from_utf8(data) {
                Ok(text) => meta = Some(text),
                Err(_) => {
                    return Ok(error_body(
                        StatusCode::BAD_REQUEST,
                        "Metadata must be UTF-8 text".to_string(),
                        "invalid_meta",
                        None,
                    ));
                }
            },
            other => info!("Ignoring unexpected form field '{}'", other),
        }
    }

    let upload = match ImageUpload::new(image_data, meta, max_bytes) {
        Ok(upload) => upload,
        Err(e) => {
            warn!("Rejected upload: {}", e);
            return Ok(upload_error_response(&e));
        }
    };

    match pipeline.analyze(upload).await {
        Ok(result) => Ok(HttpResponse::Ok().json(result)),
        Err(e) => {
            error!("Analysis failed: {}", e);
            Ok(analysis_error_response(&e))
        }
    }
}

async fn health(pipeline: web::Data<AnalysisPipeline>) -> HttpResponse {
    match pipeline.backend_health().await {
        Ok(backend) => HttpResponse::Ok().json(json!({
            "status": "ok",
            "backend": backend,
        })),
        Err(e) => {
            warn!("Model backend health check failed: {}", e);
            HttpResponse::Ok().json(json!({
                "status": "ok",
                "backend": null,
                "backend_error": e.to_string(),
            }))
        }
    }
}

async fn list_labels(pipeline: web::Data<AnalysisPipeline>) -> HttpResponse {
    let labels: Vec<LabelDescriptor> = pipeline
        .registry()
        .entries()
        .iter()
        .map(|entry| entry.to_descriptor())
        .collect();
    HttpResponse::Ok().json(labels)
}
