//! # Runtime Configuration Endpoints
//!
//! GET returns the effective configuration with the API credential redacted;
//! PUT applies a partial JSON update after revalidation.

use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Mask a credential for display: first four characters, then asterisks.
fn redact(secret: &str) -> String {
    if secret.is_empty() {
        "<not set>".to_string()
    } else if secret.len() <= 4 {
        "****".to_string()
    } else {
        format!("{}****", &secret[..4])
    }
}

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port,
                "debug": config.server.debug
            },
            "audio": {
                "sample_rate": config.audio.sample_rate,
                "frame_duration_ms": config.audio.frame_duration_ms,
                "silence_frame_threshold": config.audio.silence_frame_threshold
            },
            "services": {
                "api_key": redact(&config.services.api_key),
                "responder_model": config.services.responder_model,
                "transcriber_endpoint": config.services.transcriber_endpoint,
                "responder_endpoint": config.services.responder_endpoint,
                "synthesizer_endpoint": config.services.synthesizer_endpoint
            },
            "logging": {
                "level": config.logging.level
            }
        }
    })))
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config.update_from_json(&json_str).map_err(|e| {
        AppError::BadRequest(e.to_string())
    })?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::BadRequest)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": {
            "server": {
                "host": current_config.server.host,
                "port": current_config.server.port
            },
            "audio": {
                "sample_rate": current_config.audio.sample_rate,
                "frame_duration_ms": current_config.audio.frame_duration_ms,
                "silence_frame_threshold": current_config.audio.silence_frame_threshold
            }
        }
    })))
}
