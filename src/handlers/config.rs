use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Effective configuration with the API key redacted.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config().redacted();
    let pipeline = &state.pipeline;

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": serde_json::to_value(&config)?,
        "effective": {
            "unknown_format_policy": format!("{:?}", pipeline.policy()).to_lowercase(),
            "transcription_backend": pipeline.client().backend_name()
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::transcription::StaticTranscriber;
    use actix_web::{test, App};
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_api_key_is_never_returned() {
        let mut config = AppConfig::default();
        config.transcription.api_key = "sk-very-secret".to_string();
        let state = AppState::with_transcriber(config, Arc::new(StaticTranscriber::new(""))).unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/config", web::get().to(get_config)),
        )
        .await;
        let resp = test::call_service(&app, test::TestRequest::get().uri("/config").to_request()).await;
        assert!(resp.status().is_success());

        let body = test::read_body(resp).await;
        let text = String::from_utf8_lossy(&body);
        assert!(!text.contains("sk-very-secret"));

        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["config"]["transcription"]["api_key"], "***");
        assert_eq!(value["effective"]["unknown_format_policy"], "passthrough");
    }
}
