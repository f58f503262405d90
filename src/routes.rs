//! Route table shared by the binary and the integration tests.

use crate::{handlers, health, websocket};
use actix_web::web;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics))
            .route("/config", web::get().to(handlers::get_config))
            .route("/connections", web::get().to(health::list_connections)),
    )
    // Also provide health check at root level for convenience
    .route("/health", web::get().to(health::health_check))
    .route("/ws", web::get().to(websocket::relay_websocket))
    .route("/static/{file}", web::get().to(handlers::static_file))
    .route("/", web::get().to(handlers::index));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::AppState;
    use actix_web::{http::StatusCode, test, App};

    #[actix_web::test]
    async fn test_http_routes_are_mounted() {
        let state = web::Data::new(AppState::new(AppConfig::default()).unwrap());
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        for uri in ["/", "/health", "/api/v1/health", "/api/v1/metrics", "/api/v1/config", "/api/v1/connections", "/static/websocket.js"] {
            let resp = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
            assert_eq!(resp.status(), StatusCode::OK, "GET {}", uri);
        }
    }
}
