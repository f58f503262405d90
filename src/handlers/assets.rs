//! Browser test client, compiled into the binary.

use crate::error::AppError;
use actix_web::{web, HttpResponse};

const INDEX_HTML: &str = include_str!("../../static/index.html");
const WEBSOCKET_JS: &str = include_str!("../../static/websocket.js");

/// (file name, content type, body) of every servable static asset.
const STATIC_FILES: &[(&str, &str, &str)] = &[("websocket.js", "text/javascript; charset=utf-8", WEBSOCKET_JS)];

pub async fn index() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(INDEX_HTML)
}

pub async fn static_file(path: web::Path<String>) -> Result<HttpResponse, AppError> {
    let name = path.into_inner();

    STATIC_FILES
        .iter()
        .find(|(file, _, _)| *file == name)
        .map(|(_, content_type, body)| HttpResponse::Ok().content_type(*content_type).body(*body))
        .ok_or_else(|| AppError::NotFound(format!("static file '{}' does not exist", name)))
}
