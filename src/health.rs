use crate::config::AppConfig;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Liveness plus the live connection count.
///
/// `connections` is read from the registry at request time, so it always equals
/// the number of open sessions.
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();
    let connections = state.active_connections();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "connections": connections,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "transcription": {
            "backend": state.pipeline.client().backend_name(),
            "available_permits": state.pipeline.client().available_permits()
        },
        "system": get_system_status(&config, connections)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let config = state.get_config();

    let mut endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();
    endpoint_stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "streaming": {
            "active_connections": state.active_connections(),
            "connections_total": metrics.connections_total,
            "chunks_received": metrics.chunks_received,
            "chunks_transcribed": metrics.chunks_transcribed,
            "chunks_failed": metrics.chunks_failed
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info(),
        "performance": {
            "max_connections": config.performance.max_connections,
            "max_concurrent_transcriptions": config.performance.max_concurrent_transcriptions
        }
    }))
}

/// Registry snapshot, oldest connection first.
pub async fn list_connections(state: web::Data<AppState>) -> HttpResponse {
    let connections = state.registry.snapshot();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "count": connections.len(),
        "connections": connections
    }))
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        let pid = std::process::id();
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let read_kb = |prefix: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(prefix))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .unwrap_or(0)
                    * 1024
            };

            return json!({
                "resident_memory_bytes": read_kb("VmRSS:"),
                "virtual_memory_bytes": read_kb("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

fn get_system_status(config: &AppConfig, connections: usize) -> serde_json::Value {
    let max_connections = config.performance.max_connections;
    let usage = if max_connections > 0 {
        connections as f64 / max_connections as f64
    } else {
        0.0
    };

    let status = if usage > 0.9 {
        "high_load"
    } else if usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "connection_usage_percent": (usage * 100.0).round(),
        "max_connections": max_connections,
        "current_connections": connections
    })
}
