use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

pub async fn welcome() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "message": "Welcome to the Voice Streaming API"
    }))
}

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "active_connections": metrics.active_connections,
            "sessions_started": metrics.sessions_started,
            "sessions_completed": metrics.sessions_completed
        },
        "memory": get_memory_info(),
        "speech": {
            "transcriber": {
                "adapter": state.pipeline.transcriber_name(),
                "url": config.speech.transcriber_url
            },
            "synthesizer": {
                "adapter": state.pipeline.synthesizer_name(),
                "url": config.speech.synthesizer_url,
                "fallback_url": config.speech.fallback_synthesizer_url
            }
        },
        "storage": {
            "enabled": config.storage.enabled,
            "recordings_dir": config.storage.recordings_dir
        }
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

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
        "voice": {
            "active_connections": metrics.active_connections,
            "sessions_started": metrics.sessions_started,
            "sessions_completed": metrics.sessions_completed,
            "decode_failures": metrics.decode_failures,
            "rejected_fragments": metrics.rejected_fragments,
            "ignored_controls": metrics.ignored_controls,
            "connection_timeouts": metrics.connection_timeouts
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info()
    }))
}

fn get_memory_info() -> serde_json::Value {
    let pid = process::id();

    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let mut vm_rss = 0;
            let mut vm_size = 0;

            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmRSS:") {
                    vm_rss = parse_kb(rest);
                } else if let Some(rest) = line.strip_prefix("VmSize:") {
                    vm_size = parse_kb(rest);
                }
            }

            return json!({
                "resident_memory_bytes": vm_rss,
                "virtual_memory_bytes": vm_size,
                "available": true
            });
        }
    }

    let _ = pid;
    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

/// "  12345 kB" -> bytes
fn parse_kb(field: &str) -> u64 {
    field
        .split_whitespace()
        .next()
        .and_then(|kb| kb.parse::<u64>().ok())
        .unwrap_or(0)
        * 1024
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;
    use actix_web::{test as web_test, App};

    #[test]
    fn test_parse_kb() {
        assert_eq!(parse_kb("    2048 kB"), 2048 * 1024);
        assert_eq!(parse_kb("garbage"), 0);
    }

    #[actix_web::test]
    async fn test_health_reports_voice_counters() {
        let state = test_state();
        state.connection_opened();
        state.record_session_started();

        let app = web_test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = web_test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = web_test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["metrics"]["active_connections"], 1);
        assert_eq!(body["metrics"]["sessions_started"], 1);
        assert_eq!(body["speech"]["transcriber"]["adapter"], "silent");
    }

    #[actix_web::test]
    async fn test_welcome_message() {
        let app = web_test::init_service(App::new().route("/", web::get().to(welcome))).await;
        let req = web_test::TestRequest::get().uri("/").to_request();
        let body: serde_json::Value = web_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["message"], "Welcome to the Voice Streaming API");
    }
}
