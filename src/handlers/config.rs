use crate::{error::AppResult, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Read-only view of the effective configuration.
pub async fn get_config(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let config = state.get_config();

    let strategies: Vec<String> = config.decoder.strategies().iter().map(ToString::to_string).collect();
    let mut decoder = serde_json::to_value(&config.decoder)?;
    decoder["strategies"] = json!(strategies);

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": serde_json::to_value(&config.server)?,
            "session": serde_json::to_value(&config.session)?,
            "decoder": decoder,
            "speech": serde_json::to_value(&config.speech)?,
            "storage": serde_json::to_value(&config.storage)?
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_get_config_lists_strategies_in_order() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_state()))
                .route("/api/v1/config", web::get().to(get_config)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/config").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["config"]["server"]["port"], 8000);
        assert_eq!(
            body["config"]["decoder"]["strategies"],
            json!(["webm", "webm/opus", "raw-s16le/16000Hz/1ch"])
        );
        assert_eq!(body["config"]["session"]["idle_timeout_secs"], 300);
        assert_eq!(body["config"]["decoder"]["alternate_codec"], "opus");
    }
}
