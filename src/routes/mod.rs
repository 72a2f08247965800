use axum::{routing::get, Router};
use serde_json::{Map, Value};

use crate::state::AppState;

pub mod apartments;
pub mod bills;
pub mod health;
pub mod owners;
pub mod reports;
pub mod rooms;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(apartments::router())
        .merge(rooms::router())
        .merge(owners::router())
        .merge(bills::router())
        .merge(reports::router())
}

pub(crate) fn json_map(entries: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in entries {
        map.insert((*key).to_string(), value.clone());
    }
    map
}

pub(crate) fn non_empty_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}

/// The `id` column of a returned row, empty when absent.
pub(crate) fn record_id(row: &Value) -> String {
    row.get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Attaches a relation id list to a row under `key`.
pub(crate) fn with_ids(mut row: Value, key: &str, ids: Vec<String>) -> Value {
    if let Some(object) = row.as_object_mut() {
        object.insert(
            key.to_string(),
            Value::Array(ids.into_iter().map(Value::String).collect()),
        );
    }
    row
}

#[cfg(test)]
mod tests {
    use super::{json_map, non_empty_opt, record_id, v1_router, with_ids};
    use crate::{config::AppConfig, state::AppState};
    use axum::body::{to_bytes, Body};
    use http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    async fn call(method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let state = AppState::build(AppConfig::for_tests()).expect("offline state");
        let app = v1_router().with_state(state);
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_missing_database() {
        let (status, body) = call("GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("degraded"));
        assert_eq!(body["db"], json!(false));
    }

    #[tokio::test]
    async fn report_parameters_are_checked_before_any_query() {
        let (status, body) = call("GET", "/reports/monthly?month=13&year=2024", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("month"));

        let (status, _) = call("GET", "/reports/monthly?month=3", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call("GET", "/reports/monthly?month=3&year=2024", None).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn persistence_routes_need_a_database() {
        let (status, body) = call("GET", "/apartments", None).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().unwrap().contains("DATABASE_URL"));
    }

    #[test]
    fn reads_created_row_ids() {
        assert_eq!(record_id(&json!({ "id": "b1", "grand_total": "10" })), "b1");
        assert_eq!(record_id(&json!({ "name": "no id" })), "");
    }

    #[test]
    fn attaches_relation_ids() {
        let row = with_ids(json!({ "id": "o1" }), "apartment_ids", vec!["a1".to_string()]);
        assert_eq!(row, json!({ "id": "o1", "apartment_ids": ["a1"] }));
    }

    #[test]
    fn builds_filter_maps() {
        let map = json_map(&[("room_id", Value::String("r1".to_string()))]);
        assert_eq!(map.get("room_id"), Some(&json!("r1")));
        assert_eq!(non_empty_opt(Some("  ")), None);
        assert_eq!(non_empty_opt(Some(" x ")), Some("x".to_string()));
    }
}
