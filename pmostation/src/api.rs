//! API REST pour le contrôle des stations.
//!
//! Le routeur est destiné à être monté sous `/api/stations` :
//!
//! | Méthode | Chemin          | Effet                          |
//! |---------|-----------------|--------------------------------|
//! | GET     | `/`             | liste (statuts rafraîchis)     |
//! | POST    | `/`             | création                       |
//! | GET     | `/{id}`         | détail                         |
//! | POST    | `/{id}/start`   | démarrage (idempotent)         |
//! | POST    | `/{id}/stop`    | arrêt (idempotent, borné)      |

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::error::{Error, FieldIssue};
use crate::station::{Station, StationDefinition};
use crate::supervisor::StationSupervisor;

/// Router `/api/stations`.
pub fn station_api_router(supervisor: Arc<StationSupervisor>) -> Router {
    Router::new()
        .route("/", get(list_stations).post(create_station))
        .route("/{station_id}", get(get_station))
        .route("/{station_id}/start", post(start_station))
        .route("/{station_id}/stop", post(stop_station))
        .with_state(supervisor)
}

/// Réponse d'erreur REST générique.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    /// Champs rejetés (erreurs de validation uniquement)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldIssue>>,
}

#[utoipa::path(
    get,
    path = "/api/stations",
    tag = "stations",
    responses(
        (status = 200, description = "Toutes les stations, statuts rafraîchis", body = [Station])
    )
)]
pub async fn list_stations(State(supervisor): State<Arc<StationSupervisor>>) -> Response {
    match supervisor.list().await {
        Ok(stations) => (StatusCode::OK, Json(stations)).into_response(),
        Err(err) => map_error(err),
    }
}

#[utoipa::path(
    post,
    path = "/api/stations",
    tag = "stations",
    request_body = StationDefinition,
    responses(
        (status = 201, description = "Station créée", body = Station),
        (status = 400, description = "Définition invalide", body = ErrorResponse)
    )
)]
pub async fn create_station(
    State(supervisor): State<Arc<StationSupervisor>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    // Corps illisible : même format de réponse qu'une erreur de validation
    let payload = match payload {
        Ok(Json(payload)) => payload,
        Err(rejection) => {
            return map_error(Error::invalid(vec![FieldIssue::new(
                "body",
                rejection.body_text(),
            )]))
        }
    };

    let definition = match StationDefinition::from_json(payload) {
        Ok(definition) => definition,
        Err(err) => return map_error(err),
    };

    match supervisor.add(definition).await {
        Ok(station) => (StatusCode::CREATED, Json(station)).into_response(),
        Err(err) => map_error(err),
    }
}

#[utoipa::path(
    get,
    path = "/api/stations/{station_id}",
    tag = "stations",
    params(
        ("station_id" = String, Path, description = "Identifiant de la station")
    ),
    responses(
        (status = 200, description = "Station", body = Station),
        (status = 404, description = "Station introuvable", body = ErrorResponse)
    )
)]
pub async fn get_station(
    State(supervisor): State<Arc<StationSupervisor>>,
    Path(station_id): Path<String>,
) -> Response {
    match supervisor.get(&station_id).await {
        Some(station) => (StatusCode::OK, Json(station)).into_response(),
        None => map_error(Error::StationNotFound(station_id)),
    }
}

#[utoipa::path(
    post,
    path = "/api/stations/{station_id}/start",
    tag = "stations",
    params(
        ("station_id" = String, Path, description = "Identifiant de la station")
    ),
    responses(
        (status = 200, description = "Station démarrée (ou déjà en cours)", body = Station),
        (status = 400, description = "Champs de station inutilisables", body = ErrorResponse),
        (status = 404, description = "Station introuvable", body = ErrorResponse),
        (status = 502, description = "Échec du lancement de l'encodeur", body = ErrorResponse)
    )
)]
pub async fn start_station(
    State(supervisor): State<Arc<StationSupervisor>>,
    Path(station_id): Path<String>,
) -> Response {
    match supervisor.start(&station_id).await {
        Ok(station) => (StatusCode::OK, Json(station)).into_response(),
        Err(err) => map_error(err),
    }
}

#[utoipa::path(
    post,
    path = "/api/stations/{station_id}/stop",
    tag = "stations",
    params(
        ("station_id" = String, Path, description = "Identifiant de la station")
    ),
    responses(
        (status = 200, description = "Station arrêtée (ou déjà arrêtée)", body = Station),
        (status = 404, description = "Station introuvable", body = ErrorResponse),
        (status = 502, description = "Échec du signal ou de l'attente de l'encodeur ; station marquée arrêtée", body = ErrorResponse),
        (status = 504, description = "L'encodeur n'est pas sorti dans le délai ; station marquée arrêtée", body = ErrorResponse)
    )
)]
pub async fn stop_station(
    State(supervisor): State<Arc<StationSupervisor>>,
    Path(station_id): Path<String>,
) -> Response {
    match supervisor.stop(&station_id).await {
        Ok(station) => (StatusCode::OK, Json(station)).into_response(),
        Err(err) => map_error(err),
    }
}

fn map_error(error: Error) -> Response {
    let (status, kind) = match &error {
        Error::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
        Error::StationNotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        Error::StreamStart { .. } => (StatusCode::BAD_GATEWAY, "STREAM_START_ERROR"),
        Error::StreamStopTimeout { .. } => {
            (StatusCode::GATEWAY_TIMEOUT, "STREAM_STOP_TIMEOUT")
        }
        Error::StreamStop { .. } => (StatusCode::BAD_GATEWAY, "STREAM_STOP_ERROR"),
        Error::ProcessAlreadyRegistered(_) => (StatusCode::CONFLICT, "ALREADY_RUNNING"),
        Error::CorruptStore { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "CORRUPT_STORE"),
        Error::Persistence { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "PERSISTENCE_ERROR"),
    };

    if status.is_server_error() {
        tracing::error!(error = %error, "Station API request failed");
    }

    (
        status,
        Json(ErrorResponse {
            error: kind.to_string(),
            message: error.to_string(),
            fields: error.field_issues().map(<[FieldIssue]>::to_vec),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::SupervisorConfig;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    async fn router() -> (tempfile::TempDir, Router) {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = StationSupervisor::load(SupervisorConfig::new(
            dir.path().join("stations.json"),
        ))
        .await
        .unwrap();
        (dir, station_api_router(Arc::new(supervisor)))
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(v) => Body::from(v.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn payload() -> Value {
        json!({
            "name": "Lounge",
            "playlist_id": "pl-42",
            "playlist_name": "Lounge classics",
            "port": "8000",
            "mountpoint": "lounge",
            "shoutcast": {
                "user": "source",
                "password": "hackme",
                "host": "localhost",
                "bitrate": "128k"
            }
        })
    }

    #[tokio::test]
    async fn test_create_start_stop_cycle() {
        let (_dir, router) = router().await;

        let (status, created) = call(&router, "POST", "/", Some(payload())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "stopped");
        assert_eq!(created["port"], 8000);
        let id = created["id"].as_str().unwrap().to_string();

        let (status, started) = call(&router, "POST", &format!("/{}/start", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(started["status"], "running");
        assert_eq!(started["pid"], Value::Null);

        let (status, listed) = call(&router, "GET", "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert_eq!(listed[0]["status"], "running");

        let (status, stopped) = call(&router, "POST", &format!("/{}/stop", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stopped["status"], "stopped");

        let (status, fetched) = call(&router, "GET", &format!("/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["status"], "stopped");
    }

    #[tokio::test]
    async fn test_validation_error_lists_fields() {
        let (_dir, router) = router().await;

        let (status, body) = call(&router, "POST", "/", Some(json!({"name": "X"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "VALIDATION_ERROR");
        let fields: Vec<&str> = body["fields"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["field"].as_str().unwrap())
            .collect();
        assert!(fields.contains(&"playlist_id"));
        assert!(fields.contains(&"shoutcast"));

        let (_, listed) = call(&router, "GET", "/", None).await;
        assert!(listed.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrongly_typed_fields_are_validation_errors() {
        let (_dir, router) = router().await;

        for (payload, field) in [
            (json!({"name": "X", "port": true}), "port"),
            (json!({"name": 5}), "name"),
            (json!({"name": "X", "shoutcast": "nope"}), "shoutcast"),
        ] {
            let (status, body) = call(&router, "POST", "/", Some(payload.clone())).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", payload);
            assert_eq!(body["error"], "VALIDATION_ERROR");
            let issue = body["fields"]
                .as_array()
                .unwrap()
                .iter()
                .find(|f| f["field"] == field)
                .unwrap_or_else(|| panic!("no issue for {} in {}", field, body));
            assert_ne!(issue["message"], "missing");
        }

        let (_, listed) = call(&router, "GET", "/", None).await;
        assert!(listed.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_body_is_validation_error() {
        let (_dir, router) = router().await;

        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from("{ not json"))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "VALIDATION_ERROR");
        assert_eq!(body["fields"][0]["field"], "body");
    }

    #[test]
    fn test_stop_failures_keep_their_own_status() {
        let failed = map_error(Error::StreamStop {
            station_id: "st-1".into(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        });
        assert_eq!(failed.status(), StatusCode::BAD_GATEWAY);

        let timed_out = map_error(Error::StreamStopTimeout {
            station_id: "st-1".into(),
            timeout: std::time::Duration::from_secs(1),
        });
        assert_eq!(timed_out.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_unknown_station_is_404() {
        let (_dir, router) = router().await;

        for (method, uri) in [
            ("GET", "/missing"),
            ("POST", "/missing/start"),
            ("POST", "/missing/stop"),
        ] {
            let (status, body) = call(&router, method, uri, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{} {}", method, uri);
            assert_eq!(body["error"], "NOT_FOUND");
            assert!(body.get("fields").is_none());
        }
    }
}
