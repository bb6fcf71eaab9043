use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use cqrs_es::EventStore;
use domain::droppers::{
    inputs::{CreateScheduleInput, CreateSectionInput, RegisterDropperInput, ReloadSectionInput},
    Dropper, Inventory,
};
use domain::ErrorKind;
use serde_json::json;

type Shared<ES> = State<Arc<Inventory<ES>>>;

pub fn router<ES>(inventory: Arc<Inventory<ES>>) -> Router
where
    ES: EventStore<Dropper> + 'static,
    ES::AC: Send,
{
    Router::new()
        .route("/health_check/up", get(health_check))
        .route("/api/droppers", post(register_dropper::<ES>))
        .route(
            "/api/droppers/:id",
            get(get_dropper::<ES>).delete(remove_dropper::<ES>),
        )
        .route("/api/droppers/:id/activate", post(activate_dropper::<ES>))
        .route("/api/droppers/:id/sections", post(create_section::<ES>))
        .route(
            "/api/droppers/:id/sections/reload",
            post(reload_section::<ES>),
        )
        .route(
            "/api/droppers/:id/sections/:section/positions",
            get(section_positions::<ES>),
        )
        .route("/api/droppers/:id/schedules", post(create_schedule::<ES>))
        .with_state(inventory)
}

/// Domain error rendered as a JSON body with the matching status code.
pub struct ApiError(domain::Error);

impl From<domain::Error> for ApiError {
    fn from(err: domain::Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict | ErrorKind::Capacity => StatusCode::CONFLICT,
            ErrorKind::Store => StatusCode::SERVICE_UNAVAILABLE,
        };
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        }

        let body = json!({
            "status": status.as_u16(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "UP" }))
}

async fn register_dropper<ES: EventStore<Dropper>>(
    State(inventory): Shared<ES>,
    Json(input): Json<RegisterDropperInput>,
) -> Result<impl IntoResponse, ApiError> {
    let dropper = inventory.register_dropper(input).await?;
    Ok((StatusCode::CREATED, Json(dropper)))
}

async fn get_dropper<ES: EventStore<Dropper>>(
    Path(id): Path<String>,
    State(inventory): Shared<ES>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(inventory.load(&id).await?))
}

async fn remove_dropper<ES: EventStore<Dropper>>(
    Path(id): Path<String>,
    State(inventory): Shared<ES>,
) -> Result<impl IntoResponse, ApiError> {
    inventory.remove_dropper(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn activate_dropper<ES: EventStore<Dropper>>(
    Path(id): Path<String>,
    State(inventory): Shared<ES>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(inventory.activate_dropper(&id).await?))
}

async fn create_section<ES: EventStore<Dropper>>(
    Path(id): Path<String>,
    State(inventory): Shared<ES>,
    Json(input): Json<CreateSectionInput>,
) -> Result<impl IntoResponse, ApiError> {
    let section_id = inventory.create_section(&id, input).await?;
    Ok((StatusCode::CREATED, Json(json!({ "section_id": section_id }))))
}

async fn reload_section<ES: EventStore<Dropper>>(
    Path(id): Path<String>,
    State(inventory): Shared<ES>,
    Json(input): Json<ReloadSectionInput>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(inventory.reload_section(&id, input).await?))
}

async fn section_positions<ES: EventStore<Dropper>>(
    Path((id, section)): Path<(String, u8)>,
    State(inventory): Shared<ES>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(inventory.section_positions(&id, section).await?))
}

async fn create_schedule<ES: EventStore<Dropper>>(
    Path(id): Path<String>,
    State(inventory): Shared<ES>,
    Json(input): Json<CreateScheduleInput>,
) -> Result<impl IntoResponse, ApiError> {
    let schedule_id = inventory.create_schedule(&id, input).await?;
    Ok((StatusCode::CREATED, Json(json!({ "schedule_id": schedule_id }))))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request},
    };
    use cqrs_es::mem_store::MemStore;
    use domain::droppers::{cqrs, MemScheduleIndex};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;

    fn app() -> Router {
        let inventory = cqrs::inventory(
            cqrs::mem_store(),
            cqrs::init_mem_repo(),
            Arc::new(MemScheduleIndex::default()),
        );
        router::<MemStore<Dropper>>(Arc::new(inventory))
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn registered(app: &Router) -> String {
        let (status, dropper) = call(
            app,
            Method::POST,
            "/api/droppers",
            Some(json!({ "name": "Kitchen" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        dropper["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_check_is_up() {
        let (status, body) = call(&app(), Method::GET, "/health_check/up", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "UP");
    }

    #[tokio::test]
    async fn section_lifecycle_over_http() {
        let app = app();
        let id = registered(&app).await;

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("/api/droppers/{}/sections", id),
            Some(json!({ "name": "A", "pills": { "Aspirin": 2 } })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["section_id"].is_string());

        let (status, dropper) = call(
            &app,
            Method::POST,
            &format!("/api/droppers/{}/sections/reload", id),
            Some(json!({ "section": 1, "pill_name": "Brufen", "quantity": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(dropper["sections"][0]["positions"].as_array().unwrap().len(), 3);

        let (status, positions) = call(
            &app,
            Method::GET,
            &format!("/api/droppers/{}/sections/1/positions", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(positions[2]["pill_name"], "Brufen");
    }

    #[tokio::test]
    async fn domain_errors_map_to_status_codes() {
        let app = app();

        let (status, body) = call(&app, Method::GET, "/api/droppers/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], 404);

        let id = registered(&app).await;
        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/api/droppers/{}/sections/reload", id),
            Some(json!({ "section": 1, "pill_name": "Brufen", "quantity": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/api/droppers/{}/sections", id),
            Some(json!({ "name": "A", "pills": { "Aspirin": 10 } })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn removed_dropper_is_gone_for_mutations() {
        let app = app();
        let id = registered(&app).await;

        let (status, _) = call(&app, Method::DELETE, &format!("/api/droppers/{}", id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/api/droppers/{}/activate", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
