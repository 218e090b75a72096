//! # API REST
//!
//! REST API implementation for OPAL subrecords.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - Mapping controller outcomes onto HTTP status codes and JSON bodies
//!
//! Uses `api-shared` for authentication and documented wire types.

#![warn(rust_2018_idioms)]

use api_shared::{
    ApiKeyAuth, CreateSubrecordReq, DeletedRes, ErrorRes, FlowsRes, HealthRes, HealthService,
    ListSchemasRes, RecordSchemaRes, SubrecordRes, UpdateSubrecordReq, UserProfileRes,
    API_KEY_HEADER, USER_HEADER,
};
use axum::{
    body::Bytes,
    extract::{Path as AxumPath, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use opal_core::users::Operation;
use opal_core::{
    Actor, CreateRequest, DestroyRequest, FieldMap, Outcome, RecordId, RetrieveRequest,
    SubrecordController, SubrecordError, UpdateRequest,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Application state shared across REST API handlers.
#[derive(Clone)]
pub struct AppState {
    controller: Arc<SubrecordController>,
    auth: Arc<ApiKeyAuth>,
}

impl AppState {
    pub fn new(controller: SubrecordController, auth: ApiKeyAuth) -> Self {
        Self {
            controller: Arc::new(controller),
            auth: Arc::new(auth),
        }
    }

    fn actor(&self, headers: &HeaderMap) -> Actor {
        self.auth
            .actor(header(headers, API_KEY_HEADER), header(headers, USER_HEADER))
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        list_records,
        list_schemas,
        list_flows,
        user_profile,
        create_subrecord,
        retrieve_subrecord,
        update_subrecord,
        destroy_subrecord,
    ),
    components(schemas(
        HealthRes,
        ErrorRes,
        SubrecordRes,
        CreateSubrecordReq,
        UpdateSubrecordReq,
        DeletedRes,
        UserProfileRes,
        RecordSchemaRes,
        ListSchemasRes,
        FlowsRes,
        api_shared::FieldSchemaRes,
    ))
)]
pub struct ApiDoc;

/// Builds the REST router with Swagger UI and permissive CORS.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v0.1/record", get(list_records))
        .route("/api/v0.1/list_schema", get(list_schemas))
        .route("/api/v0.1/flow", get(list_flows))
        .route("/api/v0.1/userprofile", get(user_profile))
        .route("/api/v0.1/:record_type", post(create_subrecord))
        .route(
            "/api/v0.1/:record_type/:id",
            get(retrieve_subrecord)
                .put(update_subrecord)
                .delete(destroy_subrecord),
        )
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// A controller outcome rendered as an HTTP response.
pub struct OutcomeResponse(pub Outcome);

impl IntoResponse for OutcomeResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status.code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0.body)).into_response()
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Runs a controller operation on the blocking pool.
async fn run<F>(state: &AppState, op: F) -> Response
where
    F: FnOnce(&SubrecordController) -> Outcome + Send + 'static,
{
    let controller = Arc::clone(&state.controller);
    match tokio::task::spawn_blocking(move || op(&controller)).await {
        Ok(outcome) => OutcomeResponse(outcome).into_response(),
        Err(e) => {
            tracing::error!("controller task failed: {:?}", e);
            let body = ErrorRes {
                error: "Internal error".into(),
                code: 500,
                unknown_fields: Vec::new(),
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

/// Parses a request body into a field mapping. An empty body is an empty mapping.
fn parse_body(bytes: &Bytes) -> Result<FieldMap, SubrecordError> {
    if bytes.is_empty() {
        return Ok(FieldMap::new());
    }
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(SubrecordError::InvalidInput(
            "request body must be a JSON object".into(),
        )),
        Err(e) => Err(SubrecordError::InvalidInput(format!(
            "request body is not valid JSON: {e}"
        ))),
    }
}

fn reject(err: &SubrecordError) -> Response {
    tracing::warn!("request rejected: {}", err);
    OutcomeResponse(Outcome::failure(err)).into_response()
}

/// Rejects a path id or body that could not be decoded.
///
/// Authorization is still checked first: a caller who may not perform `operation` gets 401 or
/// 403 rather than 400.
fn reject_input(
    state: &AppState,
    actor: &Actor,
    operation: Operation,
    record_type: &str,
    err: SubrecordError,
) -> Response {
    let err = match state.controller.admit(actor, operation, record_type) {
        Ok(()) => err,
        Err(denied) => denied,
    };
    reject(&err)
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DestroyParams {
    /// When present, the delete only succeeds if it matches the stored token.
    consistency_token: Option<String>,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for the REST API
#[axum::debug_handler]
async fn health(State(_state): State<AppState>) -> Json<HealthRes> {
    Json(HealthService::check_health())
}

#[utoipa::path(
    get,
    path = "/api/v0.1/record",
    responses(
        (status = 200, description = "Registered record types and their fields", body = [RecordSchemaRes]),
        (status = 401, description = "Not authenticated", body = ErrorRes)
    )
)]
/// List every registered record type with its legal fields.
#[axum::debug_handler]
async fn list_records(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let actor = state.actor(&headers);
    run(&state, move |controller| controller.record_metadata(&actor)).await
}

#[utoipa::path(
    get,
    path = "/api/v0.1/list_schema",
    responses(
        (status = 200, description = "Column schemas of every patient list", body = ListSchemasRes),
        (status = 401, description = "Not authenticated", body = ErrorRes)
    )
)]
/// List the column schemas of every patient list.
#[axum::debug_handler]
async fn list_schemas(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let actor = state.actor(&headers);
    run(&state, move |controller| controller.list_schemas(&actor)).await
}

#[utoipa::path(
    get,
    path = "/api/v0.1/flow",
    responses(
        (status = 200, description = "Client flow definitions", body = FlowsRes),
        (status = 401, description = "Not authenticated", body = ErrorRes)
    )
)]
/// List the client flow definitions.
#[axum::debug_handler]
async fn list_flows(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let actor = state.actor(&headers);
    run(&state, move |controller| controller.flows(&actor)).await
}

#[utoipa::path(
    get,
    path = "/api/v0.1/userprofile",
    responses(
        (status = 200, description = "Profile of the acting user", body = UserProfileRes),
        (status = 401, description = "Not authenticated", body = ErrorRes)
    )
)]
/// Return the acting user's profile.
#[axum::debug_handler]
async fn user_profile(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let actor = state.actor(&headers);
    run(&state, move |controller| controller.profile(&actor)).await
}

#[utoipa::path(
    post,
    path = "/api/v0.1/{record_type}",
    request_body = CreateSubrecordReq,
    params(("record_type" = String, Path, description = "Registered record type name")),
    responses(
        (status = 201, description = "Subrecord created", body = SubrecordRes),
        (status = 400, description = "Unknown field or episode", body = ErrorRes),
        (status = 401, description = "Not authenticated", body = ErrorRes),
        (status = 403, description = "Not permitted", body = ErrorRes),
        (status = 404, description = "Unknown record type", body = ErrorRes),
        (status = 500, description = "Internal server error", body = ErrorRes)
    )
)]
/// Create a subrecord attached to an existing episode
///
/// The body carries `episode_id` plus any of the record type's schema fields. Any other key
/// rejects the whole request.
#[axum::debug_handler]
async fn create_subrecord(
    State(state): State<AppState>,
    AxumPath(record_type): AxumPath<String>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Response {
    let actor = state.actor(&headers);
    let body = match parse_body(&bytes) {
        Ok(body) => body,
        Err(e) => return reject_input(&state, &actor, Operation::Create, &record_type, e),
    };
    let req = CreateRequest {
        actor,
        record_type,
        body,
    };
    run(&state, move |controller| controller.create(req)).await
}

#[utoipa::path(
    get,
    path = "/api/v0.1/{record_type}/{id}",
    params(
        ("record_type" = String, Path, description = "Registered record type name"),
        ("id" = u64, Path, description = "Subrecord id")
    ),
    responses(
        (status = 200, description = "Subrecord", body = SubrecordRes),
        (status = 401, description = "Not authenticated", body = ErrorRes),
        (status = 404, description = "No such record or record type", body = ErrorRes)
    )
)]
/// Read one subrecord.
#[axum::debug_handler]
async fn retrieve_subrecord(
    State(state): State<AppState>,
    AxumPath((record_type, id)): AxumPath<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let actor = state.actor(&headers);
    let id = match id.parse::<RecordId>() {
        Ok(id) => id,
        Err(e) => return reject_input(&state, &actor, Operation::Retrieve, &record_type, e),
    };
    let req = RetrieveRequest {
        actor,
        record_type,
        id,
    };
    run(&state, move |controller| controller.retrieve(req)).await
}

#[utoipa::path(
    put,
    path = "/api/v0.1/{record_type}/{id}",
    request_body = UpdateSubrecordReq,
    params(
        ("record_type" = String, Path, description = "Registered record type name"),
        ("id" = u64, Path, description = "Subrecord id")
    ),
    responses(
        (status = 202, description = "Subrecord updated", body = SubrecordRes),
        (status = 400, description = "Unknown field or episode change", body = ErrorRes),
        (status = 401, description = "Not authenticated", body = ErrorRes),
        (status = 403, description = "Not permitted", body = ErrorRes),
        (status = 404, description = "No such record or record type", body = ErrorRes),
        (status = 409, description = "Stale consistency token", body = ErrorRes)
    )
)]
/// Update a subrecord
///
/// The body must echo the `consistency_token` from the client's last read. Changed schema fields
/// are merged over the stored ones.
#[axum::debug_handler]
async fn update_subrecord(
    State(state): State<AppState>,
    AxumPath((record_type, id)): AxumPath<(String, String)>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Response {
    let actor = state.actor(&headers);
    let (id, body) = match (id.parse::<RecordId>(), parse_body(&bytes)) {
        (Ok(id), Ok(body)) => (id, body),
        (Err(e), _) | (_, Err(e)) => {
            return reject_input(&state, &actor, Operation::Update, &record_type, e)
        }
    };
    let req = UpdateRequest {
        actor,
        record_type,
        id,
        body,
    };
    run(&state, move |controller| controller.update(req)).await
}

#[utoipa::path(
    delete,
    path = "/api/v0.1/{record_type}/{id}",
    params(
        ("record_type" = String, Path, description = "Registered record type name"),
        ("id" = u64, Path, description = "Subrecord id"),
        DestroyParams
    ),
    responses(
        (status = 202, description = "Subrecord deleted", body = DeletedRes),
        (status = 401, description = "Not authenticated", body = ErrorRes),
        (status = 403, description = "Not permitted", body = ErrorRes),
        (status = 404, description = "No such record or record type", body = ErrorRes),
        (status = 409, description = "Stale consistency token", body = ErrorRes)
    )
)]
/// Delete a subrecord.
#[axum::debug_handler]
async fn destroy_subrecord(
    State(state): State<AppState>,
    AxumPath((record_type, id)): AxumPath<(String, String)>,
    Query(params): Query<DestroyParams>,
    headers: HeaderMap,
) -> Response {
    let actor = state.actor(&headers);
    let id = match id.parse::<RecordId>() {
        Ok(id) => id,
        Err(e) => return reject_input(&state, &actor, Operation::Destroy, &record_type, e),
    };
    let req = DestroyRequest {
        actor,
        record_type,
        id,
        consistency_token: params.consistency_token,
    };
    run(&state, move |controller| controller.destroy(req)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use opal_core::episodes::InMemoryEpisodeDirectory;
    use opal_core::notify::NotificationDispatcher;
    use opal_core::registry::RecordRegistry;
    use opal_core::schema::StaticSchemaRegistry;
    use opal_core::storage::InMemorySubrecordStore;
    use opal_core::users::{InMemoryUserDirectory, UserProfile};
    use opal_core::EpisodeId;
    use opal_types::NonEmptyText;
    use serde_json::json;
    use tower::ServiceExt;

    const KEY: &str = "test-key";
    const EPISODE: EpisodeId = EpisodeId::new(1);

    fn app() -> Router {
        let schemas = StaticSchemaRegistry::builtin().expect("builtin schema should parse");
        let readonly = UserProfile {
            readonly: true,
            ..UserProfile::default()
        };
        let controller = SubrecordController::new(
            RecordRegistry::bind_all(&schemas, Arc::new(InMemorySubrecordStore::new())),
            Arc::new(InMemoryEpisodeDirectory::with_episodes([EPISODE])),
            Arc::new(
                InMemoryUserDirectory::new()
                    .with_profile(NonEmptyText::new("viewer").unwrap(), readonly),
            ),
            NotificationDispatcher::disabled(),
        );
        router(AppState::new(controller, ApiKeyAuth::new(KEY)))
    }

    fn request(method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(API_KEY_HEADER, KEY)
            .header("content-type", "application/json");
        if let Some(user) = user {
            builder = builder.header(USER_HEADER, user);
        }
        let body = match body {
            Some(value) => Body::from(value.to_string()),
            None => Body::empty(),
        };
        builder.body(body).expect("request should build")
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = app
            .clone()
            .oneshot(req)
            .await
            .expect("request should succeed");
        let status = res.status();
        let bytes = res
            .into_body()
            .collect()
            .await
            .expect("body should be readable")
            .to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("body should be JSON")
        };
        (status, body)
    }

    async fn create_blue(app: &Router) -> Value {
        let (status, body) = send(
            app,
            request(
                "POST",
                "/api/v0.1/colour",
                Some("testuser"),
                Some(json!({"name": "blue", "episode_id": EPISODE})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(&app(), request("GET", "/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], json!(true));
    }

    #[tokio::test]
    async fn test_subrecord_lifecycle() {
        let app = app();
        let created = create_blue(&app).await;
        assert_eq!(created["name"], json!("blue"));
        let id = created["id"].as_u64().unwrap();
        let uri = format!("/api/v0.1/colour/{id}");

        let (status, read) = send(&app, request("GET", &uri, Some("testuser"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(read, created);

        let (status, updated) = send(
            &app,
            request(
                "PUT",
                &uri,
                Some("testuser"),
                Some(json!({
                    "name": "green",
                    "episode_id": EPISODE,
                    "id": id,
                    "consistency_token": created["consistency_token"]
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(updated["name"], json!("green"));
        assert_ne!(updated["consistency_token"], created["consistency_token"]);

        let (status, _) = send(
            &app,
            request(
                "PUT",
                &uri,
                Some("testuser"),
                Some(json!({"name": "red", "consistency_token": created["consistency_token"]})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, deleted) = send(&app, request("DELETE", &uri, Some("testuser"), None)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(deleted, json!({"id": id, "deleted": true}));

        let (status, _) = send(&app, request("GET", &uri, Some("testuser"), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_with_unknown_field_is_bad_request() {
        let (status, body) = send(
            &app(),
            request(
                "POST",
                "/api/v0.1/colour",
                Some("testuser"),
                Some(json!({"name": "blue", "hue": "enabled", "episode_id": EPISODE})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], json!(400));
        assert_eq!(body["unknown_fields"], json!(["hue"]));
    }

    #[tokio::test]
    async fn test_create_with_missing_episode_is_bad_request() {
        let (status, _) = send(
            &app(),
            request(
                "POST",
                "/api/v0.1/colour",
                Some("testuser"),
                Some(json!({"name": "blue", "episode_id": 56785})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let req = Request::builder()
            .method("POST")
            .uri("/api/v0.1/colour")
            .header(API_KEY_HEADER, KEY)
            .header(USER_HEADER, "testuser")
            .body(Body::from("{not json"))
            .expect("request should build");
        let (status, _) = send(&app(), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_credentials_are_unauthorized() {
        let app = app();
        let (status, _) = send(
            &app,
            request(
                "POST",
                "/api/v0.1/colour",
                None,
                Some(json!({"name": "blue", "episode_id": EPISODE})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .method("GET")
            .uri("/api/v0.1/userprofile")
            .header(API_KEY_HEADER, "wrong")
            .header(USER_HEADER, "testuser")
            .body(Body::empty())
            .expect("request should build");
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_authorization_precedes_input_errors() {
        let app = app();
        let (status, _) = send(&app, request("DELETE", "/api/v0.1/colour/abc", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(
            &app,
            request("GET", "/api/v0.1/colour/abc", Some("testuser"), None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            request("DELETE", "/api/v0.1/colour/abc", Some("viewer"), None),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        for (method, uri) in [("POST", "/api/v0.1/colour"), ("PUT", "/api/v0.1/colour/1")] {
            let req = Request::builder()
                .method(method)
                .uri(uri)
                .header(API_KEY_HEADER, KEY)
                .header(USER_HEADER, "viewer")
                .body(Body::from("{not json"))
                .expect("request should build");
            let (status, _) = send(&app, req).await;
            assert_eq!(status, StatusCode::FORBIDDEN, "{method} {uri}");
        }
    }

    #[tokio::test]
    async fn test_user_profile() {
        let (status, body) = send(
            &app(),
            request("GET", "/api/v0.1/userprofile", Some("testuser"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"readonly": false, "can_extract": false, "filters": [], "roles": {"default": []}})
        );
    }

    #[tokio::test]
    async fn test_readonly_user_is_forbidden() {
        let app = app();
        let created = create_blue(&app).await;
        let uri = format!("/api/v0.1/colour/{}", created["id"]);

        let (status, _) = send(&app, request("DELETE", &uri, Some("viewer"), None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(&app, request("GET", &uri, Some("viewer"), None)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_destroy_with_stale_token_conflicts() {
        let app = app();
        let created = create_blue(&app).await;
        let uri = format!("/api/v0.1/colour/{}?consistency_token=wat", created["id"]);

        let (status, _) = send(&app, request("DELETE", &uri, Some("testuser"), None)).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_unknown_record_type_and_id() {
        let app = app();
        let (status, _) = send(
            &app,
            request("GET", "/api/v0.1/hue/1", Some("testuser"), None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            request("DELETE", "/api/v0.1/colour/567", Some("testuser"), None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_records() {
        let (status, body) = send(
            &app(),
            request("GET", "/api/v0.1/record", Some("testuser"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let schemas: Vec<RecordSchemaRes> =
            serde_json::from_value(body).expect("schemas should deserialize");
        assert!(schemas.iter().any(|s| s.name == "colour"));
    }

    #[tokio::test]
    async fn test_metadata_requires_authentication() {
        let app = app();
        for uri in ["/api/v0.1/record", "/api/v0.1/list_schema", "/api/v0.1/flow"] {
            let (status, _) = send(&app, request("GET", uri, None, None)).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_list_schemas_and_flows() {
        let app = app();
        let (status, body) = send(
            &app,
            request("GET", "/api/v0.1/list_schema", Some("testuser"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let lists: ListSchemasRes =
            serde_json::from_value(body).expect("list schemas should deserialize");
        assert_eq!(lists.0["default"].len(), 3);

        let (status, body) = send(
            &app,
            request("GET", "/api/v0.1/flow", Some("testuser"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({}));
    }
}
