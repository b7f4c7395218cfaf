use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, FromRequestParts, Path, Request, State},
    http::{request::Parts, HeaderMap, Method, StatusCode},
    middleware,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use campuslink_engine::SocialEngine;
use campuslink_shared::constants::ACTING_USER_HEADER;
use campuslink_shared::protocol::{
    BlockUserRequest, BlockedUser, ConnectionRequestCreated, ConnectionsSummary, DeliveryReport,
    NotificationItem, RespondToConnection, SendConnectionRequest,
};
use campuslink_shared::{EngineError, EngineResult, GroupId, RequestId, UnreadSource, UserId};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SocialEngine>,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        // Connections
        .route("/connections", get(connection_summary))
        .route("/connections/request", post(send_request))
        .route("/connections/respond", post(respond_to_request))
        .route("/connections/requests/:id/cancel", post(cancel_request))
        .route("/connections/:user_id", delete(disconnect))
        // Blocking
        .route("/blocked-users", get(blocked_users).post(block_user))
        .route("/blocked-users/:user_id", delete(unblock_user))
        .route("/blocked-users/check/:user_id", get(block_status))
        // Read state
        .route(
            "/messages/conversations/:user_id/mark-read",
            post(mark_conversation_read),
        )
        .route("/groups/:group_id/mark-read", post(mark_group_read))
        .route("/groups/unread-counts", get(group_unread_counts))
        // Notifications
        .route("/notifications", get(notification_feed))
        .route("/notifications/mark-all-read", post(mark_all_notifications_read))
        .route("/notifications/:item_id/ack", post(acknowledge_notification))
        // Delivery transport
        .route("/internal/deliveries", post(record_delivery))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Acting user
// ---------------------------------------------------------------------------

/// Caller identity, set by the gateway in the `X-User-Id` header.
#[derive(Debug, Clone, Copy)]
pub struct ActingUser(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for ActingUser
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(ACTING_USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<UserId>().ok())
            .map(ActingUser)
            .ok_or(ServerError::Unauthenticated)
    }
}

/// `Json` whose rejections use the API's error body.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ServerError::BadRequest(rejection.body_text()))?;
        Ok(ApiJson(value))
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    delivery_hook_enabled: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BlockStatusResponse {
    /// The caller has blocked the user.
    has_blocked: bool,
    /// A block exists in either direction.
    is_blocked: bool,
}

#[derive(Serialize)]
struct ClearedResponse {
    cleared: u64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        delivery_hook_enabled: state.config.internal_token.is_some(),
    })
}

async fn connection_summary(
    State(state): State<AppState>,
    ActingUser(me): ActingUser,
) -> Result<Json<ConnectionsSummary>, ServerError> {
    let summary = on_blocking_pool(&state, move |engine| engine.connection_summary(me)).await?;
    Ok(Json(summary))
}

async fn send_request(
    State(state): State<AppState>,
    ActingUser(me): ActingUser,
    ApiJson(body): ApiJson<SendConnectionRequest>,
) -> Result<(StatusCode, Json<ConnectionRequestCreated>), ServerError> {
    let request_id = state.engine.graph().request_connection(me, body.to_user_id)?;
    Ok((
        StatusCode::CREATED,
        Json(ConnectionRequestCreated { request_id }),
    ))
}

async fn respond_to_request(
    State(state): State<AppState>,
    ActingUser(me): ActingUser,
    ApiJson(body): ApiJson<RespondToConnection>,
) -> Result<StatusCode, ServerError> {
    state
        .engine
        .graph()
        .respond(me, body.request_id, body.decision)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn cancel_request(
    State(state): State<AppState>,
    ActingUser(me): ActingUser,
    Path(id): Path<RequestId>,
) -> Result<StatusCode, ServerError> {
    state.engine.graph().cancel(id, me)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn disconnect(
    State(state): State<AppState>,
    ActingUser(me): ActingUser,
    Path(other): Path<UserId>,
) -> Result<StatusCode, ServerError> {
    state.engine.graph().disconnect(me, other)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn blocked_users(
    State(state): State<AppState>,
    ActingUser(me): ActingUser,
) -> Result<Json<Vec<BlockedUser>>, ServerError> {
    let users = on_blocking_pool(&state, move |engine| engine.blocked_users(me)).await?;
    Ok(Json(users))
}

async fn block_user(
    State(state): State<AppState>,
    ActingUser(me): ActingUser,
    ApiJson(body): ApiJson<BlockUserRequest>,
) -> Result<StatusCode, ServerError> {
    state.engine.block(me, body.user_id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unblock_user(
    State(state): State<AppState>,
    ActingUser(me): ActingUser,
    Path(other): Path<UserId>,
) -> Result<StatusCode, ServerError> {
    state.engine.unblock(me, other)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn block_status(
    State(state): State<AppState>,
    ActingUser(me): ActingUser,
    Path(other): Path<UserId>,
) -> Json<BlockStatusResponse> {
    let blocks = state.engine.blocks();
    Json(BlockStatusResponse {
        has_blocked: blocks.has_blocked(me, other),
        is_blocked: blocks.is_blocked(me, other),
    })
}

async fn mark_conversation_read(
    State(state): State<AppState>,
    ActingUser(me): ActingUser,
    Path(other): Path<UserId>,
) -> Json<ClearedResponse> {
    let cleared = state.engine.unread().mark_read(me, UnreadSource::Direct(other));
    Json(ClearedResponse {
        cleared: cleared.into(),
    })
}

async fn mark_group_read(
    State(state): State<AppState>,
    ActingUser(me): ActingUser,
    Path(group): Path<GroupId>,
) -> Json<ClearedResponse> {
    let cleared = state.engine.unread().mark_read(me, UnreadSource::Group(group));
    Json(ClearedResponse {
        cleared: cleared.into(),
    })
}

async fn group_unread_counts(
    State(state): State<AppState>,
    ActingUser(me): ActingUser,
) -> Result<Json<BTreeMap<GroupId, u32>>, ServerError> {
    let counts = on_blocking_pool(&state, move |engine| engine.unread().group_counts(me)).await?;
    Ok(Json(counts))
}

async fn notification_feed(
    State(state): State<AppState>,
    ActingUser(me): ActingUser,
) -> Result<Json<Vec<NotificationItem>>, ServerError> {
    let feed = on_blocking_pool(&state, move |engine| engine.notifications().feed_for(me)).await?;
    Ok(Json(feed))
}

async fn acknowledge_notification(
    State(state): State<AppState>,
    ActingUser(me): ActingUser,
    Path(item_id): Path<String>,
) -> Result<StatusCode, ServerError> {
    let ack = state.engine.notifications().acknowledge(me, &item_id)?;
    debug!(user = %me, %item_id, ?ack, "Notification acknowledged");
    Ok(StatusCode::NO_CONTENT)
}

async fn mark_all_notifications_read(
    State(state): State<AppState>,
    ActingUser(me): ActingUser,
) -> Json<ClearedResponse> {
    let cleared = state.engine.notifications().mark_all_read(me);
    Json(ClearedResponse {
        cleared: cleared as u64,
    })
}

async fn record_delivery(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(report): ApiJson<DeliveryReport>,
) -> Result<StatusCode, ServerError> {
    verify_internal_token(&headers, &state.config)?;

    let source = UnreadSource::from_parts(report.source_type, report.source_id);
    on_blocking_pool(&state, move |engine| {
        engine.unread().record_inbound(report.recipient_id, source)
    })
    .await?;
    Ok(StatusCode::ACCEPTED)
}

/// Run an engine call that consults the profile or group directory. Those
/// may hit SQLite, so they stay off the async workers.
async fn on_blocking_pool<T, F>(state: &AppState, call: F) -> Result<T, ServerError>
where
    T: Send + 'static,
    F: FnOnce(&SocialEngine) -> EngineResult<T> + Send + 'static,
{
    let engine = state.engine.clone();
    let result = tokio::task::spawn_blocking(move || call(&engine))
        .await
        .map_err(|e| EngineError::Unavailable(format!("engine task failed: {e}")))?;
    Ok(result?)
}

fn verify_internal_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.internal_token else {
        return Err(ServerError::Forbidden(
            "Delivery hook is disabled (no INTERNAL_TOKEN configured)".into(),
        ));
    };

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid internal token".into()));
    }

    Ok(())
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use axum::response::IntoResponse;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use campuslink_engine::UserProfile;
    use campuslink_store::{Database, SqliteDirectory};

    use super::*;

    const TOKEN: &str = "delivery-secret";

    fn test_app() -> Router {
        let db = Database::open_in_memory().unwrap();
        for (id, name) in [(1, "Alice"), (2, "Bob"), (3, "Carol")] {
            db.upsert_profile(&UserProfile {
                user_id: UserId(id),
                display_name: name.into(),
                avatar_url: None,
                campus_domain: Some("state.edu".into()),
            })
            .unwrap();
        }
        db.upsert_group(GroupId(10), "Robotics").unwrap();
        db.add_group_member(GroupId(10), UserId(1)).unwrap();

        let directory = Arc::new(SqliteDirectory::new(Arc::new(Mutex::new(db))));
        let config = ServerConfig {
            internal_token: Some(TOKEN.into()),
            ..ServerConfig::default()
        };

        build_router(AppState {
            engine: Arc::new(SocialEngine::new(directory.clone(), directory)),
            rate_limiter: RateLimiter::default(),
            config: Arc::new(config),
        })
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        user: Option<u64>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(ACTING_USER_HEADER, user.to_string());
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        send(app, request).await
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
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

    async fn deliver(app: &Router, token: Option<&str>, report: Value) -> StatusCode {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/internal/deliveries")
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(report.to_string())).unwrap();
        send(app, request).await.0
    }

    #[tokio::test]
    async fn test_directory_calls_run_off_the_async_workers() {
        let directory = Arc::new(campuslink_engine::MemoryDirectory::new());
        directory.add_user(UserId(2), "Bob");
        let state = AppState {
            engine: Arc::new(SocialEngine::new(directory.clone(), directory)),
            rate_limiter: RateLimiter::default(),
            config: Arc::new(ServerConfig::default()),
        };
        state.engine.block(UserId(1), UserId(2)).unwrap();

        let blocked = on_blocking_pool(&state, |engine| engine.blocked_users(UserId(1)))
            .await
            .unwrap();
        assert_eq!(blocked.len(), 1);

        let failed: Result<(), ServerError> =
            on_blocking_pool(&state, |_| panic!("directory lookup blew up")).await;
        assert_eq!(
            failed.unwrap_err().into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app();
        let (status, body) = call(&app, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_missing_acting_user_is_unauthorized() {
        let app = test_app();
        let (status, body) = call(&app, Method::GET, "/connections", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_request_and_accept_flow() {
        let app = test_app();

        let (status, created) = call(
            &app,
            Method::POST,
            "/connections/request",
            Some(1),
            Some(json!({ "toUserId": 2 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let request_id = created["requestId"].as_u64().unwrap();

        let (_, summary) = call(&app, Method::GET, "/connections", Some(2), None).await;
        assert_eq!(summary["incomingRequests"][0]["userId"], 1);
        assert_eq!(summary["incomingRequests"][0]["displayName"], "Alice");

        let (status, _) = call(
            &app,
            Method::POST,
            "/connections/respond",
            Some(2),
            Some(json!({ "requestId": request_id, "decision": "ACCEPT" })),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, summary) = call(&app, Method::GET, "/connections", Some(1), None).await;
        assert_eq!(summary["connections"][0]["id"], 2);
        assert_eq!(summary["connections"][0]["displayName"], "Bob");
        assert_eq!(summary["unreadCounts"]["2"], 0);

        let (status, _) = call(&app, Method::DELETE, "/connections/2", Some(1), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, summary) = call(&app, Method::GET, "/connections", Some(2), None).await;
        assert!(summary["connections"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_request_errors_map_to_statuses() {
        let app = test_app();

        let (status, _) = call(
            &app,
            Method::POST,
            "/connections/request",
            Some(1),
            Some(json!({ "toUserId": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, created) = call(
            &app,
            Method::POST,
            "/connections/request",
            Some(1),
            Some(json!({ "toUserId": 3 })),
        )
        .await;
        let (status, _) = call(
            &app,
            Method::POST,
            "/connections/request",
            Some(3),
            Some(json!({ "toUserId": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let request_id = created["requestId"].as_u64().unwrap();
        let (status, _) = call(
            &app,
            Method::POST,
            "/connections/respond",
            Some(2),
            Some(json!({ "requestId": request_id, "decision": "ACCEPT" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(
            &app,
            Method::POST,
            "/connections/respond",
            Some(3),
            Some(json!({ "requestId": 999, "decision": "DECLINE" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let uri = format!("/connections/requests/{request_id}/cancel");
        let (status, _) = call(&app, Method::POST, &uri, Some(1), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let app = test_app();
        let (status, body) = call(
            &app,
            Method::POST,
            "/connections/respond",
            Some(2),
            Some(json!({ "requestId": 1, "decision": "MAYBE" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("Invalid request"));
    }

    #[tokio::test]
    async fn test_block_flow() {
        let app = test_app();

        let (status, _) = call(
            &app,
            Method::POST,
            "/blocked-users",
            Some(1),
            Some(json!({ "userId": 2 })),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = call(
            &app,
            Method::POST,
            "/connections/request",
            Some(2),
            Some(json!({ "toUserId": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, blocked) = call(&app, Method::GET, "/blocked-users", Some(1), None).await;
        assert_eq!(blocked[0]["userId"], 2);
        assert_eq!(blocked[0]["displayName"], "Bob");

        let (_, check) = call(&app, Method::GET, "/blocked-users/check/2", Some(1), None).await;
        assert_eq!(check["hasBlocked"], true);
        let (_, check) = call(&app, Method::GET, "/blocked-users/check/1", Some(2), None).await;
        assert_eq!(check["hasBlocked"], false);
        assert_eq!(check["isBlocked"], true);

        let (status, _) = call(&app, Method::DELETE, "/blocked-users/2", Some(1), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, blocked) = call(&app, Method::GET, "/blocked-users", Some(1), None).await;
        assert!(blocked.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_requires_token() {
        let app = test_app();
        let report = json!({ "recipientId": 1, "sourceType": "DIRECT", "sourceId": 2 });

        assert_eq!(deliver(&app, None, report.clone()).await, StatusCode::FORBIDDEN);
        assert_eq!(
            deliver(&app, Some("wrong"), report.clone()).await,
            StatusCode::FORBIDDEN
        );
        assert_eq!(deliver(&app, Some(TOKEN), report).await, StatusCode::ACCEPTED);

        let group = json!({ "recipientId": 2, "sourceType": "GROUP", "sourceId": 10 });
        assert_eq!(deliver(&app, Some(TOKEN), group).await, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_notification_feed_and_acknowledge() {
        let app = test_app();

        call(
            &app,
            Method::POST,
            "/connections/request",
            Some(3),
            Some(json!({ "toUserId": 1 })),
        )
        .await;
        for _ in 0..2 {
            let report = json!({ "recipientId": 1, "sourceType": "DIRECT", "sourceId": 2 });
            assert_eq!(deliver(&app, Some(TOKEN), report).await, StatusCode::ACCEPTED);
        }

        let (status, feed) = call(&app, Method::GET, "/notifications", Some(1), None).await;
        assert_eq!(status, StatusCode::OK);
        let items = feed.as_array().unwrap();
        assert_eq!(items.len(), 2);
        let message = items.iter().find(|item| item["id"] == "msg-2").unwrap();
        assert_eq!(message["type"], "NEW_MESSAGE");
        assert_eq!(message["message"], "Bob sent you 2 new messages");
        assert_eq!(message["isRead"], false);

        let (status, _) = call(
            &app,
            Method::POST,
            "/notifications/msg-2/ack",
            Some(1),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = call(
            &app,
            Method::POST,
            "/notifications/req-3/ack",
            Some(1),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, feed) = call(&app, Method::GET, "/notifications", Some(1), None).await;
        let items = feed.as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["id"], "req-3");
        assert_eq!(items[0]["type"], "CONNECTION_REQUEST");

        let (status, _) = call(
            &app,
            Method::POST,
            "/notifications/bogus/ack",
            Some(1),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_group_read_state() {
        let app = test_app();
        let report = json!({ "recipientId": 1, "sourceType": "GROUP", "sourceId": 10 });
        deliver(&app, Some(TOKEN), report.clone()).await;
        deliver(&app, Some(TOKEN), report).await;

        let (_, counts) = call(&app, Method::GET, "/groups/unread-counts", Some(1), None).await;
        assert_eq!(counts["10"], 2);

        let (_, cleared) = call(
            &app,
            Method::POST,
            "/groups/10/mark-read",
            Some(1),
            None,
        )
        .await;
        assert_eq!(cleared["cleared"], 2);

        let (_, counts) = call(&app, Method::GET, "/groups/unread-counts", Some(1), None).await;
        assert!(counts.as_object().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_all_read() {
        let app = test_app();
        for source in [
            json!({ "recipientId": 1, "sourceType": "DIRECT", "sourceId": 2 }),
            json!({ "recipientId": 1, "sourceType": "DIRECT", "sourceId": 3 }),
        ] {
            deliver(&app, Some(TOKEN), source).await;
        }

        let (_, cleared) = call(
            &app,
            Method::POST,
            "/messages/conversations/3/mark-read",
            Some(1),
            None,
        )
        .await;
        assert_eq!(cleared["cleared"], 1);

        let (_, cleared) = call(
            &app,
            Method::POST,
            "/notifications/mark-all-read",
            Some(1),
            None,
        )
        .await;
        assert_eq!(cleared["cleared"], 1);

        let (_, feed) = call(&app, Method::GET, "/notifications", Some(1), None).await;
        assert!(feed.as_array().unwrap().is_empty());
    }
}
