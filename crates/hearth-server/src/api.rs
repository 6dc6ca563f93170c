use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tower_cookies::CookieManagerLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use hearth_shared::token::TokenService;
use hearth_store::Database;

use crate::auth;
use crate::chats::{ChatService, ChatSummary};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::friends::{FriendService, FriendSummary};
use crate::hub::ChatHub;
use crate::notify::NotificationRegistry;
use crate::rate_limit::{rate_limit, RateLimiter};
use crate::session::CurrentUser;
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub tokens: Arc<TokenService>,
    pub notifications: NotificationRegistry,
    pub hub: ChatHub,
    pub friends: FriendService,
    pub chats: ChatService,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wire every service around one database handle.
    pub fn new(db: Database, tokens: TokenService, config: ServerConfig) -> Self {
        let db = Arc::new(Mutex::new(db));
        let notifications = NotificationRegistry::new();
        let hub = ChatHub::new();

        Self {
            friends: FriendService::new(
                db.clone(),
                notifications.clone(),
                hub.clone(),
                config.invite_cooldown(),
            ),
            chats: ChatService::new(db.clone(), hub.clone()),
            rate_limiter: RateLimiter::new(config.auth_rate_per_sec, config.auth_rate_burst),
            tokens: Arc::new(tokens),
            config: Arc::new(config),
            db,
            notifications,
            hub,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = match HeaderValue::from_str(&state.config.cors_origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE]),
        Err(_) => {
            warn!(origin = %state.config.cors_origin, "Invalid CORS_ORIGIN, cross-origin requests disabled");
            CorsLayer::new()
        }
    };

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit,
        ));

    let friend_routes = Router::new()
        .route("/", get(list_friends).delete(remove_friend))
        .route("/invites", get(ws::notifications_socket).post(send_invite))
        .route("/invites/seen", put(mark_invites_seen))
        .route("/invites/:id/accept", put(accept_invite))
        .route("/invites/:id/decline", put(decline_invite));

    let chat_routes = Router::new()
        .route("/", get(list_chats).post(create_chat))
        .route("/:chat_id/messages", get(ws::chat_socket));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/auth", auth_routes)
        .nest("/api/friends", friend_routes)
        .nest("/api/chats", chat_routes)
        .layer(CookieManagerLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    notification_sockets: usize,
    active_chats: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        notification_sockets: state.notifications.len().await,
        active_chats: state.hub.room_count().await,
    })
}

// ─── Friends ───

#[derive(Serialize)]
struct FriendsResponse {
    friends: Vec<FriendSummary>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoveFriendRequest {
    friend_id: Uuid,
}

#[derive(Deserialize)]
struct InviteRequest {
    email: String,
}

async fn list_friends(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<FriendsResponse>, ServerError> {
    let friends = state.friends.list_friends(&user).await?;
    Ok(Json(FriendsResponse { friends }))
}

async fn remove_friend(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(req): Json<RemoveFriendRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    state.friends.remove_friend(&user, req.friend_id).await?;
    Ok(Json(json!({ "message": "Friend removed" })))
}

async fn send_invite(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(req): Json<InviteRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ServerError> {
    state.friends.send_invite(&user, &req.email).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": format!("Invite sent to {}", req.email.trim()) })),
    ))
}

async fn mark_invites_seen(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let updated = state.friends.mark_seen(&user).await?;
    Ok(Json(json!({ "message": "Invites marked as seen", "updated": updated })))
}

async fn accept_invite(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ServerError> {
    state.friends.accept_invite(&user, id).await?;
    Ok(Json(json!({ "message": "Invite accepted" })))
}

async fn decline_invite(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ServerError> {
    state.friends.decline_invite(&user, id).await?;
    Ok(Json(json!({ "message": "Invite declined" })))
}

// ─── Chats ───

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateChatRequest {
    user_ids: Vec<Uuid>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateChatResponse {
    chat_id: Uuid,
}

#[derive(Serialize)]
struct ChatsResponse {
    chats: Vec<ChatSummary>,
}

async fn create_chat(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(req): Json<CreateChatRequest>,
) -> Result<(StatusCode, Json<CreateChatResponse>), ServerError> {
    let chat = state.chats.create_chat(&user, &req.user_ids).await?;
    Ok((StatusCode::CREATED, Json(CreateChatResponse { chat_id: chat.id })))
}

async fn list_chats(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<ChatsResponse>, ServerError> {
    let chats = state.chats.list_chats(&user).await?;
    Ok(Json(ChatsResponse { chats }))
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
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::response::Response;
    use chrono::Duration;
    use hearth_shared::constants::{ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE};
    use hearth_shared::identity::Identity;
    use hearth_shared::token::TokenPolicy;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::test_support::test_state;

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_request(method: Method, uri: &str, cookie: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_request(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    /// `name=value` pairs from every Set-Cookie header, joined for reuse.
    fn cookie_header(response: &Response) -> String {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .collect::<Vec<_>>()
            .join("; ")
    }

    async fn register(app: &Router, name: &str) -> String {
        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/auth/register",
                None,
                json!({
                    "email": format!("{name}@example.com"),
                    "username": name,
                    "password": "Str0ng!pass",
                    "confirmPassword": "Str0ng!pass",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        cookie_header(&response)
    }

    #[tokio::test]
    async fn test_health() {
        let (_dir, state) = test_state(TokenPolicy::default());
        let response = build_router(state)
            .oneshot(get_request("/health", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_register_sets_cookies_and_me_works() {
        let (_dir, state) = test_state(TokenPolicy::default());
        let app = build_router(state);

        let cookies = register(&app, "alice").await;
        assert!(cookies.contains(ACCESS_TOKEN_COOKIE));
        assert!(cookies.contains(REFRESH_TOKEN_COOKIE));

        let response = app
            .clone()
            .oneshot(get_request("/api/auth/me", Some(&cookies)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["user"]["username"], "alice");
    }

    #[tokio::test]
    async fn test_duplicate_registration_conflicts() {
        let (_dir, state) = test_state(TokenPolicy::default());
        let app = build_router(state);
        register(&app, "alice").await;

        let response = app
            .oneshot(json_request(
                Method::POST,
                "/api/auth/register",
                None,
                json!({
                    "email": "alice@example.com",
                    "username": "alice2",
                    "password": "Str0ng!pass",
                    "confirmPassword": "Str0ng!pass",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["error"], "conflict");
    }

    #[tokio::test]
    async fn test_login_failures() {
        let (_dir, state) = test_state(TokenPolicy::default());
        let app = build_router(state);
        register(&app, "alice").await;

        let wrong = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/auth/login",
                None,
                json!({ "email": "alice@example.com", "password": "Wr0ng!pass" }),
            ))
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        let unknown = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/auth/login",
                None,
                json!({ "email": "nobody@example.com", "password": "Str0ng!pass" }),
            ))
            .await
            .unwrap();
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

        let ok = app
            .oneshot(json_request(
                Method::POST,
                "/api/auth/login",
                None,
                json!({ "email": "alice@example.com", "password": "Str0ng!pass" }),
            ))
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert!(cookie_header(&ok).contains(ACCESS_TOKEN_COOKIE));
    }

    #[tokio::test]
    async fn test_protected_routes_require_session() {
        let (_dir, state) = test_state(TokenPolicy::default());
        let app = build_router(state);

        for uri in ["/api/auth/me", "/api/friends", "/api/chats", "/api/friends/invites"] {
            let response = app.clone().oneshot(get_request(uri, None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_expired_access_token_is_renewed() {
        let policy = TokenPolicy {
            access_ttl: Duration::zero(),
            refresh_ttl: Duration::days(7),
        };
        let (_dir, state) = test_state(policy);
        let tokens = state.tokens.clone();
        let app = build_router(state);

        let identity = Identity::new(Uuid::new_v4(), "ghost", "ghost@example.com");
        let cookie = format!(
            "{ACCESS_TOKEN_COOKIE}={}; {REFRESH_TOKEN_COOKIE}={}",
            tokens.issue_access_token(&identity).unwrap(),
            tokens.issue_refresh_token(&identity).unwrap()
        );

        let response = app
            .clone()
            .oneshot(get_request("/api/auth/me", Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let renewed = cookie_header(&response);
        assert!(renewed.starts_with(&format!("{ACCESS_TOKEN_COOKIE}=")));
        assert!(!renewed.contains(REFRESH_TOKEN_COOKIE));

        let only_access = format!(
            "{ACCESS_TOKEN_COOKIE}={}",
            tokens.issue_access_token(&identity).unwrap()
        );
        let response = app
            .oneshot(get_request("/api/auth/me", Some(&only_access)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_logout_clears_cookies() {
        let (_dir, state) = test_state(TokenPolicy::default());
        let app = build_router(state);
        let cookies = register(&app, "alice").await;

        let response = app
            .oneshot(json_request(Method::POST, "/api/auth/logout", Some(&cookies), json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let cleared: Vec<_> = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        assert_eq!(cleared.len(), 2);
        assert!(cleared.iter().all(|c| c.contains("Max-Age=0")));
    }

    async fn user_id(app: &Router, cookies: &str) -> Uuid {
        let response = app
            .clone()
            .oneshot(get_request("/api/auth/me", Some(cookies)))
            .await
            .unwrap();
        body_json(response).await["user"]["id"]
            .as_str()
            .unwrap()
            .parse()
            .unwrap()
    }

    #[tokio::test]
    async fn test_invite_accept_chat_and_unfriend() {
        let (_dir, state) = test_state(TokenPolicy::default());
        let app = build_router(state.clone());
        let alice = register(&app, "alice").await;
        let bob = register(&app, "bob").await;
        let bob_id = user_id(&app, &bob).await;

        // Strangers cannot chat.
        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/chats",
                Some(&alice),
                json!({ "userIds": [bob_id] }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/friends/invites",
                Some(&alice),
                json!({ "email": "bob@example.com" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/friends/invites",
                Some(&alice),
                json!({ "email": "alice@example.com" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app
            .clone()
            .oneshot(json_request(Method::PUT, "/api/friends/invites/seen", Some(&bob), json!({})))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["updated"], 1);

        let invite_id = state.db.lock().await.pending_invites_for(bob_id).unwrap()[0]
            .invite
            .id;

        // Only bob may accept.
        let uri = format!("/api/friends/invites/{invite_id}/accept");
        let response = app
            .clone()
            .oneshot(json_request(Method::PUT, &uri, Some(&alice), json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .clone()
            .oneshot(json_request(Method::PUT, &uri, Some(&bob), json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(json_request(Method::PUT, &uri, Some(&bob), json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        // Private chat is created once and then reused.
        let mut chat_ids = Vec::new();
        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(json_request(
                    Method::POST,
                    "/api/chats",
                    Some(&alice),
                    json!({ "userIds": [bob_id] }),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::CREATED);
            chat_ids.push(body_json(response).await["chatId"].clone());
        }
        assert_eq!(chat_ids[0], chat_ids[1]);

        let response = app
            .clone()
            .oneshot(get_request("/api/chats", Some(&bob)))
            .await
            .unwrap();
        let chats = body_json(response).await;
        assert_eq!(chats["chats"].as_array().unwrap().len(), 1);
        assert_eq!(chats["chats"][0]["type"], "private");
        assert_eq!(chats["chats"][0]["usersCount"], 2);

        let response = app
            .clone()
            .oneshot(get_request("/api/friends", Some(&alice)))
            .await
            .unwrap();
        let friends = body_json(response).await;
        assert_eq!(friends["friends"][0]["username"], "bob");
        assert_eq!(friends["friends"][0]["active"], false);

        let response = app
            .clone()
            .oneshot(json_request(
                Method::DELETE,
                "/api/friends",
                Some(&alice),
                json!({ "friendId": bob_id }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(get_request("/api/chats", Some(&bob)))
            .await
            .unwrap();
        assert!(body_json(response).await["chats"].as_array().unwrap().is_empty());
    }
}
