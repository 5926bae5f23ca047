use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::auth;
use crate::chat::ChatService;
use crate::config::NimbusConfig;
use crate::error::Error;
use crate::prompt::{HttpTemplateRegistry, NullTemplateRegistry, PromptCache, TemplateRegistry};
use crate::registry::AgentRegistry;
use crate::store::MemoryStore;
use crate::users::UserStore;
use crate::weather::OpenWeather;

pub struct AppState {
    pub users: UserStore,
    pub chat: ChatService,
    pub prompts: Arc<PromptCache>,
}

/// Build the full application state from config: prompt cache (initialized
/// from the upstream registry), conversation store, weather client, agent
/// registry, chat service.
pub async fn build_state(config: &NimbusConfig) -> Arc<AppState> {
    let registry: Arc<dyn TemplateRegistry> = match &config.prompts.registry_url {
        Some(url) => Arc::new(HttpTemplateRegistry::new(url.clone())),
        None => Arc::new(NullTemplateRegistry),
    };
    let prompts = Arc::new(PromptCache::new(registry));
    prompts.initialize().await;

    let store = Arc::new(MemoryStore::new());
    let weather = Arc::new(OpenWeather::new(&config.weather));

    let agents = Arc::new(AgentRegistry::new(
        Arc::clone(&prompts),
        store,
        weather,
        Arc::new(config.agent.clone()),
        config.agent.clone(),
        config.memory.window,
    ));

    Arc::new(AppState {
        users: UserStore::new(),
        chat: ChatService::new(agents),
        prompts,
    })
}

/// The axum router over a prepared state. Split out so tests can drive the
/// API with stubbed components.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/signup", post(signup))
        .route("/token", post(token))
        .route("/users/{username}", delete(delete_user))
        .route("/api/chat", post(chat))
        .route("/chat-history", get(chat_history).delete(delete_chat_history))
        .route("/prompts", get(list_prompts))
        .route("/prompts/refresh", post(refresh_all_prompts))
        .route("/prompts/{id}/refresh", post(refresh_prompt))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run(config: NimbusConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.gateway.bind, config.gateway.port);
    let state = build_state(&config).await;

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("nimbus gateway listening on {addr}");

    axum::serve(listener, app(state)).await?;
    Ok(())
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

fn error_body(detail: impl Into<String>) -> Json<ErrorBody> {
    Json(ErrorBody {
        detail: detail.into(),
    })
}

/// Map the core taxonomy to HTTP status codes. Transport concerns stop
/// here; the core never sees status codes.
fn error_response(err: Error) -> (StatusCode, Json<ErrorBody>) {
    let status = match err {
        Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        Error::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::ConstructionFailed(_) | Error::ExternalCall(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, error_body(err.to_string()))
}

/// Resolve the bearer token to an existing user. The token is the
/// username; swapping in signed tokens would change only this function.
async fn current_user(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<String, (StatusCode, Json<ErrorBody>)> {
    let token = auth::bearer_token(headers).ok_or_else(|| {
        (
            StatusCode::UNAUTHORIZED,
            error_body("Invalid authentication credentials"),
        )
    })?;

    if !state.users.exists(token).await {
        return Err((
            StatusCode::UNAUTHORIZED,
            error_body("Invalid authentication credentials"),
        ));
    }
    Ok(token.to_string())
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Deserialize)]
struct UserCreate {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct UserResponse {
    username: String,
    message: String,
}

async fn signup(
    State(state): State<Arc<AppState>>,
    Json(body): Json<UserCreate>,
) -> impl IntoResponse {
    if state.users.register(&body.username, &body.password).await {
        info!(user = %body.username, "user created");
        (
            StatusCode::CREATED,
            Json(UserResponse {
                username: body.username,
                message: "User created successfully".to_string(),
            }),
        )
            .into_response()
    } else {
        (
            StatusCode::BAD_REQUEST,
            error_body("Username already exists"),
        )
            .into_response()
    }
}

#[derive(Deserialize)]
struct TokenForm {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct Token {
    access_token: String,
    token_type: String,
}

async fn token(
    State(state): State<Arc<AppState>>,
    Form(form): Form<TokenForm>,
) -> impl IntoResponse {
    if state.users.authenticate(&form.username, &form.password).await {
        // Minimal viable scheme: the bearer token is the username. A real
        // deployment swaps this for signed tokens without touching the core.
        Json(Token {
            access_token: form.username,
            token_type: "bearer".to_string(),
        })
        .into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            error_body("Incorrect username or password"),
        )
            .into_response()
    }
}

async fn delete_user(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let user = match current_user(&state, &headers).await {
        Ok(user) => user,
        Err(err) => return err.into_response(),
    };

    if user != username {
        return (
            StatusCode::FORBIDDEN,
            error_body("Not authorized to delete this user"),
        )
            .into_response();
    }

    if state.users.delete(&username).await {
        // Best-effort: the account is gone even if history cleanup fails.
        state.chat.forget_session(&username).await;
        Json(UserResponse {
            username,
            message: "User deleted successfully".to_string(),
        })
        .into_response()
    } else {
        (StatusCode::NOT_FOUND, error_body("User not found")).into_response()
    }
}

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
}

#[derive(Serialize)]
struct QueryResponse {
    response: String,
}

async fn chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<QueryRequest>,
) -> impl IntoResponse {
    let user = match current_user(&state, &headers).await {
        Ok(user) => user,
        Err(err) => return err.into_response(),
    };

    match state.chat.handle_query(&user, &body.query).await {
        Ok(response) => Json(QueryResponse { response }).into_response(),
        Err(e) => {
            warn!(user = %user, "query failed: {e}");
            error_response(e).into_response()
        }
    }
}

#[derive(Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct ChatHistoryResponse {
    messages: Vec<HistoryMessage>,
}

#[derive(Serialize)]
struct HistoryMessage {
    role: crate::types::Role,
    content: String,
}

async fn chat_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<HistoryParams>,
) -> impl IntoResponse {
    let user = match current_user(&state, &headers).await {
        Ok(user) => user,
        Err(err) => return err.into_response(),
    };

    match state.chat.history(&user, params.limit).await {
        Ok(messages) => Json(ChatHistoryResponse {
            messages: messages
                .into_iter()
                .map(|m| HistoryMessage {
                    role: m.role,
                    content: m.content,
                })
                .collect(),
        })
        .into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

async fn delete_chat_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let user = match current_user(&state, &headers).await {
        Ok(user) => user,
        Err(err) => return err.into_response(),
    };

    match state.chat.clear_history(&user).await {
        Ok(()) => Json(serde_json::json!({
            "status": "success",
            "message": format!("Chat history deleted for user {user}"),
        }))
        .into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

async fn list_prompts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(err) = current_user(&state, &headers).await {
        return err.into_response();
    }
    Json(state.prompts.get_all().await).into_response()
}

async fn refresh_prompt(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(err) = current_user(&state, &headers).await {
        return err.into_response();
    }
    let updated = state.prompts.update(&id).await;
    Json(serde_json::json!({ "id": id, "updated": updated })).into_response()
}

async fn refresh_all_prompts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(err) = current_user(&state, &headers).await {
        return err.into_response();
    }
    let results: HashMap<String, bool> = state.prompts.update_all().await;
    Json(results).into_response()
}
