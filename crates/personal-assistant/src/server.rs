//! HTTP server startup and routing.

use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::{admin_api, auth_api, calendar_api, chat_api, email_api, task_api};
use crate::config::Config;
use crate::db::Database;
use crate::llm::{client::OpenAiChatClient, ChatModel};
use crate::shared_state::AppState;

/// Run the server until the listener fails.
pub async fn run_server(cfg: Config) -> anyhow::Result<()> {
    crate::telemetry::init_tracing();
    crate::metrics::init_metrics()?;
    cfg.print_config();

    let database = Arc::new(Database::new(&cfg.database_path)?);
    let model: Arc<dyn ChatModel> = Arc::new(OpenAiChatClient::new(
        &cfg.openai_base_url,
        &cfg.openai_api_key,
        Duration::from_secs(cfg.model_timeout_seconds),
    )?);

    let addr = cfg.api_addr()?;
    let state = AppState::new(Arc::new(cfg), database, model);
    let app = build_router(state);

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Every route, with CORS, tracing and a request timeout.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers(Any);
    let timeout = Duration::from_secs(state.config.request_timeout_seconds);

    let auth = Router::new()
        .route("/register", post(auth_api::register))
        .route("/login", post(auth_api::login))
        .route("/logout", post(auth_api::logout))
        .route("/profile", get(auth_api::get_profile).put(auth_api::update_profile));

    let calendar = Router::new()
        .route("/events", get(calendar_api::list_events).post(calendar_api::create_event))
        .route("/events/today", get(calendar_api::today_events))
        .route("/events/upcoming", get(calendar_api::upcoming_events))
        .route(
            "/events/:id",
            get(calendar_api::get_event)
                .put(calendar_api::replace_event)
                .patch(calendar_api::patch_event)
                .delete(calendar_api::delete_event),
        );

    let tasks = Router::new()
        .route("/tasks", get(task_api::list_tasks).post(task_api::create_task))
        .route("/tasks/pending", get(task_api::pending_tasks))
        .route("/tasks/stats", get(task_api::task_stats))
        .route(
            "/tasks/:id",
            get(task_api::get_task)
                .put(task_api::replace_task)
                .patch(task_api::patch_task)
                .delete(task_api::delete_task),
        )
        .route("/tasks/:id/complete", post(task_api::complete_task))
        .route("/categories", get(task_api::list_categories).post(task_api::create_category))
        .route("/categories/:id", axum::routing::delete(task_api::delete_category));

    let email = Router::new()
        .route("/accounts", get(email_api::list_accounts).post(email_api::create_account))
        .route("/accounts/:id/messages", post(email_api::ingest_message))
        .route("/messages", get(email_api::list_messages))
        .route("/messages/:id", get(email_api::get_message).patch(email_api::patch_message))
        .route("/unread-count", get(email_api::unread_count));

    let ai = Router::new()
        .route("/chat", post(chat_api::chat))
        .route("/conversations", get(chat_api::list_conversations))
        .route("/conversations/:id", get(chat_api::get_conversation))
        .route("/commands", get(chat_api::list_commands))
        .route("/preferences", get(chat_api::get_preferences).put(chat_api::update_preferences));

    Router::new()
        .nest("/api/auth", auth)
        .nest("/api/calendar", calendar)
        .nest("/api/tasks", tasks)
        .nest("/api/email", email)
        .nest("/api/ai", ai)
        .route("/api/admin/stats", get(admin_api::db_stats))
        .route("/healthz", get(admin_api::health))
        .route("/metrics", get(crate::metrics::get_metrics))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .with_state(state)
}
