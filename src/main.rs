//! Forum Backend
//!
//! A REST backend for a discussion forum: threads, topics, private groups,
//! and per-user unseen tracking for everything a user subscribes to.

mod api;
mod auth;
mod config;
mod db;
mod errors;
mod forum;
mod models;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use db::Repository;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env();

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Forum Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Bind address: {}", config.bind_addr);
    tracing::info!(
        notify_author = config.notifications.notify_author,
        topic_fanout = config.notifications.topic_fanout,
        "Notification policy"
    );

    // Warn if PSK is not configured
    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (FORUM_API_PSK). Authentication is disabled!");
    }

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;
    let repo = Arc::new(Repository::new(pool, config.notifications));

    // Create application state
    let state = AppState {
        repo,
        config: Arc::new(config.clone()),
    };

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Clone PSK for the auth layer
    let psk = state.config.api_psk.clone();

    // API routes
    let api_routes = Router::new()
        // Users
        .route("/users", post(api::create_user))
        .route("/users/{username}", get(api::get_user_profile))
        .route("/users/{username}/posts", get(api::list_user_posts))
        .route("/me", put(api::update_profile))
        .route("/me/password", put(api::change_password))
        .route("/me/notifications", get(api::get_notifications))
        .route("/me/subscriptions", get(api::get_subscriptions))
        // Topics
        .route("/topics", get(api::list_topics).post(api::create_topic))
        .route("/topics/{name}", get(api::get_topic).put(api::ensure_topic))
        .route("/topics/{name}/threads", get(api::list_topic_threads))
        .route(
            "/topics/{name}/subscription",
            post(api::subscribe_topic).delete(api::unsubscribe_topic),
        )
        .route("/topics/{name}/seen", post(api::mark_topic_seen))
        // Threads
        .route("/threads", get(api::list_threads).post(api::create_thread))
        .route("/threads/{id}", get(api::get_thread).put(api::update_thread))
        .route("/threads/{id}/posts", post(api::create_post))
        .route(
            "/threads/{id}/subscription",
            post(api::subscribe_thread).delete(api::unsubscribe_thread),
        )
        .route("/threads/{id}/seen", post(api::mark_thread_seen))
        // Posts
        .route("/posts/{id}", get(api::get_post).put(api::update_post))
        // Groups
        .route("/groups", get(api::list_groups).post(api::create_group))
        .route("/groups/{id}", get(api::get_group))
        .route("/groups/{id}/members", post(api::add_group_member))
        .route("/groups/{id}/membership", delete(api::leave_group))
        // Apply PSK auth middleware
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests;
