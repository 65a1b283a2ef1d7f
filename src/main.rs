//! Docwiki Backend
//!
//! A revisioned wiki backend with SQLite persistence, deferred macro rendering and
//! subtree moves that leave redirects behind.

mod api;
mod config;
mod db;
mod errors;
mod models;
mod mover;
mod render;
mod revisions;
mod tree;

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use db::Repository;
use mover::Mover;
use render::{
    spawn_render_worker, ChannelRenderQueue, KumascriptClient, MacroRenderer, RenderCoordinator,
    RenderSettings,
};
use revisions::RevisionStore;
use tree::DocumentTree;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Repository,
    pub revisions: RevisionStore,
    pub tree: DocumentTree,
    pub mover: Mover,
    pub renderer: Arc<RenderCoordinator>,
    pub config: Arc<Config>,
}

/// Wire the services together and start the deferred render worker.
pub fn build_state(config: Config, pool: SqlitePool, renderer: Arc<dyn MacroRenderer>) -> AppState {
    let repo = Repository::new(pool);
    let (queue, jobs) = ChannelRenderQueue::new();
    let coordinator = Arc::new(RenderCoordinator::new(
        repo.clone(),
        renderer,
        Arc::new(queue),
        RenderSettings::from_config(&config),
    ));
    spawn_render_worker(coordinator.clone(), jobs);

    AppState {
        revisions: RevisionStore::new(repo.clone()),
        tree: DocumentTree::new(repo.clone(), config.default_locale.clone()),
        mover: Mover::new(repo.clone(), config.default_locale.clone()),
        repo,
        renderer: coordinator,
        config: Arc::new(config),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Docwiki Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Macro service: {}", config.kumascript_url);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.kumascript_timeout.is_zero() {
        tracing::warn!("WIKI_KUMASCRIPT_TIMEOUT is 0; documents are served unrendered");
    }

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;

    let renderer = Arc::new(KumascriptClient::new(
        &config.kumascript_url,
        config.kumascript_timeout,
    )?);
    let bind_addr = config.bind_addr;
    let state = build_state(config, pool, renderer);

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on {}", bind_addr);

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

    // API routes
    let api_routes = Router::new()
        // Documents
        .route("/documents", post(api::create_document))
        .route("/docs/{locale}/{*slug}", get(api::find_document))
        .route(
            "/documents/{id}",
            get(api::get_document)
                .put(api::update_document)
                .delete(api::delete_document),
        )
        // Rendering
        .route("/documents/{id}/rendered", get(api::get_rendered))
        .route("/documents/{id}/render", post(api::render_document))
        .route("/documents/{id}/schedule-render", post(api::schedule_render))
        // Revisions
        .route(
            "/documents/{id}/revisions",
            get(api::list_revisions).post(api::create_revision),
        )
        .route("/documents/{id}/current-revision", get(api::get_current_revision))
        .route("/documents/{id}/outdated", get(api::get_outdated))
        .route("/revisions/{id}", get(api::get_revision))
        .route("/revisions/{id}/review", post(api::review_revision))
        // Tree
        .route(
            "/documents/{id}/translations",
            get(api::list_translations).post(api::create_translation),
        )
        .route("/documents/{id}/descendants", get(api::get_descendants))
        .route("/documents/{id}/parent-topic", put(api::set_parent_topic))
        .route(
            "/documents/{id}/is-child-of/{ancestor_id}",
            get(api::get_is_child_of),
        )
        .route(
            "/documents/{id}/translation-parent",
            post(api::ensure_translation_parent),
        )
        .route("/documents/{id}/redirect-target", get(api::get_redirect_target))
        // Moves
        .route("/documents/{id}/move-conflicts", get(api::get_move_conflicts))
        .route("/documents/{id}/move", post(api::move_document));

    // Health check
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
mod test_support;

#[cfg(test)]
mod tests;
